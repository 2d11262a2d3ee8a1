//! Step resolution
//!
//! Asks the backend for the next action and turns whatever comes back into a
//! valid `Step`. Resolution never fails: bad replies get one repair attempt,
//! then degrade to the observe-only fallback.

use llm_core::{ChatMessage, ChatOptions};
use serde_json::{Map, Value};
use tracing::{debug, instrument, warn};

use super::backend::ChatBackend;
use super::extract::{extract, ExtractionError};
use super::state::{FallbackReason, Step, Transcript};
use crate::tools::ActionKind;

/// Standing instructions: the action vocabulary and the one-action rule
pub const SYSTEM_PROMPT: &str = "You are a local automation agent.\n\
Respond with ONE and ONLY ONE JSON object (no prose, no code fences).\n\
Schema: {\"thought\": string, \"action\": string, \"args\": object}.\n\
Allowed actions: open_url(url), click(text_or_selector), type(text), wait(seconds), read_page(), finish().\n\
Rules: Do exactly ONE action per reply. Never repeat the same action+args twice in a row. \
Use finish() ONLY when the user goal is satisfied. Prefer read_page() after navigation.\n";

const REPAIR_PROMPT: &str = "Return ONLY one JSON object. No prose.";

fn goal_prompt(goal: &str) -> String {
    format!(
        "USER GOAL: {}\nReturn only one JSON object for your next single action.",
        goal
    )
}

/// Produces one validated step per call
pub struct StepResolver<'a> {
    backend: &'a dyn ChatBackend,
    options: ChatOptions,
}

impl<'a> StepResolver<'a> {
    pub fn new(backend: &'a dyn ChatBackend) -> Self {
        Self {
            backend,
            options: ChatOptions::deterministic(),
        }
    }

    #[instrument(skip_all, fields(history = transcript.len()))]
    pub async fn resolve(&self, goal: &str, transcript: &Transcript) -> Step {
        let mut messages = transcript.messages().to_vec();
        messages.push(ChatMessage::user(goal_prompt(goal)));

        let raw = self.ask(&messages).await;
        let object = match extract(&raw) {
            Ok(object) => object,
            Err(e) => {
                debug!(error = %e, raw_len = raw.len(), "Reply had no usable object, asking for a repair");
                match self.repair(&raw).await {
                    Ok(object) => object,
                    Err(e) => {
                        warn!(error = %e, "Repair attempt failed, falling back to observation");
                        return Step::fallback("", FallbackReason::Unparseable);
                    }
                }
            }
        };

        validate(object)
    }

    /// One backend call; failures read as an empty reply
    async fn ask(&self, messages: &[ChatMessage]) -> String {
        match self.backend.complete(messages, &self.options).await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "Backend gave no usable reply");
                String::new()
            }
        }
    }

    async fn repair(&self, raw: &str) -> Result<Map<String, Value>, ExtractionError> {
        let failed = if raw.is_empty() { "(empty)" } else { raw };
        let messages = [ChatMessage::system(REPAIR_PROMPT), ChatMessage::user(failed)];
        extract(&self.ask(&messages).await)
    }
}

/// Coerce a decoded object into a step, silently correcting what it can't use
pub fn validate(mut object: Map<String, Value>) -> Step {
    let thought = coerce_text(object.get("thought"));
    let action = coerce_text(object.get("action"));

    let kind = match action.parse::<ActionKind>() {
        Ok(kind) => kind,
        Err(e) => {
            debug!(error = %e, "Replacing unknown action with observation");
            return Step::fallback(thought, FallbackReason::UnknownAction);
        }
    };

    let args = match object.remove("args") {
        None | Some(Value::Null) => Map::new(),
        Some(Value::Object(args)) => args,
        Some(other) => {
            warn!(action = %kind, args = %other, "Ignoring non-object args");
            Map::new()
        }
    };

    Step::new(thought, kind, args)
}

fn coerce_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.trim().to_string(),
        Some(other) => other.to_string(),
    }
}

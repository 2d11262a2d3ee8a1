//! Agent state management

use llm_core::ChatMessage;
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::time::Duration;

use super::guard::DEFAULT_TOLERANCE;
use crate::tools::{ActionKind, ActionResult};

/// Configuration for the agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Model to use
    pub model: String,
    /// Maximum steps before giving up
    pub max_steps: usize,
    /// Identical consecutive proposals tolerated before forcing the fallback
    pub repeat_tolerance: u32,
    /// Time limit for one executor call
    pub action_timeout: Duration,
    /// Longest wait a step may request
    pub max_wait: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            model: "llama3.1:8b".to_string(),
            max_steps: 12,
            repeat_tolerance: DEFAULT_TOLERANCE,
            action_timeout: Duration::from_secs(30),
            max_wait: Duration::from_secs(30),
        }
    }
}

impl AgentConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Default::default()
        }
    }

    pub fn with_max_steps(mut self, max: usize) -> Self {
        self.max_steps = max;
        self
    }

    pub fn with_repeat_tolerance(mut self, tolerance: u32) -> Self {
        self.repeat_tolerance = tolerance;
        self
    }

    pub fn with_action_timeout(mut self, timeout: Duration) -> Self {
        self.action_timeout = timeout;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }
}

/// Why a step was replaced by the observe-only fallback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FallbackReason {
    /// Neither the reply nor the repair attempt contained a usable object
    Unparseable,
    /// The object named no action, or one outside the vocabulary
    UnknownAction,
    /// The same action kept coming back
    Repetition,
}

/// One proposed and, unless terminal, executed action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Step {
    pub thought: String,
    pub action: ActionKind,
    pub args: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ActionResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<FallbackReason>,
}

impl Step {
    pub fn new(thought: impl Into<String>, action: ActionKind, args: Map<String, Value>) -> Self {
        Self {
            thought: thought.into(),
            action,
            args,
            result: None,
            fallback: None,
        }
    }

    /// The observe-only action substituted when a proposal can't be used
    pub fn fallback(thought: impl Into<String>, reason: FallbackReason) -> Self {
        Self {
            fallback: Some(reason),
            ..Self::new(thought, ActionKind::FALLBACK, Map::new())
        }
    }

    /// Replace the proposal before it runs
    pub fn force_fallback(&mut self, reason: FallbackReason) {
        debug_assert!(self.result.is_none(), "step already executed");
        self.action = ActionKind::FALLBACK;
        self.args = Map::new();
        self.fallback = Some(reason);
    }

    /// The step as the model should see it echoed back
    pub fn to_echo(&self) -> String {
        json!({
            "thought": self.thought,
            "action": self.action,
            "args": self.args,
        })
        .to_string()
    }

    /// Short status line for the observation sink
    pub fn status_line(&self) -> String {
        format!(
            "Thinking: {}\nDoing: {} {}",
            self.thought,
            self.action,
            Value::Object(self.args.clone())
        )
    }
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Finished,
    BudgetExhausted,
}

/// Everything a run produced
#[derive(Debug, Clone, Serialize)]
pub struct AgentState {
    pub goal: String,
    pub steps: Vec<Step>,
    pub done: bool,
}

impl AgentState {
    pub fn new(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            steps: Vec::new(),
            done: false,
        }
    }

    pub fn push_step(&mut self, step: Step) {
        self.steps.push(step);
    }

    pub fn mark_done(&mut self) {
        debug_assert!(!self.done, "run already finished");
        self.done = true;
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.done {
            RunOutcome::Finished
        } else {
            RunOutcome::BudgetExhausted
        }
    }

    /// Steps whose execution reported an error
    pub fn failed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.result.as_ref().is_some_and(|r| !r.is_ok()))
            .count()
    }

    /// Steps that were replaced by the fallback action
    pub fn fallback_steps(&self) -> usize {
        self.steps.iter().filter(|s| s.fallback.is_some()).count()
    }
}

/// Conversation sent to the backend: system prompt first, then history
#[derive(Debug, Clone)]
pub struct Transcript {
    messages: Vec<ChatMessage>,
}

impl Transcript {
    pub fn new(system_prompt: impl Into<String>) -> Self {
        Self {
            messages: vec![ChatMessage::system(system_prompt)],
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Record an executed step: what was done, then what happened
    pub fn push_executed(&mut self, step: &Step, result: &ActionResult) {
        self.messages.push(ChatMessage::assistant(step.to_echo()));
        self.messages.push(ChatMessage::user(format!(
            "Observation: {}",
            serde_json::to_string(result).unwrap_or_default()
        )));
    }

    /// Record the terminal step
    pub fn push_finished(&mut self, step: &Step) {
        self.messages.push(ChatMessage::assistant(step.to_echo()));
        self.messages
            .push(ChatMessage::user("Observation: finished acknowledged."));
    }
}

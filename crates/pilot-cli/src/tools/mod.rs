//! Action vocabulary and the executor seam
//!
//! The model may only ask for one of a closed set of actions. Each action
//! decodes its loosely-typed JSON arguments into a typed variant before it
//! reaches an executor.

pub mod browser;
pub mod dispatch;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Names of every action the model may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    OpenUrl,
    Click,
    Type,
    Wait,
    ReadPage,
    Finish,
}

impl ActionKind {
    pub const ALL: [ActionKind; 6] = [
        ActionKind::OpenUrl,
        ActionKind::Click,
        ActionKind::Type,
        ActionKind::Wait,
        ActionKind::ReadPage,
        ActionKind::Finish,
    ];

    /// The side-effect-free action used whenever a proposal can't be trusted
    pub const FALLBACK: ActionKind = ActionKind::ReadPage;

    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::OpenUrl => "open_url",
            ActionKind::Click => "click",
            ActionKind::Type => "type",
            ActionKind::Wait => "wait",
            ActionKind::ReadPage => "read_page",
            ActionKind::Finish => "finish",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ActionKind::Finish)
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown action `{0}`")]
pub struct UnknownAction(pub String);

impl FromStr for ActionKind {
    type Err = UnknownAction;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ActionKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| UnknownAction(s.to_string()))
    }
}

/// A fully validated, executable action
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    OpenUrl { url: String },
    Click { text_or_selector: String },
    Type { text: String },
    Wait { seconds: f64 },
    ReadPage,
}

#[derive(Deserialize)]
struct OpenUrlArgs {
    url: String,
}

#[derive(Deserialize)]
struct ClickArgs {
    text_or_selector: String,
}

#[derive(Deserialize)]
struct TypeArgs {
    text: String,
}

#[derive(Deserialize)]
struct WaitArgs {
    #[serde(default)]
    seconds: Option<f64>,
}

const DEFAULT_WAIT_SECONDS: f64 = 1.0;

/// Rejected arguments for an otherwise known action
#[derive(Debug, thiserror::Error)]
pub enum ArgsError {
    #[error("invalid arguments for {action}: {source}")]
    Decode {
        action: ActionKind,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid arguments for {action}: {reason}")]
    Invalid { action: ActionKind, reason: String },
    #[error("unknown action")]
    NotExecutable,
}

impl Action {
    /// Decode generic arguments into the variant for `kind`.
    ///
    /// `finish` has no executable form and yields `ArgsError::NotExecutable`.
    pub fn decode(kind: ActionKind, args: &Map<String, Value>) -> Result<Self, ArgsError> {
        let value = Value::Object(args.clone());
        let decode_err = |source| ArgsError::Decode { action: kind, source };

        let action = match kind {
            ActionKind::OpenUrl => {
                let a: OpenUrlArgs = serde_json::from_value(value).map_err(decode_err)?;
                Action::OpenUrl {
                    url: non_empty(kind, "url", a.url)?,
                }
            }
            ActionKind::Click => {
                let a: ClickArgs = serde_json::from_value(value).map_err(decode_err)?;
                Action::Click {
                    text_or_selector: non_empty(kind, "text_or_selector", a.text_or_selector)?,
                }
            }
            ActionKind::Type => {
                let a: TypeArgs = serde_json::from_value(value).map_err(decode_err)?;
                if a.text.is_empty() {
                    return Err(ArgsError::Invalid {
                        action: kind,
                        reason: "`text` must not be empty".to_string(),
                    });
                }
                Action::Type { text: a.text }
            }
            ActionKind::Wait => {
                let a: WaitArgs = serde_json::from_value(value).map_err(decode_err)?;
                let seconds = a.seconds.unwrap_or(DEFAULT_WAIT_SECONDS);
                if !seconds.is_finite() || seconds < 0.0 {
                    return Err(ArgsError::Invalid {
                        action: kind,
                        reason: format!("`seconds` must be a non-negative number, got {}", seconds),
                    });
                }
                Action::Wait { seconds }
            }
            ActionKind::ReadPage => Action::ReadPage,
            ActionKind::Finish => return Err(ArgsError::NotExecutable),
        };

        Ok(action)
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            Action::OpenUrl { .. } => ActionKind::OpenUrl,
            Action::Click { .. } => ActionKind::Click,
            Action::Type { .. } => ActionKind::Type,
            Action::Wait { .. } => ActionKind::Wait,
            Action::ReadPage => ActionKind::ReadPage,
        }
    }
}

fn non_empty(action: ActionKind, field: &str, value: String) -> Result<String, ArgsError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ArgsError::Invalid {
            action,
            reason: format!("`{}` must not be empty", field),
        });
    }
    Ok(trimmed.to_string())
}

/// Which click strategy found the target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClickStrategy {
    Role,
    Text,
    Selector,
}

/// Success payload of an executed action
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ActionOutput {
    Opened { url: String, title: String },
    Clicked { strategy: ClickStrategy },
    Typed { typed: usize },
    Waited { seconds: f64 },
    Page { title: String, text: String },
}

/// Outcome of dispatching an action: success payload or failure, never both
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ActionResult {
    Ok(ActionOutput),
    Error { message: String },
}

impl ActionResult {
    pub fn error(message: impl Into<String>) -> Self {
        ActionResult::Error {
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ActionResult::Ok(_))
    }
}

/// The environment actions are executed against
#[async_trait]
pub trait Executor: Send + Sync {
    async fn open_url(&self, url: &str) -> Result<ActionOutput>;

    async fn click(&self, text_or_selector: &str) -> Result<ActionOutput>;

    async fn type_text(&self, text: &str) -> Result<ActionOutput>;

    async fn wait(&self, seconds: f64) -> Result<ActionOutput>;

    async fn read_page(&self) -> Result<ActionOutput>;
}

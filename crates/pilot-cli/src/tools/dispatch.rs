//! Action dispatch
//!
//! Turns a validated action name plus raw arguments into one executor call.
//! Nothing an executor does escapes as an error: every failure becomes an
//! `ActionResult::Error` the model can read as an observation.

use std::time::Duration;

use serde_json::{Map, Value};
use tracing::{debug, info, instrument, warn};

use super::{Action, ActionKind, ActionResult, ArgsError, Executor};

/// Longest `wait` accepted unless configured otherwise
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(30);

/// Dispatches actions to an executor under a per-action time limit
#[derive(Debug, Clone)]
pub struct Dispatcher {
    action_timeout: Duration,
    max_wait: Duration,
}

impl Dispatcher {
    pub fn new(action_timeout: Duration) -> Self {
        Self {
            action_timeout,
            max_wait: DEFAULT_MAX_WAIT,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    #[instrument(skip(self, args, executor), fields(action = %kind))]
    pub async fn dispatch(
        &self,
        kind: ActionKind,
        args: &Map<String, Value>,
        executor: &dyn Executor,
    ) -> ActionResult {
        let action = match Action::decode(kind, args) {
            Ok(a) => a,
            Err(ArgsError::NotExecutable) => {
                warn!(action = %kind, "No executor for action");
                return ActionResult::error("unknown action");
            }
            Err(e) => {
                warn!(error = %e, "Rejected action arguments");
                return ActionResult::error(e.to_string());
            }
        };

        // A wait may outlast the action timeout by at most max_wait
        let limit = match action {
            Action::Wait { seconds } => {
                let requested = match Duration::try_from_secs_f64(seconds) {
                    Ok(d) if d <= self.max_wait => d,
                    _ => {
                        let e = ArgsError::Invalid {
                            action: kind,
                            reason: format!(
                                "`seconds` must be at most {}, got {}",
                                self.max_wait.as_secs_f64(),
                                seconds
                            ),
                        };
                        warn!(error = %e, "Rejected action arguments");
                        return ActionResult::error(e.to_string());
                    }
                };
                self.action_timeout.saturating_add(requested)
            }
            _ => self.action_timeout,
        };

        debug_assert_eq!(action.kind(), kind);
        debug!(?action, timeout_ms = limit.as_millis() as u64, "Executing action");
        let call = async {
            match &action {
                Action::OpenUrl { url } => executor.open_url(url).await,
                Action::Click { text_or_selector } => executor.click(text_or_selector).await,
                Action::Type { text } => executor.type_text(text).await,
                Action::Wait { seconds } => executor.wait(*seconds).await,
                Action::ReadPage => executor.read_page().await,
            }
        };

        match tokio::time::timeout(limit, call).await {
            Ok(Ok(output)) => {
                info!(action = %kind, "Action succeeded");
                ActionResult::Ok(output)
            }
            Ok(Err(e)) => {
                warn!(action = %kind, error = %e, "Action failed");
                ActionResult::error(format!("{:#}", e))
            }
            Err(_) => {
                warn!(action = %kind, timeout_ms = limit.as_millis() as u64, "Action timed out");
                ActionResult::error(format!(
                    "{} timed out after {:.1}s",
                    kind,
                    limit.as_secs_f64()
                ))
            }
        }
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

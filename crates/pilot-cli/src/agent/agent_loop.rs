//! Agent loop implementation

use tracing::{debug, info, instrument, warn};

use super::backend::ChatBackend;
use super::guard::{guard, GuardState, GuardVerdict, Signature};
use super::resolver::{StepResolver, SYSTEM_PROMPT};
use super::state::{AgentConfig, AgentState, FallbackReason, RunOutcome, Transcript};
use crate::observe::ObservationSink;
use crate::tools::dispatch::Dispatcher;
use crate::tools::Executor;

/// The agent loop orchestrator.
///
/// Borrows its collaborators: the executor in particular is a resource the
/// caller acquires before the run and releases after it.
pub struct AgentLoop<'a> {
    backend: &'a dyn ChatBackend,
    executor: &'a dyn Executor,
    sink: &'a dyn ObservationSink,
    config: AgentConfig,
}

/// Sends the final report when the run ends, however it ends
struct StopReport<'a> {
    sink: &'a dyn ObservationSink,
    outcome: Option<RunOutcome>,
}

impl Drop for StopReport<'_> {
    fn drop(&mut self) {
        let summary = match self.outcome {
            Some(RunOutcome::Finished) => "goal finished",
            Some(RunOutcome::BudgetExhausted) => "step budget exhausted",
            None => "run aborted",
        };
        self.sink.stopped(summary);
    }
}

impl<'a> AgentLoop<'a> {
    /// Create a new agent loop
    pub fn new(
        backend: &'a dyn ChatBackend,
        executor: &'a dyn Executor,
        sink: &'a dyn ObservationSink,
        config: AgentConfig,
    ) -> Self {
        Self {
            backend,
            executor,
            sink,
            config,
        }
    }

    /// Run the agent towards a goal until it finishes or runs out of steps
    #[instrument(skip(self, goal), fields(model = %self.config.model))]
    pub async fn run(&self, goal: &str) -> AgentState {
        info!(
            goal_len = goal.len(),
            max_steps = self.config.max_steps,
            repeat_tolerance = self.config.repeat_tolerance,
            "Starting agent loop"
        );

        let mut stop = StopReport {
            sink: self.sink,
            outcome: None,
        };
        let mut state = AgentState::new(goal);
        let mut transcript = Transcript::new(SYSTEM_PROMPT);
        let mut guard_state = GuardState::new(self.config.repeat_tolerance);
        let resolver = StepResolver::new(self.backend);
        let dispatcher =
            Dispatcher::new(self.config.action_timeout).with_max_wait(self.config.max_wait);

        for iteration in 1..=self.config.max_steps {
            debug!(iteration, messages = transcript.len(), "Starting iteration");

            let mut step = resolver.resolve(&state.goal, &transcript).await;
            self.sink.report(iteration, &step.status_line());

            if step.action.is_terminal() {
                info!(iteration, "Model declared the goal satisfied");
                transcript.push_finished(&step);
                state.push_step(step);
                state.mark_done();
                break;
            }

            let proposed = Signature::new(step.action, &step.args);
            let executed = match guard(&proposed, &mut guard_state) {
                GuardVerdict::Proceed => {
                    debug!(remaining = guard_state.remaining(), "Guard allowed action");
                    proposed
                }
                GuardVerdict::ForceFallback => {
                    warn!(
                        iteration,
                        action = %proposed.action(),
                        tolerance = guard_state.tolerance(),
                        "Repeated action, forcing an observation instead"
                    );
                    step.force_fallback(FallbackReason::Repetition);
                    self.sink.report(iteration, &step.status_line());
                    Signature::new(step.action, &step.args)
                }
            };
            guard_state.record(executed);

            let result = dispatcher
                .dispatch(step.action, &step.args, self.executor)
                .await;
            transcript.push_executed(&step, &result);
            step.result = Some(result);
            state.push_step(step);
        }

        let outcome = state.outcome();
        if outcome == RunOutcome::BudgetExhausted {
            warn!(max_steps = self.config.max_steps, "Agent reached maximum steps");
        }
        stop.outcome = Some(outcome);

        info!(
            done = state.done,
            steps = state.steps.len(),
            failed = state.failed_steps(),
            fallbacks = state.fallback_steps(),
            "Agent loop completed"
        );

        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::state::Step;
    use crate::agent::test_support::{RecordingExecutor, RecordingSink, ScriptedBackend};
    use crate::tools::{ActionKind, ActionOutput, ActionResult};
    use futures::FutureExt;
    use llm_core::Role;
    use std::panic::AssertUnwindSafe;

    const GOAL: &str = "Open https://example.com, read the page, then finish.";

    fn config(max_steps: usize) -> AgentConfig {
        AgentConfig::new("test-model").with_max_steps(max_steps)
    }

    #[tokio::test]
    async fn test_open_read_finish() {
        let backend = ScriptedBackend::new([
            r#"{"thought":"go","action":"open_url","args":{"url":"https://example.com"}}"#,
            r#"{"thought":"read","action":"read_page","args":{}}"#,
            r#"{"thought":"done","action":"finish","args":{}}"#,
        ]);
        let executor = RecordingExecutor::default();
        let sink = RecordingSink::default();

        let state = AgentLoop::new(&backend, &executor, &sink, config(12))
            .run(GOAL)
            .await;

        assert!(state.done);
        assert_eq!(state.outcome(), RunOutcome::Finished);
        assert_eq!(state.goal, GOAL);
        assert_eq!(state.steps.len(), 3);
        assert_eq!(state.steps[0].action, ActionKind::OpenUrl);
        assert_eq!(
            state.steps[0].result,
            Some(ActionResult::Ok(ActionOutput::Opened {
                url: "https://example.com".to_string(),
                title: "Example Domain".to_string(),
            }))
        );
        assert_eq!(state.steps[1].action, ActionKind::ReadPage);
        assert!(state.steps[1].result.as_ref().unwrap().is_ok());
        assert_eq!(state.steps[2].action, ActionKind::Finish);
        assert!(state.steps[2].result.is_none());

        assert_eq!(executor.actions(), vec!["open_url https://example.com", "read_page"]);
        assert_eq!(sink.reports.lock().unwrap().len(), 3);
        assert_eq!(*sink.stopped.lock().unwrap(), vec!["goal finished"]);
    }

    #[tokio::test]
    async fn test_transcript_grows_with_echo_then_observation() {
        let backend = ScriptedBackend::new([
            r#"{"thought":"go","action":"open_url","args":{"url":"https://example.com"}}"#,
            r#"{"thought":"done","action":"finish","args":{}}"#,
        ]);
        let executor = RecordingExecutor::default();
        let sink = RecordingSink::default();

        AgentLoop::new(&backend, &executor, &sink, config(5)).run(GOAL).await;

        let calls = backend.calls();
        assert_eq!(calls.len(), 2);

        // system, goal
        assert_eq!(calls[0].len(), 2);
        // system, assistant echo, observation, goal
        let second = &calls[1];
        assert_eq!(second.len(), 4);
        assert_eq!(second[1].role, Role::Assistant);
        assert!(second[1].content.contains(r#""action":"open_url""#));
        assert_eq!(second[2].role, Role::User);
        assert!(second[2].content.starts_with("Observation: {\"status\":\"ok\""));
        assert!(second[3].content.starts_with("USER GOAL: "));
    }

    #[tokio::test]
    async fn test_unparseable_replies_fall_back_and_continue() {
        let backend = ScriptedBackend::new([
            "I am not sure what to do.",
            "Really, no idea.",
            r#"{"thought":"done","action":"finish","args":{}}"#,
        ]);
        let executor = RecordingExecutor::default();
        let sink = RecordingSink::default();

        let state = AgentLoop::new(&backend, &executor, &sink, config(5))
            .run(GOAL)
            .await;

        assert!(state.done);
        assert_eq!(state.steps.len(), 2);
        assert_eq!(state.steps[0].action, ActionKind::ReadPage);
        assert!(state.steps[0].args.is_empty());
        assert_eq!(state.steps[0].fallback, Some(FallbackReason::Unparseable));
        assert!(state.steps[0].result.is_some());
        assert_eq!(executor.actions(), vec!["read_page"]);
        assert_eq!(state.fallback_steps(), 1);
    }

    #[tokio::test]
    async fn test_budget_exhausted_without_finish() {
        let backend = ScriptedBackend::new([
            r#"{"thought":"a","action":"wait","args":{"seconds":0}}"#,
            r#"{"thought":"b","action":"read_page","args":{}}"#,
            r#"{"thought":"c","action":"type","args":{"text":"hello"}}"#,
            r#"{"thought":"d","action":"finish","args":{}}"#,
        ]);
        let executor = RecordingExecutor::default();
        let sink = RecordingSink::default();

        let state = AgentLoop::new(&backend, &executor, &sink, config(3))
            .run(GOAL)
            .await;

        assert!(!state.done);
        assert_eq!(state.outcome(), RunOutcome::BudgetExhausted);
        assert_eq!(state.steps.len(), 3);
        assert!(state.steps.iter().all(|s| s.result.is_some()));
        assert_eq!(backend.call_count(), 3);
        assert_eq!(*sink.stopped.lock().unwrap(), vec!["step budget exhausted"]);
    }

    #[tokio::test]
    async fn test_repeated_action_is_replaced() {
        let backend = ScriptedBackend::repeating(
            r#"{"thought":"again","action":"click","args":{"text_or_selector":"Next"}}"#,
        );
        let executor = RecordingExecutor::default();
        let sink = RecordingSink::default();

        let state = AgentLoop::new(&backend, &executor, &sink, config(6))
            .run(GOAL)
            .await;

        let actions: Vec<ActionKind> = state.steps.iter().map(|s| s.action).collect();
        assert_eq!(
            actions,
            vec![
                ActionKind::Click,
                ActionKind::Click,
                ActionKind::ReadPage,
                ActionKind::Click,
                ActionKind::Click,
                ActionKind::ReadPage,
            ]
        );
        let forced: Vec<&Step> = state
            .steps
            .iter()
            .filter(|s| s.fallback == Some(FallbackReason::Repetition))
            .collect();
        assert_eq!(forced.len(), 2);
        assert!(forced.iter().all(|s| s.args.is_empty()));
        // One report per proposal plus one per rewrite, rewrites keep the iteration
        let labels: Vec<usize> = sink.reports.lock().unwrap().iter().map(|(n, _)| *n).collect();
        assert_eq!(labels, vec![1, 2, 3, 3, 4, 5, 6, 6]);
    }

    #[tokio::test]
    async fn test_executor_failure_is_observed_not_fatal() {
        let backend = ScriptedBackend::new([
            r#"{"thought":"click it","action":"click","args":{"text_or_selector":"missing"}}"#,
            r#"{"thought":"done","action":"finish","args":{}}"#,
        ]);
        let executor = RecordingExecutor::default();
        let sink = RecordingSink::default();

        let state = AgentLoop::new(&backend, &executor, &sink, config(5))
            .run(GOAL)
            .await;

        assert!(state.done);
        assert_eq!(state.failed_steps(), 1);
        match &state.steps[0].result {
            Some(ActionResult::Error { message }) => assert!(message.contains("missing")),
            other => panic!("expected error result, got {:?}", other),
        }

        let second_call = &backend.calls()[1];
        assert!(second_call[2].content.starts_with("Observation: {\"status\":\"error\""));
    }

    #[tokio::test]
    async fn test_unknown_action_consumes_a_step() {
        let backend = ScriptedBackend::new([
            r#"{"thought":"scroll","action":"scroll","args":{"dy":400}}"#,
            r#"{"thought":"done","action":"finish","args":{}}"#,
        ]);
        let executor = RecordingExecutor::default();
        let sink = RecordingSink::default();

        let state = AgentLoop::new(&backend, &executor, &sink, config(5))
            .run(GOAL)
            .await;

        assert_eq!(state.steps.len(), 2);
        assert_eq!(state.steps[0].action, ActionKind::ReadPage);
        assert!(state.steps[0].args.is_empty());
        assert_eq!(state.steps[0].fallback, Some(FallbackReason::UnknownAction));
    }

    #[tokio::test]
    async fn test_backend_down_never_aborts() {
        let backend = ScriptedBackend::from_results(Vec::new());
        let executor = RecordingExecutor::default();
        let sink = RecordingSink::default();

        let state = AgentLoop::new(&backend, &executor, &sink, config(2))
            .run(GOAL)
            .await;

        assert!(!state.done);
        assert_eq!(state.steps.len(), 2);
        assert!(state
            .steps
            .iter()
            .all(|s| s.action == ActionKind::ReadPage && s.fallback.is_some()));
        // Two calls per step: the request and its repair
        assert_eq!(backend.call_count(), 4);
    }

    #[tokio::test]
    async fn test_stopped_reported_when_run_unwinds() {
        let backend = ScriptedBackend::new([r#"{"thought":"read","action":"read_page","args":{}}"#]);
        let executor = RecordingExecutor {
            panic_on_read: true,
            ..Default::default()
        };
        let sink = RecordingSink::default();

        let agent = AgentLoop::new(&backend, &executor, &sink, config(3));
        let outcome = AssertUnwindSafe(agent.run(GOAL)).catch_unwind().await;

        assert!(outcome.is_err());
        assert_eq!(*sink.stopped.lock().unwrap(), vec!["run aborted"]);
    }
}

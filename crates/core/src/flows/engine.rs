use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{RunAction, RunContext, RunEvent, RunState, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> RunState;
    fn transition(
        &self,
        current: &RunState,
        event: &RunEvent,
        context: &RunContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// The one-directional pipeline run lifecycle.
#[derive(Clone, Debug, Default)]
pub struct PipelineFlow;

impl FlowDefinition for PipelineFlow {
    fn initial_state(&self) -> RunState {
        RunState::Idle
    }

    fn transition(
        &self,
        current: &RunState,
        event: &RunEvent,
        context: &RunContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_pipeline(current, event, context)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> RunState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &RunState,
        event: &RunEvent,
        context: &RunContext,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event, context)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: &RunState,
        event: &RunEvent,
        context: &RunContext,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event, context);
        match &result {
            Ok(outcome) => {
                let actions: Vec<String> =
                    outcome.actions.iter().map(|action| format!("{action:?}")).collect();
                sink.emit(
                    AuditEvent::new(
                        audit.run_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_applied",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", format!("{:?}", outcome.event))
                    .with_metadata("actions", actions.join(",")),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.run_id.clone(),
                        audit.correlation_id.clone(),
                        "flow.transition_rejected",
                        AuditCategory::Flow,
                        audit.actor.clone(),
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

impl Default for FlowEngine<PipelineFlow> {
    fn default() -> Self {
        Self::new(PipelineFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: RunState, event: RunEvent },
    #[error("run cannot enter persistence: {reason}")]
    PersistenceGuard { reason: &'static str },
}

fn transition_pipeline(
    current: &RunState,
    event: &RunEvent,
    context: &RunContext,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use RunAction::{DelegateToTeam, EvaluatePrompt, EvaluateReport, PersistArtifact, SealRun};
    use RunEvent::{
        ChecksCompleted, OutputDegraded, PersistFailed, Persisted, PromptBlocked, PromptCleared,
        ReportGenerated, RunFailed, Started,
    };
    use RunState::{Aborted, Done, Idle, Persisting, PostChecking, PreChecking, Running};

    let (to, actions) = match (current, event) {
        (Idle, Started) => (PreChecking, vec![EvaluatePrompt]),
        (PreChecking, PromptCleared) => {
            if context.pre_check_blocked {
                return Err(FlowTransitionError::InvalidTransition {
                    state: *current,
                    event: *event,
                });
            }
            (Running, vec![DelegateToTeam])
        }
        (PreChecking, PromptBlocked) => (Aborted, vec![SealRun]),
        (Running, ReportGenerated) => (PostChecking, vec![EvaluateReport]),
        (Running, RunFailed) | (PostChecking, RunFailed) => (Aborted, vec![SealRun]),
        (PostChecking, ChecksCompleted) => {
            if context.pre_check_blocked {
                return Err(FlowTransitionError::PersistenceGuard {
                    reason: "pre-check recorded a block verdict",
                });
            }
            if !context.has_report {
                return Err(FlowTransitionError::PersistenceGuard { reason: "no report text" });
            }
            (Persisting, vec![PersistArtifact])
        }
        (PostChecking, OutputDegraded) => (Done, vec![SealRun]),
        (Persisting, Persisted) | (Persisting, PersistFailed) => (Done, vec![SealRun]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: *current, event: *event });
        }
    };

    Ok(TransitionOutcome { from: *current, to, event: *event, actions })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::run::RunId;
    use crate::flows::engine::{FlowEngine, FlowTransitionError, PipelineFlow};
    use crate::flows::states::{RunAction, RunContext, RunEvent, RunState};

    fn ready() -> RunContext {
        RunContext { pre_check_blocked: false, has_report: true }
    }

    #[test]
    fn happy_path_reaches_done_through_persistence() {
        let engine = FlowEngine::new(PipelineFlow);
        let mut state = engine.initial_state();
        let events = [
            RunEvent::Started,
            RunEvent::PromptCleared,
            RunEvent::ReportGenerated,
            RunEvent::ChecksCompleted,
            RunEvent::Persisted,
        ];

        let mut visited = vec![state];
        for event in &events {
            state = engine.apply(&state, event, &ready()).expect("valid transition").to;
            visited.push(state);
        }

        assert_eq!(
            visited,
            vec![
                RunState::Idle,
                RunState::PreChecking,
                RunState::Running,
                RunState::PostChecking,
                RunState::Persisting,
                RunState::Done,
            ]
        );
    }

    #[test]
    fn blocked_prompt_aborts_from_pre_checking() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&RunState::PreChecking, &RunEvent::PromptBlocked, &RunContext::default())
            .expect("pre-check block aborts");

        assert_eq!(outcome.to, RunState::Aborted);
        assert_eq!(outcome.actions, vec![RunAction::SealRun]);
    }

    #[test]
    fn blocked_pre_check_can_never_enter_persistence() {
        let engine = FlowEngine::default();
        let context = RunContext { pre_check_blocked: true, has_report: true };

        let error = engine
            .apply(&RunState::PostChecking, &RunEvent::ChecksCompleted, &context)
            .expect_err("persistence must be refused");
        assert!(matches!(error, FlowTransitionError::PersistenceGuard { .. }));

        let error = engine
            .apply(&RunState::PreChecking, &RunEvent::PromptCleared, &context)
            .expect_err("blocked prompt cannot run");
        assert!(matches!(error, FlowTransitionError::InvalidTransition { .. }));
    }

    #[test]
    fn degraded_output_skips_persistence() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&RunState::PostChecking, &RunEvent::OutputDegraded, &RunContext::default())
            .expect("degraded output finishes");
        assert_eq!(outcome.to, RunState::Done);
    }

    #[test]
    fn failed_persistence_still_reaches_done() {
        let engine = FlowEngine::default();
        let outcome = engine
            .apply(&RunState::Persisting, &RunEvent::PersistFailed, &ready())
            .expect("persist failure is non-fatal");
        assert_eq!(outcome.to, RunState::Done);
    }

    #[test]
    fn machine_is_one_directional() {
        let engine = FlowEngine::default();
        for terminal in [RunState::Done, RunState::Aborted] {
            for event in [RunEvent::Started, RunEvent::PromptCleared, RunEvent::RunFailed] {
                assert!(engine.apply(&terminal, &event, &ready()).is_err());
            }
        }
        assert!(engine.apply(&RunState::Running, &RunEvent::Started, &ready()).is_err());
        assert!(engine.apply(&RunState::Persisting, &RunEvent::RunFailed, &ready()).is_err());
    }

    #[test]
    fn transition_emits_audit_event_with_correlation() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();
        let run_id = RunId::new("run-42");

        engine
            .apply_with_audit(
                &RunState::Idle,
                &RunEvent::Started,
                &RunContext::default(),
                &sink,
                &AuditContext::new(Some(run_id.clone()), "run-42", "orchestrator"),
            )
            .expect("transition should succeed");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "run-42");
        assert_eq!(events[0].run_id.as_ref(), Some(&run_id));
        assert_eq!(events[0].event_type, "flow.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("pre_checking"));
    }
}

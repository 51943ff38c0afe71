use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{TransitionOutcome, WorkflowEvent, WorkflowStep};

pub trait WorkflowDefinition {
    fn name(&self) -> &'static str;
    fn initial_step(&self) -> WorkflowStep;
    fn transition(
        &self,
        current: WorkflowStep,
        event: WorkflowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// Decision -> Dispatch loop where sensitive actions park the turn in
/// `Terminal` until a human decision resumes it at `Dispatch`.
#[derive(Clone, Debug, Default)]
pub struct ConfirmationGatedFlow;

impl WorkflowDefinition for ConfirmationGatedFlow {
    fn name(&self) -> &'static str {
        "confirmation_gated"
    }

    fn initial_step(&self) -> WorkflowStep {
        WorkflowStep::Terminal
    }

    fn transition(
        &self,
        current: WorkflowStep,
        event: WorkflowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_confirmation_gated(current, event)
    }
}

pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: WorkflowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn name(&self) -> &'static str {
        self.flow.name()
    }

    pub fn initial_step(&self) -> WorkflowStep {
        self.flow.initial_step()
    }

    pub fn apply(
        &self,
        current: WorkflowStep,
        event: WorkflowEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        self.flow.transition(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: WorkflowStep,
        event: WorkflowEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                sink.emit(
                    AuditEvent::new(
                        audit.session_key.clone(),
                        audit.correlation_id.clone(),
                        "workflow.transition_applied",
                        AuditCategory::Workflow,
                        audit.actor.clone(),
                        AuditOutcome::Success,
                    )
                    .with_metadata("from", outcome.from.as_str())
                    .with_metadata("to", outcome.to.as_str())
                    .with_metadata("event", outcome.event.as_str()),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::new(
                        audit.session_key.clone(),
                        audit.correlation_id.clone(),
                        "workflow.transition_rejected",
                        AuditCategory::Workflow,
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

impl Default for FlowEngine<ConfirmationGatedFlow> {
    fn default() -> Self {
        Self::new(ConfirmationGatedFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {step:?} using event {event:?}")]
    InvalidTransition { step: WorkflowStep, event: WorkflowEvent },
}

fn transition_confirmation_gated(
    current: WorkflowStep,
    event: WorkflowEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use WorkflowEvent::{
        ActionRejected, ActionsRequested, BatchCompleted, ConfirmationRequested, DecisionResumed,
        ReplyProduced, TurnStarted,
    };
    use WorkflowStep::{Decision, Dispatch, Terminal};

    let to = match (current, event) {
        (Terminal, TurnStarted) => Decision,
        (Terminal, DecisionResumed) => Dispatch,
        (Decision, ReplyProduced) => Terminal,
        (Decision, ActionsRequested) => Dispatch,
        (Dispatch, BatchCompleted) => Decision,
        (Dispatch, ConfirmationRequested) | (Dispatch, ActionRejected) => Terminal,
        _ => {
            return Err(FlowTransitionError::InvalidTransition { step: current, event });
        }
    };

    Ok(TransitionOutcome { from: current, to, event })
}

#[cfg(test)]
mod tests {
    use crate::audit::{AuditContext, InMemoryAuditSink};
    use crate::domain::session::SessionKey;
    use crate::flows::engine::{
        ConfirmationGatedFlow, FlowEngine, FlowTransitionError, WorkflowDefinition,
    };
    use crate::flows::states::{WorkflowEvent, WorkflowStep};

    #[test]
    fn turn_with_safe_actions_loops_back_to_decision() {
        let engine = FlowEngine::default();
        let mut step = engine.initial_step();

        for (event, expected) in [
            (WorkflowEvent::TurnStarted, WorkflowStep::Decision),
            (WorkflowEvent::ActionsRequested, WorkflowStep::Dispatch),
            (WorkflowEvent::BatchCompleted, WorkflowStep::Decision),
            (WorkflowEvent::ReplyProduced, WorkflowStep::Terminal),
        ] {
            step = engine.apply(step, event).expect("valid transition").to;
            assert_eq!(step, expected);
        }
    }

    #[test]
    fn suspension_and_resumption_path() {
        let engine = FlowEngine::default();

        let suspended = engine
            .apply(WorkflowStep::Dispatch, WorkflowEvent::ConfirmationRequested)
            .expect("dispatch -> terminal");
        assert!(suspended.is_terminal());

        let resumed = engine
            .apply(suspended.to, WorkflowEvent::DecisionResumed)
            .expect("terminal -> dispatch");
        assert_eq!(resumed.to, WorkflowStep::Dispatch);

        let rejected = engine
            .apply(resumed.to, WorkflowEvent::ActionRejected)
            .expect("dispatch -> terminal");
        assert!(rejected.is_terminal());
    }

    #[test]
    fn decision_cannot_follow_decision_without_dispatch() {
        let engine = FlowEngine::default();
        let error = engine
            .apply(WorkflowStep::Decision, WorkflowEvent::BatchCompleted)
            .expect_err("decision must pass through dispatch");

        assert!(matches!(
            error,
            FlowTransitionError::InvalidTransition {
                step: WorkflowStep::Decision,
                event: WorkflowEvent::BatchCompleted
            }
        ));
    }

    #[test]
    fn decision_cannot_resume_outside_terminal() {
        let engine = FlowEngine::default();
        assert!(engine.apply(WorkflowStep::Decision, WorkflowEvent::DecisionResumed).is_err());
        assert!(engine.apply(WorkflowStep::Dispatch, WorkflowEvent::TurnStarted).is_err());
    }

    #[test]
    fn replay_is_deterministic_for_same_event_sequence() {
        let engine = FlowEngine::new(ConfirmationGatedFlow);
        let events = [
            WorkflowEvent::TurnStarted,
            WorkflowEvent::ActionsRequested,
            WorkflowEvent::ConfirmationRequested,
            WorkflowEvent::DecisionResumed,
            WorkflowEvent::BatchCompleted,
            WorkflowEvent::ReplyProduced,
        ];

        let run = |engine: &FlowEngine<ConfirmationGatedFlow>| {
            let mut step = engine.initial_step();
            let mut visited = Vec::new();
            for event in events {
                step = engine.apply(step, event).expect("deterministic run").to;
                visited.push(step);
            }
            visited
        };

        assert_eq!(run(&engine), run(&engine));
        assert_eq!(ConfirmationGatedFlow.name(), "confirmation_gated");
    }

    #[test]
    fn flow_transition_emits_audit_event() {
        let engine = FlowEngine::default();
        let sink = InMemoryAuditSink::default();

        let _ = engine
            .apply_with_audit(
                WorkflowStep::Terminal,
                WorkflowEvent::TurnStarted,
                &sink,
                &AuditContext::new(Some(SessionKey("s-9".to_owned())), "req-42", "workflow"),
            )
            .expect("transition should succeed");

        let events = sink.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].correlation_id, "req-42");
        assert_eq!(events[0].session_key.as_ref().map(SessionKey::as_str), Some("s-9"));
        assert_eq!(events[0].event_type, "workflow.transition_applied");
        assert_eq!(events[0].metadata.get("to").map(String::as_str), Some("decision"));
    }
}

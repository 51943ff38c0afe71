use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStep {
    Decision,
    Dispatch,
    /// Implicit end state: the turn returned control to the caller.
    Terminal,
}

impl WorkflowStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Decision => "decision",
            Self::Dispatch => "dispatch",
            Self::Terminal => "terminal",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowEvent {
    TurnStarted,
    ReplyProduced,
    ActionsRequested,
    BatchCompleted,
    ConfirmationRequested,
    DecisionResumed,
    ActionRejected,
}

impl WorkflowEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TurnStarted => "turn_started",
            Self::ReplyProduced => "reply_produced",
            Self::ActionsRequested => "actions_requested",
            Self::BatchCompleted => "batch_completed",
            Self::ConfirmationRequested => "confirmation_requested",
            Self::DecisionResumed => "decision_resumed",
            Self::ActionRejected => "action_rejected",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: WorkflowStep,
    pub to: WorkflowStep,
    pub event: WorkflowEvent,
}

impl TransitionOutcome {
    pub fn is_terminal(&self) -> bool {
        self.to == WorkflowStep::Terminal
    }
}

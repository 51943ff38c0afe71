pub mod engine;
pub mod states;

pub use engine::{ConfirmationGatedFlow, FlowEngine, FlowTransitionError, WorkflowDefinition};
pub use states::{TransitionOutcome, WorkflowEvent, WorkflowStep};

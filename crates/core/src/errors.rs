use thiserror::Error;

use crate::flows::FlowTransitionError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error("invalid session key `{key}`: {reason}")]
    InvalidSessionKey { key: String, reason: String },
    #[error("no open action call with id `{call_id}`")]
    UnknownCall { call_id: String },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

/// Failures a turn can end with. Handler failures are deliberately absent:
/// they are folded into the conversation as action results.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum WorkflowError {
    #[error("model requested unknown action `{0}`")]
    UnknownAction(String),
    #[error("unknown decision type `{0}`")]
    UnknownDecisionType(String),
    #[error("invalid `{kind}` decision payload: {reason}")]
    InvalidDecisionPayload { kind: String, reason: String },
    #[error("model provider failure: {0}")]
    ModelProvider(String),
    #[error("checkpoint store unavailable: {0}")]
    CheckpointUnavailable(String),
    #[error("checkpoint for session `{session_key}` moved past version {expected_version}")]
    CheckpointConflict { session_key: String, expected_version: u64 },
    #[error("session `{0}` has no pending confirmation")]
    NoPendingConfirmation(String),
    #[error("session `{session_key}` is waiting for a decision on `{action_name}`")]
    ConfirmationPending { session_key: String, action_name: String },
    #[error("decision token `{supplied}` does not match the pending confirmation")]
    StaleConfirmation { supplied: String },
    #[error("confirmation for `{action_name}` expired before a decision arrived")]
    ConfirmationExpired { action_name: String },
    #[error("turn exceeded {limit} workflow steps without finishing")]
    StepLimitExceeded { limit: u32 },
    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl WorkflowError {
    pub fn error_class(&self) -> &'static str {
        match self {
            Self::UnknownAction(_) => "unknown_action",
            Self::UnknownDecisionType(_) => "unknown_decision_type",
            Self::InvalidDecisionPayload { .. } => "invalid_decision_payload",
            Self::ModelProvider(_) => "model_provider",
            Self::CheckpointUnavailable(_) => "checkpoint_unavailable",
            Self::CheckpointConflict { .. } => "checkpoint_conflict",
            Self::NoPendingConfirmation(_) => "no_pending_confirmation",
            Self::ConfirmationPending { .. } => "confirmation_pending",
            Self::StaleConfirmation { .. } => "stale_confirmation",
            Self::ConfirmationExpired { .. } => "confirmation_expired",
            Self::StepLimitExceeded { .. } => "step_limit_exceeded",
            Self::Domain(_) => "domain",
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("integration failure: {0}")]
    Integration(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::Conflict { .. } => {
                "The conversation is waiting on another step. Resolve it and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. }
            | Self::Internal { correlation_id, .. } => correlation_id,
        }
    }
}

impl ApplicationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::Conflict { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<ApplicationError> for InterfaceError {
    fn from(value: ApplicationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            ApplicationError::Domain(_) => Self::BadRequest {
                message: "domain validation failed".to_owned(),
                correlation_id: unassigned(),
            },
            ApplicationError::Workflow(error) => match error {
                WorkflowError::UnknownDecisionType(_)
                | WorkflowError::InvalidDecisionPayload { .. }
                | WorkflowError::NoPendingConfirmation(_)
                | WorkflowError::StaleConfirmation { .. }
                | WorkflowError::ConfirmationExpired { .. }
                | WorkflowError::Domain(_) => {
                    Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
                }
                WorkflowError::ConfirmationPending { .. }
                | WorkflowError::CheckpointConflict { .. } => {
                    Self::Conflict { message: error.to_string(), correlation_id: unassigned() }
                }
                WorkflowError::ModelProvider(_) | WorkflowError::CheckpointUnavailable(_) => {
                    Self::ServiceUnavailable {
                        message: error.to_string(),
                        correlation_id: unassigned(),
                    }
                }
                WorkflowError::UnknownAction(_) | WorkflowError::StepLimitExceeded { .. } => {
                    Self::Internal { message: error.to_string(), correlation_id: unassigned() }
                }
            },
            ApplicationError::Persistence(message) | ApplicationError::Integration(message) => {
                Self::ServiceUnavailable { message, correlation_id: unassigned() }
            }
            ApplicationError::Configuration(message) => {
                Self::Internal { message, correlation_id: unassigned() }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ApplicationError, DomainError, InterfaceError, WorkflowError};

    #[test]
    fn domain_error_maps_to_bad_request_interface_error() {
        let interface = ApplicationError::from(DomainError::InvariantViolation(
            "two pending confirmations".to_owned(),
        ))
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn unknown_decision_type_is_a_bad_request_with_detail() {
        let interface = ApplicationError::from(WorkflowError::UnknownDecisionType(
            "maybe".to_owned(),
        ))
        .into_interface("req-2");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest { ref message, .. } if message.contains("maybe")
        ));
        assert_eq!(
            interface.user_message(),
            "The request could not be processed. Check inputs and try again."
        );
    }

    #[test]
    fn pending_confirmation_maps_to_conflict() {
        let interface = ApplicationError::from(WorkflowError::ConfirmationPending {
            session_key: "s-1".to_owned(),
            action_name: "book_room".to_owned(),
        })
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Conflict { .. }));
        assert_eq!(interface.correlation_id(), "req-3");
    }

    #[test]
    fn provider_and_store_failures_map_to_service_unavailable() {
        for error in [
            WorkflowError::ModelProvider("timeout".to_owned()),
            WorkflowError::CheckpointUnavailable("database lock timeout".to_owned()),
        ] {
            let interface = ApplicationError::from(error).into_interface("req-4");
            assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
            assert_eq!(
                interface.user_message(),
                "The service is temporarily unavailable. Please retry shortly."
            );
        }
    }

    #[test]
    fn unknown_action_maps_to_internal() {
        let interface = ApplicationError::from(WorkflowError::UnknownAction("drop_table".to_owned()))
            .into_interface("req-5");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn error_classes_are_stable() {
        assert_eq!(WorkflowError::UnknownAction("x".to_owned()).error_class(), "unknown_action");
        assert_eq!(
            WorkflowError::StaleConfirmation { supplied: "t".to_owned() }.error_class(),
            "stale_confirmation"
        );
    }
}

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::confirmation::PendingConfirmation;
use crate::domain::session::{SessionIdentity, SessionKey};
use crate::errors::DomainError;

/// Correlation id tying an action request to its result.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ActionCallId(pub String);

impl ActionCallId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActionCall {
    pub id: ActionCallId,
    pub name: String,
    pub arguments: Value,
}

impl ActionCall {
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self { id: ActionCallId(id.into()), name: name.into(), arguments }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionOutcome {
    Completed,
    Failed,
    Cancelled,
    Feedback,
    Expired,
}

impl ActionOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Feedback => "feedback",
            Self::Expired => "expired",
        }
    }
}

/// One entry of the conversation history.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum Turn {
    User {
        content: String,
    },
    Assistant {
        content: String,
    },
    ActionRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        calls: Vec<ActionCall>,
    },
    ActionResult {
        call_id: ActionCallId,
        action_name: String,
        outcome: ActionOutcome,
        content: String,
    },
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self::User { content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::Assistant { content: content.into() }
    }

    pub fn action_result(
        call: &ActionCall,
        outcome: ActionOutcome,
        content: impl Into<String>,
    ) -> Self {
        Self::ActionResult {
            call_id: call.id.clone(),
            action_name: call.name.clone(),
            outcome,
            content: content.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::User { .. } => "user",
            Self::Assistant { .. } => "assistant",
            Self::ActionRequest { .. } => "action_request",
            Self::ActionResult { .. } => "action_result",
        }
    }

    pub fn requested_calls(&self) -> &[ActionCall] {
        match self {
            Self::ActionRequest { calls, .. } => calls,
            _ => &[],
        }
    }
}

/// The unit of persistence: everything a step reads and writes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ConversationState {
    pub session_key: SessionKey,
    #[serde(default)]
    pub identity: Option<SessionIdentity>,
    #[serde(default)]
    pub messages: Vec<Turn>,
    #[serde(default)]
    pub pending: Option<PendingConfirmation>,
    /// Sensitive call whose confirmation was consumed but whose result is not yet recorded.
    #[serde(default)]
    pub in_flight: Option<ActionCallId>,
}

impl ConversationState {
    pub fn new(session_key: SessionKey) -> Self {
        Self { session_key, identity: None, messages: Vec::new(), pending: None, in_flight: None }
    }

    pub fn append(&mut self, turn: Turn) {
        self.messages.push(turn);
    }

    pub fn is_idle(&self) -> bool {
        self.pending.is_none() && self.in_flight.is_none() && self.unresolved_calls().is_empty()
    }

    /// Index of the action-request batch still being worked on, if any.
    ///
    /// A batch is open while every turn after it is an action result.
    pub fn open_batch_index(&self) -> Option<usize> {
        let index = self
            .messages
            .iter()
            .rposition(|turn| !matches!(turn, Turn::ActionResult { .. }))?;
        matches!(self.messages[index], Turn::ActionRequest { .. }).then_some(index)
    }

    /// Calls of the open batch that have no result yet, in emission order.
    pub fn unresolved_calls(&self) -> Vec<&ActionCall> {
        let Some(index) = self.open_batch_index() else {
            return Vec::new();
        };

        let results = &self.messages[index + 1..];
        self.messages[index]
            .requested_calls()
            .iter()
            .filter(|call| {
                !results.iter().any(|turn| {
                    matches!(turn, Turn::ActionResult { call_id, .. } if call_id == &call.id)
                })
            })
            .collect()
    }

    pub fn find_open_call(&self, call_id: &ActionCallId) -> Option<&ActionCall> {
        let index = self.open_batch_index()?;
        self.messages[index].requested_calls().iter().find(|call| &call.id == call_id)
    }

    pub fn has_result_for(&self, call_id: &ActionCallId) -> bool {
        self.messages.iter().any(
            |turn| matches!(turn, Turn::ActionResult { call_id: id, .. } if id == call_id),
        )
    }

    /// Rewrites one requested call inside the open batch. The only in-place
    /// mutation the history allows.
    pub fn replace_call_arguments(
        &mut self,
        call_id: &ActionCallId,
        arguments: Value,
    ) -> Result<(), DomainError> {
        let index = self
            .open_batch_index()
            .ok_or_else(|| DomainError::UnknownCall { call_id: call_id.0.clone() })?;

        match &mut self.messages[index] {
            Turn::ActionRequest { calls, .. } => {
                let call = calls
                    .iter_mut()
                    .find(|call| &call.id == call_id)
                    .ok_or_else(|| DomainError::UnknownCall { call_id: call_id.0.clone() })?;
                call.arguments = arguments;
                Ok(())
            }
            _ => Err(DomainError::UnknownCall { call_id: call_id.0.clone() }),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::{ActionCall, ActionCallId, ActionOutcome, ConversationState, Turn};
    use crate::domain::session::SessionKey;
    use crate::errors::DomainError;

    fn state_with_batch() -> ConversationState {
        let mut state = ConversationState::new(SessionKey("s-1".to_string()));
        state.append(Turn::user("book me a room"));
        state.append(Turn::ActionRequest {
            content: None,
            calls: vec![
                ActionCall::new("call_1", "book_room", json!({"room_id": 12})),
                ActionCall::new("call_2", "lookup_user_bookings", json!({"user_id": 7})),
            ],
        });
        state
    }

    #[test]
    fn unresolved_calls_track_batch_progress() {
        let mut state = state_with_batch();
        assert_eq!(state.unresolved_calls().len(), 2);
        assert!(!state.is_idle());

        let first = state.unresolved_calls()[0].clone();
        state.append(Turn::action_result(&first, ActionOutcome::Completed, "ok"));

        let remaining = state.unresolved_calls();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].id, ActionCallId("call_2".to_string()));
    }

    #[test]
    fn closed_batch_has_no_unresolved_calls() {
        let mut state = state_with_batch();
        state.append(Turn::assistant("done"));

        assert!(state.open_batch_index().is_none());
        assert!(state.unresolved_calls().is_empty());
        assert!(state.is_idle());
    }

    #[test]
    fn replace_call_arguments_only_touches_target_call() {
        let mut state = state_with_batch();
        state
            .replace_call_arguments(&ActionCallId("call_1".to_string()), json!({"room_id": 7}))
            .expect("edit open call");

        let calls = state.messages[1].requested_calls();
        assert_eq!(calls[0].arguments, json!({"room_id": 7}));
        assert_eq!(calls[1].arguments, json!({"user_id": 7}));
        assert_eq!(state.messages.len(), 2);
    }

    #[test]
    fn replace_call_arguments_rejects_unknown_call() {
        let mut state = state_with_batch();
        let error = state
            .replace_call_arguments(&ActionCallId("call_9".to_string()), json!({}))
            .expect_err("unknown call");
        assert!(matches!(error, DomainError::UnknownCall { .. }));
    }

    #[test]
    fn turns_serialize_with_role_tag() {
        let turn = Turn::action_result(
            &ActionCall::new("call_1", "book_room", json!({})),
            ActionOutcome::Cancelled,
            "user cancelled the book_room action.",
        );
        let value = serde_json::to_value(&turn).expect("serialize turn");

        assert_eq!(value["role"], "action_result");
        assert_eq!(value["call_id"], "call_1");
        assert_eq!(value["outcome"], "cancelled");
    }
}

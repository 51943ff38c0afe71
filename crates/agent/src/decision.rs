use std::collections::HashSet;
use std::sync::Arc;

use uuid::Uuid;

use huddle_core::domain::conversation::{ActionCall, ActionCallId, ConversationState, Turn};
use huddle_core::errors::{DomainError, WorkflowError};

use crate::booking_tools::Clock;
use crate::llm::{Completion, CompletionRequest, LlmClient};
use crate::prompt::system_directive;
use crate::tools::ActionRegistry;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DecisionOutcome {
    Reply(String),
    /// Number of calls in the action-request turn that was appended.
    Actions(usize),
}

/// Asks the model what to do next. Never runs actions, so a failed call can
/// be retried without side effects.
pub struct DecisionStep {
    llm: Arc<dyn LlmClient>,
    registry: Arc<ActionRegistry>,
    clock: Clock,
}

impl DecisionStep {
    pub fn new(llm: Arc<dyn LlmClient>, registry: Arc<ActionRegistry>, clock: Clock) -> Self {
        Self { llm, registry, clock }
    }

    /// Appends the model's turn to `state`. On error `state` is untouched.
    pub async fn run(&self, state: &mut ConversationState) -> Result<DecisionOutcome, WorkflowError> {
        let identity = state.identity.as_ref().ok_or_else(|| {
            DomainError::InvariantViolation("decision step requires a session identity".to_string())
        })?;

        let request = CompletionRequest {
            system: system_directive(identity, (self.clock)()),
            messages: state.messages.clone(),
            actions: self.registry.catalogue(),
        };

        let completion = self
            .llm
            .complete(request)
            .await
            .map_err(|error| WorkflowError::ModelProvider(error.to_string()))?;

        match completion {
            Completion::Actions { content, calls } if !calls.is_empty() => {
                if let Some(unknown) = calls.iter().find(|call| !self.registry.contains(&call.name)) {
                    tracing::warn!(
                        event_name = "workflow.decision.unknown_action",
                        session_key = %state.session_key,
                        action = %unknown.name,
                        "model requested an action outside the registry"
                    );
                    return Err(WorkflowError::UnknownAction(unknown.name.clone()));
                }

                let mut taken: HashSet<String> = state
                    .messages
                    .iter()
                    .flat_map(Turn::requested_calls)
                    .map(|call| call.id.as_str().to_string())
                    .collect();
                let calls: Vec<ActionCall> =
                    calls.into_iter().map(|call| assign_call_id(call, &mut taken)).collect();
                let count = calls.len();
                tracing::info!(
                    event_name = "workflow.decision.actions_requested",
                    session_key = %state.session_key,
                    actions = %calls.iter().map(|call| call.name.as_str()).collect::<Vec<_>>().join(","),
                    "model requested actions"
                );
                state.append(Turn::ActionRequest { content, calls });
                Ok(DecisionOutcome::Actions(count))
            }
            Completion::Actions { content, .. } => {
                let text = content.unwrap_or_default();
                state.append(Turn::assistant(text.clone()));
                Ok(DecisionOutcome::Reply(text))
            }
            Completion::Reply { content } => {
                tracing::info!(
                    event_name = "workflow.decision.reply",
                    session_key = %state.session_key,
                    "model produced a reply"
                );
                state.append(Turn::assistant(content.clone()));
                Ok(DecisionOutcome::Reply(content))
            }
        }
    }
}

/// Results are matched to calls by id, so ids must be unique across the whole
/// conversation. Missing or repeated provider ids are replaced.
fn assign_call_id(mut call: ActionCall, taken: &mut HashSet<String>) -> ActionCall {
    let id = call.id.as_str().trim();
    if id.is_empty() || taken.contains(id) {
        let fresh = ActionCallId(format!("call_{}", Uuid::new_v4().simple()));
        if !id.is_empty() {
            tracing::debug!(
                event_name = "workflow.decision.call_id_reassigned",
                provider_id = %id,
                call_id = %fresh.as_str(),
                action = %call.name,
                "provider reused a call id"
            );
        }
        call.id = fresh;
    }
    taken.insert(call.id.as_str().to_string());
    call
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use huddle_core::domain::booking::parse_meeting_time;
    use huddle_core::domain::conversation::{ActionCall, ConversationState, Turn};
    use huddle_core::domain::session::{SessionIdentity, SessionKey};
    use huddle_core::errors::WorkflowError;
    use huddle_db::{InMemoryBookingStore, RoomSeedDataset};

    use super::{DecisionOutcome, DecisionStep};
    use crate::booking_tools::{booking_registry, Clock};
    use crate::llm::{Completion, LlmError, ScriptedLlmClient};

    fn clock() -> Clock {
        let now = parse_meeting_time("2026-10-16 09:00:00").expect("time");
        Arc::new(move || now)
    }

    fn step(llm: Arc<ScriptedLlmClient>) -> DecisionStep {
        let store = Arc::new(InMemoryBookingStore::with_rooms(RoomSeedDataset::rooms()));
        let registry = Arc::new(booking_registry(store, clock()).expect("registry"));
        DecisionStep::new(llm, registry, clock())
    }

    fn state() -> ConversationState {
        let mut state = ConversationState::new(SessionKey("s-1".to_string()));
        state.identity = Some(SessionIdentity::new(42, "Lin"));
        state.append(Turn::user("what did I book?"));
        state
    }

    #[tokio::test]
    async fn actions_are_appended_with_assigned_ids() {
        let llm = Arc::new(ScriptedLlmClient::new([Completion::Actions {
            content: None,
            calls: vec![ActionCall::new("", "lookup_user_bookings", json!({"user_id": 42}))],
        }]));
        let mut state = state();

        let outcome = step(llm.clone()).run(&mut state).await.expect("decision");

        assert_eq!(outcome, DecisionOutcome::Actions(1));
        let calls = state.messages[1].requested_calls();
        assert!(calls[0].id.as_str().starts_with("call_"));
        let request = &llm.requests()[0];
        assert!(request.system.contains("user id: `42`"));
        assert_eq!(request.actions.len(), 5);
        assert_eq!(request.messages.len(), 1);
    }

    #[tokio::test]
    async fn repeated_provider_ids_are_replaced() {
        let llm = Arc::new(ScriptedLlmClient::new([Completion::Actions {
            content: None,
            calls: vec![
                ActionCall::new("call_0", "lookup_user_bookings", json!({"user_id": 42})),
                ActionCall::new("call_0", "lookup_user_bookings", json!({"user_id": 42})),
                ActionCall::new("call_earlier", "lookup_user_bookings", json!({"user_id": 42})),
            ],
        }]));
        let mut state = state();
        state.append(Turn::ActionRequest {
            content: None,
            calls: vec![ActionCall::new("call_earlier", "lookup_user_bookings", json!({"user_id": 42}))],
        });

        step(llm).run(&mut state).await.expect("decision");

        let ids: Vec<&str> =
            state.messages.iter().flat_map(Turn::requested_calls).map(|call| call.id.as_str()).collect();
        assert_eq!(ids.len(), 4);
        assert_eq!(ids[1], "call_0");
        let mut unique = ids.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), 4);
    }

    #[tokio::test]
    async fn unknown_action_fails_without_touching_state() {
        let llm = Arc::new(ScriptedLlmClient::new([Completion::Actions {
            content: None,
            calls: vec![
                ActionCall::new("call_1", "lookup_user_bookings", json!({"user_id": 42})),
                ActionCall::new("call_2", "drop_all_rooms", json!({})),
            ],
        }]));
        let mut state = state();
        let before = state.clone();

        let error = step(llm).run(&mut state).await.expect_err("unknown action");

        assert_eq!(error, WorkflowError::UnknownAction("drop_all_rooms".to_string()));
        assert_eq!(state, before);
    }

    #[tokio::test]
    async fn provider_failure_surfaces_as_model_provider_error() {
        let llm = Arc::new(ScriptedLlmClient::default());
        llm.push_failure(LlmError::Transport("connection reset".to_string()));
        let mut state = state();

        let error = step(llm).run(&mut state).await.expect_err("provider failure");

        assert!(matches!(error, WorkflowError::ModelProvider(ref message) if message.contains("connection reset")));
        assert_eq!(state.messages.len(), 1);
    }

    #[tokio::test]
    async fn reply_is_appended_as_assistant_turn() {
        let llm = Arc::new(ScriptedLlmClient::new([Completion::Reply {
            content: "You have no bookings.".to_string(),
        }]));
        let mut state = state();

        let outcome = step(llm).run(&mut state).await.expect("decision");

        assert_eq!(outcome, DecisionOutcome::Reply("You have no bookings.".to_string()));
        assert_eq!(state.messages.last(), Some(&Turn::assistant("You have no bookings.")));
    }

    #[tokio::test]
    async fn missing_identity_is_an_invariant_violation() {
        let llm = Arc::new(ScriptedLlmClient::default());
        let mut state = state();
        state.identity = None;

        let error = step(llm.clone()).run(&mut state).await.expect_err("no identity");
        assert!(matches!(error, WorkflowError::Domain(_)));
        assert_eq!(llm.invocations(), 0);
    }
}

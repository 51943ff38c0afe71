//! HTTP surface for conversational turns.
//!
//! One route starts or continues a turn for a session key supplied by the
//! caller; another exposes the committed checkpoint for inspection. Workflow
//! errors are mapped through [`InterfaceError`] so callers only ever see a
//! user-safe message plus a correlation id that can be found in the logs.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use huddle_agent::runtime::{AgentRuntime, TurnInput, TurnResult};
use huddle_core::domain::confirmation::DecisionRecord;
use huddle_core::domain::conversation::ConversationState;
use huddle_core::domain::session::{SessionIdentity, SessionKey};
use huddle_core::errors::{ApplicationError, InterfaceError};

#[derive(Clone)]
pub struct SessionState {
    runtime: Arc<AgentRuntime>,
}

pub fn router(runtime: Arc<AgentRuntime>) -> Router {
    Router::new()
        .route("/sessions/{session_key}/turns", post(post_turn))
        .route("/sessions/{session_key}", get(get_session))
        .with_state(SessionState { runtime })
}

/// Body of `POST /sessions/{session_key}/turns`. Exactly one of `message`
/// and `decision` must be present. A decision must carry the token of the
/// confirmation it answers, so a replayed decision can never resolve a newer
/// confirmation.
#[derive(Clone, Debug, Deserialize)]
pub struct TurnRequest {
    pub user_id: i64,
    pub display_name: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub decision: Option<DecisionRecord>,
}

impl TurnRequest {
    fn into_parts(self) -> Result<(SessionIdentity, TurnInput), String> {
        let identity = SessionIdentity::new(self.user_id, self.display_name);
        let input = match (self.message, self.decision) {
            (Some(message), None) if !message.trim().is_empty() => TurnInput::Message(message),
            (Some(_), None) => return Err("`message` must not be empty".to_string()),
            (None, Some(decision)) if decision.token.is_some() => TurnInput::Decision(decision),
            (None, Some(_)) => {
                return Err("`decision.token` is required; use the token from the confirmation request"
                    .to_string())
            }
            (Some(_), Some(_)) => {
                return Err("send either `message` or `decision`, not both".to_string())
            }
            (None, None) => return Err("one of `message` or `decision` is required".to_string()),
        };
        Ok((identity, input))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct SessionQuery {
    #[serde(default)]
    pub history: bool,
}

#[derive(Debug, Serialize)]
pub struct SessionView {
    pub session_key: SessionKey,
    pub version: u64,
    pub committed_at: DateTime<Utc>,
    pub state: ConversationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub history: Option<Vec<CheckpointSummary>>,
}

#[derive(Debug, Serialize)]
pub struct CheckpointSummary {
    pub version: u64,
    pub committed_at: DateTime<Utc>,
    pub turns: usize,
    pub pending_action: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: &'static str,
    pub detail: String,
    pub correlation_id: String,
}

/// Error half of every handler: a status code with a JSON [`ErrorBody`].
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

impl ApiError {
    fn bad_request(detail: impl Into<String>, correlation_id: &str) -> Self {
        Self::from_interface(InterfaceError::BadRequest {
            message: detail.into(),
            correlation_id: correlation_id.to_string(),
        })
    }

    fn not_found(session_key: &SessionKey, correlation_id: &str) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            body: ErrorBody {
                error: "not_found",
                message: "No conversation exists for this session.",
                detail: format!("session `{session_key}` has no checkpoint"),
                correlation_id: correlation_id.to_string(),
            },
        }
    }

    fn from_application(error: impl Into<ApplicationError>, correlation_id: &str) -> Self {
        Self::from_interface(error.into().into_interface(correlation_id))
    }

    fn from_interface(error: InterfaceError) -> Self {
        let (status, class, detail) = match &error {
            InterfaceError::BadRequest { message, .. } => {
                (StatusCode::BAD_REQUEST, "bad_request", message.clone())
            }
            InterfaceError::Conflict { message, .. } => {
                (StatusCode::CONFLICT, "conflict", message.clone())
            }
            InterfaceError::ServiceUnavailable { message, .. } => {
                (StatusCode::SERVICE_UNAVAILABLE, "service_unavailable", message.clone())
            }
            InterfaceError::Internal { message, .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", message.clone())
            }
        };

        Self {
            status,
            body: ErrorBody {
                error: class,
                message: error.user_message(),
                detail,
                correlation_id: error.correlation_id().to_string(),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

async fn post_turn(
    State(state): State<SessionState>,
    Path(session_key): Path<String>,
    body: Result<Json<TurnRequest>, JsonRejection>,
) -> Result<Json<TurnResult>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let key = SessionKey::parse(session_key)
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;
    let Json(request) =
        body.map_err(|rejection| ApiError::bad_request(rejection.body_text(), &correlation_id))?;
    let (identity, input) =
        request.into_parts().map_err(|detail| ApiError::bad_request(detail, &correlation_id))?;

    tracing::info!(
        event_name = "server.turn.received",
        session_key = %key,
        correlation_id = %correlation_id,
        input = input.kind(),
        "turn request received"
    );

    match state.runtime.handle_turn(&key, identity, input).await {
        Ok(result) => Ok(Json(result)),
        Err(error) => {
            tracing::warn!(
                event_name = "server.turn.rejected",
                session_key = %key,
                correlation_id = %correlation_id,
                error_class = error.error_class(),
                "turn request failed"
            );
            Err(ApiError::from_application(error, &correlation_id))
        }
    }
}

async fn get_session(
    State(state): State<SessionState>,
    Path(session_key): Path<String>,
    Query(query): Query<SessionQuery>,
) -> Result<Json<SessionView>, ApiError> {
    let correlation_id = Uuid::new_v4().to_string();
    let key = SessionKey::parse(session_key)
        .map_err(|error| ApiError::from_application(error, &correlation_id))?;

    let record = state
        .runtime
        .session(&key)
        .await
        .map_err(|error| ApiError::from_application(error, &correlation_id))?
        .ok_or_else(|| ApiError::not_found(&key, &correlation_id))?;

    let history = if query.history {
        let records = state
            .runtime
            .history(&key)
            .await
            .map_err(|error| ApiError::from_application(error, &correlation_id))?;
        Some(
            records
                .into_iter()
                .map(|record| CheckpointSummary {
                    version: record.version,
                    committed_at: record.created_at,
                    turns: record.state.messages.len(),
                    pending_action: record.state.pending.map(|pending| pending.action_name),
                })
                .collect(),
        )
    } else {
        None
    };

    Ok(Json(SessionView {
        session_key: record.session_key,
        version: record.version,
        committed_at: record.created_at,
        state: record.state,
        history,
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
        Router,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use huddle_agent::llm::{Completion, LlmError, ScriptedLlmClient};
    use huddle_agent::runtime::AgentRuntime;
    use huddle_agent::{booking_registry, Clock};
    use huddle_core::domain::booking::parse_meeting_time;
    use huddle_core::domain::conversation::ActionCall;
    use huddle_db::{InMemoryBookingStore, InMemoryCheckpointStore, RoomSeedDataset};

    use super::router;

    fn app(llm: Arc<ScriptedLlmClient>) -> Router {
        let now = parse_meeting_time("2026-10-16 09:00:00").expect("clock");
        let clock: Clock = Arc::new(move || now);
        let bookings = Arc::new(InMemoryBookingStore::with_rooms(RoomSeedDataset::rooms()));
        let runtime = AgentRuntime::builder()
            .llm(llm)
            .registry(Arc::new(booking_registry(bookings, clock.clone()).expect("registry")))
            .checkpoint_store(Arc::new(InMemoryCheckpointStore::default()))
            .clock(clock)
            .build()
            .expect("runtime");
        router(Arc::new(runtime))
    }

    fn booking_completion() -> Completion {
        Completion::Actions {
            content: Some("I will book Lyra for you.".to_string()),
            calls: vec![ActionCall::new(
                "call_book",
                "book_room",
                json!({
                    "room_id": 2,
                    "user_id": 42,
                    "start_time": "2026-10-17 10:00:00",
                    "end_time": "2026-10-17 11:00:00",
                    "title": "design review"
                }),
            )],
        }
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|body| Body::from(body.to_string())).unwrap_or_else(Body::empty))
            .expect("request");
        let response = app.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).expect("json body")
        };
        (status, value)
    }

    fn message(text: &str) -> Value {
        json!({"user_id": 42, "display_name": "Lin", "message": text})
    }

    #[tokio::test]
    async fn booking_round_trip_suspends_then_completes() {
        let llm = Arc::new(ScriptedLlmClient::new([
            booking_completion(),
            Completion::Reply { content: "Lyra is booked.".to_string() },
        ]));
        let app = app(llm);

        let (status, body) =
            send(&app, "POST", "/sessions/tab-1/turns", Some(message("book Lyra tomorrow at 10"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "confirmation_required");
        assert_eq!(body["action_name"], "book_room");
        let token = body["token"].as_str().expect("token").to_string();

        let decision = json!({
            "user_id": 42,
            "display_name": "Lin",
            "decision": {"kind": "accept", "token": token}
        });
        let (status, body) = send(&app, "POST", "/sessions/tab-1/turns", Some(decision)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"type": "final_reply", "text": "Lyra is booked."}));

        let (status, body) = send(&app, "GET", "/sessions/tab-1?history=true", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["state"]["messages"].as_array().expect("messages").len(), 4);
        assert!(body["state"]["pending"].is_null());
        assert_eq!(body["history"].as_array().expect("history").len(), body["version"].as_u64().expect("version") as usize);
    }

    #[tokio::test]
    async fn message_while_confirmation_pending_is_a_conflict() {
        let app = app(Arc::new(ScriptedLlmClient::new([booking_completion()])));

        send(&app, "POST", "/sessions/tab-1/turns", Some(message("book Lyra"))).await;
        let (status, body) =
            send(&app, "POST", "/sessions/tab-1/turns", Some(message("and a coffee"))).await;

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"], "conflict");
        assert!(!body["correlation_id"].as_str().expect("correlation id").is_empty());
    }

    #[tokio::test]
    async fn provider_outage_is_service_unavailable() {
        let llm = Arc::new(ScriptedLlmClient::default());
        llm.push_failure(LlmError::Transport("connection refused".to_string()));
        let app = app(llm);

        let (status, body) = send(&app, "POST", "/sessions/tab-1/turns", Some(message("hello"))).await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["message"], "The service is temporarily unavailable. Please retry shortly.");
    }

    #[tokio::test]
    async fn malformed_requests_are_bad_requests() {
        let app = app(Arc::new(ScriptedLlmClient::default()));

        let both = json!({
            "user_id": 42,
            "display_name": "Lin",
            "message": "hi",
            "decision": {"kind": "accept"}
        });
        let (status, _) = send(&app, "POST", "/sessions/tab-1/turns", Some(both)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            send(&app, "POST", "/sessions/bad%20key/turns", Some(message("hi"))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) =
            send(&app, "POST", "/sessions/tab-1/turns", Some(json!({"message": "hi"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let decision = json!({
            "user_id": 42,
            "display_name": "Lin",
            "decision": {"kind": "accept", "token": "never-issued"}
        });
        let (status, body) = send(&app, "POST", "/sessions/tab-1/turns", Some(decision)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().expect("detail").contains("tab-1"));
    }

    #[tokio::test]
    async fn decision_without_token_is_refused_before_reaching_the_session() {
        let app = app(Arc::new(ScriptedLlmClient::new([
            booking_completion(),
            Completion::Reply { content: "Lyra is booked.".to_string() },
        ])));
        send(&app, "POST", "/sessions/tab-1/turns", Some(message("book Lyra"))).await;

        let tokenless = json!({"user_id": 42, "display_name": "Lin", "decision": {"kind": "accept"}});
        let (status, body) = send(&app, "POST", "/sessions/tab-1/turns", Some(tokenless)).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["detail"].as_str().expect("detail").contains("`decision.token` is required"));
        let (_, session) = send(&app, "GET", "/sessions/tab-1", None).await;
        assert_eq!(session["state"]["pending"]["action_name"], "book_room");
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let app = app(Arc::new(ScriptedLlmClient::default()));

        let (status, body) = send(&app, "GET", "/sessions/never-seen", None).await;

        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "not_found");
    }
}

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::domain::conversation::{ActionCall, ActionCallId};
use crate::errors::WorkflowError;

/// Single-use token identifying one suspension.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConfirmationToken(pub String);

impl ConfirmationToken {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for ConfirmationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionKind {
    Accept,
    Edit,
    Reject,
    Feedback,
}

impl DecisionKind {
    pub const ALL: [DecisionKind; 4] = [Self::Accept, Self::Edit, Self::Reject, Self::Feedback];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Accept => "accept",
            Self::Edit => "edit",
            Self::Reject => "reject",
            Self::Feedback => "feedback",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "accept" => Some(Self::Accept),
            "edit" => Some(Self::Edit),
            "reject" | "ignore" => Some(Self::Reject),
            "feedback" | "response" => Some(Self::Feedback),
            _ => None,
        }
    }
}

/// A sensitive action waiting on a human decision. Lives inside the
/// conversation state so it survives restarts.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub token: ConfirmationToken,
    pub call_id: ActionCallId,
    pub action_name: String,
    pub arguments: Value,
    pub allowed_responses: Vec<DecisionKind>,
    pub description: String,
    pub requested_at: DateTime<Utc>,
}

impl PendingConfirmation {
    pub fn for_call(call: &ActionCall, requested_at: DateTime<Utc>) -> Self {
        Self {
            token: ConfirmationToken::generate(),
            call_id: call.id.clone(),
            action_name: call.name.clone(),
            arguments: call.arguments.clone(),
            allowed_responses: DecisionKind::ALL.to_vec(),
            description: describe_call(call),
            requested_at,
        }
    }

    pub fn allows(&self, kind: DecisionKind) -> bool {
        self.allowed_responses.contains(&kind)
    }

    pub fn is_expired(&self, ttl: Option<Duration>, now: DateTime<Utc>) -> bool {
        match ttl {
            Some(ttl) => now - self.requested_at >= ttl,
            None => false,
        }
    }
}

fn describe_call(call: &ActionCall) -> String {
    format!(
        "Action: {}\nArguments: {}\n\nPlease confirm whether this operation should run.",
        call.name, call.arguments
    )
}

/// Typed human decision, produced from a [`DecisionRecord`].
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Accept,
    Edit { arguments: Value },
    Reject,
    Feedback { text: String },
}

impl Decision {
    pub fn kind(&self) -> DecisionKind {
        match self {
            Self::Accept => DecisionKind::Accept,
            Self::Edit { .. } => DecisionKind::Edit,
            Self::Reject => DecisionKind::Reject,
            Self::Feedback { .. } => DecisionKind::Feedback,
        }
    }
}

/// Wire form of a decision as supplied by the calling surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DecisionRecord {
    #[serde(alias = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<ConfirmationToken>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl DecisionRecord {
    pub fn new(kind: impl Into<String>) -> Self {
        Self { kind: kind.into(), token: None, payload: None }
    }

    pub fn accept() -> Self {
        Self::new("accept")
    }

    pub fn reject() -> Self {
        Self::new("reject")
    }

    pub fn edit(arguments: Value) -> Self {
        Self::new("edit").with_payload(serde_json::json!({ "arguments": arguments }))
    }

    pub fn feedback(text: impl Into<String>) -> Self {
        Self::new("feedback").with_payload(Value::String(text.into()))
    }

    pub fn with_token(mut self, token: ConfirmationToken) -> Self {
        self.token = Some(token);
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn parse(&self) -> Result<Decision, WorkflowError> {
        let kind = DecisionKind::parse(&self.kind)
            .ok_or_else(|| WorkflowError::UnknownDecisionType(self.kind.clone()))?;

        match kind {
            DecisionKind::Accept => Ok(Decision::Accept),
            DecisionKind::Reject => Ok(Decision::Reject),
            DecisionKind::Edit => {
                let arguments = self
                    .payload
                    .as_ref()
                    .and_then(|payload| payload.get("arguments").or_else(|| payload.get("args")))
                    .cloned()
                    .ok_or_else(|| invalid_payload(kind, "edit requires `payload.arguments`"))?;
                if !arguments.is_object() {
                    return Err(invalid_payload(kind, "`payload.arguments` must be a JSON object"));
                }
                Ok(Decision::Edit { arguments })
            }
            DecisionKind::Feedback => {
                let text = match &self.payload {
                    Some(Value::String(text)) => Some(text.clone()),
                    Some(payload) => {
                        payload.get("text").and_then(Value::as_str).map(str::to_string)
                    }
                    None => None,
                };
                let text = text
                    .filter(|text| !text.trim().is_empty())
                    .ok_or_else(|| invalid_payload(kind, "feedback requires non-empty text"))?;
                Ok(Decision::Feedback { text })
            }
        }
    }
}

fn invalid_payload(kind: DecisionKind, reason: &str) -> WorkflowError {
    WorkflowError::InvalidDecisionPayload { kind: kind.as_str().to_string(), reason: reason.to_string() }
}

pub fn cancellation_text(action_name: &str) -> String {
    format!("user cancelled the {action_name} action.")
}

pub fn feedback_text(feedback: &str) -> String {
    format!("user feedback: {feedback}. Adjust the action according to this feedback.")
}

pub fn expiry_text(action_name: &str) -> String {
    format!("confirmation for the {action_name} action expired before a decision was made.")
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::conversation::ConversationState;
use crate::domain::session::SessionKey;
use crate::errors::WorkflowError;

/// One committed snapshot of a conversation. Versions are dense per session,
/// starting at 1 in write order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CheckpointRecord {
    pub session_key: SessionKey,
    pub version: u64,
    pub state: ConversationState,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("checkpoint for `{session_key}` is at version {actual}, expected {expected}")]
    Conflict { session_key: String, expected: u64, actual: u64 },
    #[error("checkpoint store unavailable: {0}")]
    Unavailable(String),
    #[error("checkpoint could not be decoded: {0}")]
    Decode(String),
}

impl From<CheckpointError> for WorkflowError {
    fn from(error: CheckpointError) -> Self {
        match error {
            CheckpointError::Conflict { session_key, expected, .. } => {
                WorkflowError::CheckpointConflict { session_key, expected_version: expected }
            }
            other => WorkflowError::CheckpointUnavailable(other.to_string()),
        }
    }
}

#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Latest committed snapshot, or `None` for a session never written.
    async fn load(&self, key: &SessionKey) -> Result<Option<CheckpointRecord>, CheckpointError>;

    /// Appends a new snapshot. `expected_version` must equal the latest
    /// version (0 for a new session), otherwise nothing is written.
    async fn save(
        &self,
        key: &SessionKey,
        state: &ConversationState,
        expected_version: u64,
    ) -> Result<CheckpointRecord, CheckpointError>;

    /// Every snapshot for the session, oldest first.
    async fn history(&self, key: &SessionKey) -> Result<Vec<CheckpointRecord>, CheckpointError>;
}

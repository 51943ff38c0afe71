use std::sync::Arc;

use huddle_core::checkpoint::CheckpointStore;
use huddle_core::domain::conversation::ConversationState;
use huddle_core::domain::session::SessionKey;
use huddle_core::errors::WorkflowError;

/// A session's checkpoint as seen by one turn: the store plus the version the
/// turn last read or wrote. Every commit is conditional on that version.
pub struct SessionCheckpoint {
    store: Arc<dyn CheckpointStore>,
    key: SessionKey,
    version: u64,
}

impl SessionCheckpoint {
    /// Loads the latest state, or a fresh one at version 0 for an unknown key.
    pub async fn open(
        store: Arc<dyn CheckpointStore>,
        key: &SessionKey,
    ) -> Result<(Self, ConversationState), WorkflowError> {
        let (version, state) = match store.load(key).await? {
            Some(record) => (record.version, record.state),
            None => (0, ConversationState::new(key.clone())),
        };

        Ok((Self { store, key: key.clone(), version }, state))
    }

    pub async fn commit(&mut self, state: &ConversationState) -> Result<u64, WorkflowError> {
        let record = self.store.save(&self.key, state, self.version).await?;
        tracing::debug!(
            event_name = "workflow.checkpoint.committed",
            session_key = %self.key,
            version = record.version,
            turns = state.messages.len(),
            "checkpoint committed"
        );
        self.version = record.version;
        Ok(record.version)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use huddle_core::domain::conversation::Turn;
    use huddle_core::domain::session::SessionKey;
    use huddle_core::errors::WorkflowError;
    use huddle_db::InMemoryCheckpointStore;

    use super::SessionCheckpoint;

    #[tokio::test]
    async fn unknown_session_opens_empty_at_version_zero() {
        let store = Arc::new(InMemoryCheckpointStore::default());
        let (checkpoint, state) =
            SessionCheckpoint::open(store, &SessionKey("fresh".to_string())).await.expect("open");

        assert_eq!(checkpoint.version(), 0);
        assert!(state.messages.is_empty());
        assert!(state.is_idle());
    }

    #[tokio::test]
    async fn second_handle_on_same_version_loses_the_race() {
        let store = Arc::new(InMemoryCheckpointStore::default());
        let key = SessionKey("race".to_string());

        let (mut first, mut state) = SessionCheckpoint::open(store.clone(), &key).await.expect("open");
        let (mut second, _) = SessionCheckpoint::open(store.clone(), &key).await.expect("open");

        state.append(Turn::user("hello"));
        assert_eq!(first.commit(&state).await.expect("first commit"), 1);

        let error = second.commit(&state).await.expect_err("stale handle");
        assert!(matches!(error, WorkflowError::CheckpointConflict { expected_version: 0, .. }));
        assert_eq!(first.commit(&state).await.expect("follow-up commit"), 2);
    }
}

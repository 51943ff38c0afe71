use thiserror::Error;

use huddle_core::checkpoint::CheckpointError;
use huddle_core::domain::booking::BookingStoreError;

pub mod booking;
pub mod checkpoint;
pub mod memory;

pub use booking::SqlBookingStore;
pub use checkpoint::SqlCheckpointStore;
pub use memory::{InMemoryBookingStore, InMemoryCheckpointStore};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl From<RepositoryError> for CheckpointError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(error) => CheckpointError::Unavailable(error.to_string()),
            RepositoryError::Decode(message) => CheckpointError::Decode(message),
        }
    }
}

impl From<RepositoryError> for BookingStoreError {
    fn from(error: RepositoryError) -> Self {
        match error {
            RepositoryError::Database(error) => BookingStoreError::Unavailable(error.to_string()),
            RepositoryError::Decode(message) => BookingStoreError::Decode(message),
        }
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqliteRow, Row};

use huddle_core::checkpoint::{CheckpointError, CheckpointRecord, CheckpointStore};
use huddle_core::domain::conversation::ConversationState;
use huddle_core::domain::session::SessionKey;

use super::RepositoryError;
use crate::DbPool;

/// Append-only checkpoint table. Every commit inserts a new row, so the full
/// history of a conversation stays queryable.
pub struct SqlCheckpointStore {
    pool: DbPool,
}

impl SqlCheckpointStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn count_sessions(&self) -> Result<i64, RepositoryError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(DISTINCT session_key) FROM conversation_checkpoint",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }
}

#[async_trait]
impl CheckpointStore for SqlCheckpointStore {
    async fn load(&self, key: &SessionKey) -> Result<Option<CheckpointRecord>, CheckpointError> {
        let row = sqlx::query(
            "SELECT session_key, version, state_json, created_at
             FROM conversation_checkpoint
             WHERE session_key = ?
             ORDER BY version DESC
             LIMIT 1",
        )
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(row.map(record_from_row).transpose()?)
    }

    async fn save(
        &self,
        key: &SessionKey,
        state: &ConversationState,
        expected_version: u64,
    ) -> Result<CheckpointRecord, CheckpointError> {
        let state_json = serde_json::to_string(state)
            .map_err(|error| CheckpointError::Decode(error.to_string()))?;
        let version = expected_version + 1;
        let created_at = Utc::now();

        let mut tx = self.pool.begin().await.map_err(RepositoryError::from)?;

        let latest = sqlx::query_scalar::<_, Option<i64>>(
            "SELECT MAX(version) FROM conversation_checkpoint WHERE session_key = ?",
        )
        .bind(key.as_str())
        .fetch_one(&mut *tx)
        .await
        .map_err(RepositoryError::from)?
        .unwrap_or(0);
        let latest = to_version(latest)?;

        if latest != expected_version {
            return Err(CheckpointError::Conflict {
                session_key: key.to_string(),
                expected: expected_version,
                actual: latest,
            });
        }

        let inserted = sqlx::query(
            "INSERT INTO conversation_checkpoint (session_key, version, state_json, created_at)
             VALUES (?, ?, ?, ?)",
        )
        .bind(key.as_str())
        .bind(to_column(version)?)
        .bind(&state_json)
        .bind(created_at.to_rfc3339())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            // A concurrent writer committed the same version between our read and insert.
            Err(sqlx::Error::Database(error)) if error.is_unique_violation() => {
                return Err(CheckpointError::Conflict {
                    session_key: key.to_string(),
                    expected: expected_version,
                    actual: version,
                });
            }
            Err(error) => return Err(RepositoryError::from(error).into()),
        }

        tx.commit().await.map_err(RepositoryError::from)?;

        Ok(CheckpointRecord { session_key: key.clone(), version, state: state.clone(), created_at })
    }

    async fn history(&self, key: &SessionKey) -> Result<Vec<CheckpointRecord>, CheckpointError> {
        let rows = sqlx::query(
            "SELECT session_key, version, state_json, created_at
             FROM conversation_checkpoint
             WHERE session_key = ?
             ORDER BY version ASC",
        )
        .bind(key.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.into_iter().map(record_from_row).collect::<Result<Vec<_>, _>>()?)
    }
}

fn record_from_row(row: SqliteRow) -> Result<CheckpointRecord, RepositoryError> {
    let state_json: String = row.try_get("state_json")?;
    let state = serde_json::from_str::<ConversationState>(&state_json)
        .map_err(|error| RepositoryError::Decode(format!("invalid `state_json`: {error}")))?;

    Ok(CheckpointRecord {
        session_key: SessionKey(row.try_get("session_key")?),
        version: to_version(row.try_get("version")?)?,
        state,
        created_at: parse_timestamp("created_at", row.try_get("created_at")?)?,
    })
}

fn to_version(value: i64) -> Result<u64, RepositoryError> {
    u64::try_from(value).map_err(|_| {
        RepositoryError::Decode(format!("invalid value for `version` (expected u64): {value}"))
    })
}

fn to_column(version: u64) -> Result<i64, RepositoryError> {
    i64::try_from(version)
        .map_err(|_| RepositoryError::Decode(format!("version {version} overflows column")))
}

pub(crate) fn parse_timestamp(column: &str, value: String) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(&value).map(|timestamp| timestamp.with_timezone(&Utc)).map_err(
        |error| {
            RepositoryError::Decode(format!("invalid timestamp in `{column}`: `{value}` ({error})"))
        },
    )
}

use huddle_core::checkpoint::{CheckpointRecord, CheckpointStore};
use huddle_core::domain::session::SessionKey;
use huddle_db::SqlCheckpointStore;
use serde_json::{json, Value};

use crate::commands::{async_runtime, load_config, open_database, CommandResult};

/// `huddle show`: the latest committed state of a session, or its full
/// version history with `--history`.
pub fn show(session: &str, history: bool) -> CommandResult {
    let key = match SessionKey::parse(session) {
        Ok(key) => key,
        Err(error) => return CommandResult::failure("show", "invalid_input", error.to_string(), 1),
    };
    let config = match load_config("show") {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match async_runtime("show") {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match open_database(&config).await {
            Ok(pool) => pool,
            Err(failure) => return CommandResult::from_step("show", failure),
        };
        let store = SqlCheckpointStore::new(pool.clone());
        let result = describe(&store, &key, history).await;
        pool.close().await;
        result
    })
}

pub async fn describe(store: &dyn CheckpointStore, key: &SessionKey, history: bool) -> CommandResult {
    let records = if history {
        store.history(key).await
    } else {
        store.load(key).await.map(|record| record.into_iter().collect())
    };

    match records {
        Ok(records) if records.is_empty() => CommandResult::failure(
            "show",
            "session_not_found",
            format!("session `{key}` has no checkpoint"),
            9,
        ),
        Ok(records) => {
            let latest = records.last().map(|record| record.version).unwrap_or_default();
            let message = format!("session `{key}` at version {latest}");
            let data = if history {
                Value::Array(records.iter().map(summary).collect())
            } else {
                records
                    .into_iter()
                    .last()
                    .and_then(|record| serde_json::to_value(record).ok())
                    .unwrap_or(Value::Null)
            };
            CommandResult::success_with_data("show", message, Some(data))
        }
        Err(error) => CommandResult::failure("show", "checkpoint_unavailable", error.to_string(), 4),
    }
}

fn summary(record: &CheckpointRecord) -> Value {
    json!({
        "version": record.version,
        "created_at": record.created_at,
        "turns": record.state.messages.len(),
        "last_turn": record.state.messages.last().map(|turn| turn.kind()),
        "pending_action": record.state.pending.as_ref().map(|pending| pending.action_name.clone()),
    })
}

//! `chat` and `decide`: one conversational turn per invocation against the
//! configured database and model provider. The session key ties separate
//! invocations together, so a `decide` can resume a turn suspended by an
//! earlier `chat`, even from another process.

use std::sync::Arc;

use anyhow::{Context, Result};
use huddle_agent::llm::OpenAiCompatibleClient;
use huddle_agent::runtime::{AgentRuntime, AgentSettings, TurnInput, TurnResult};
use huddle_agent::{booking_registry, system_clock};
use huddle_core::config::AppConfig;
use huddle_core::domain::confirmation::{ConfirmationToken, DecisionRecord};
use huddle_core::domain::session::{SessionIdentity, SessionKey};
use huddle_db::{DbPool, SqlBookingStore, SqlCheckpointStore};
use serde_json::Value;

use crate::commands::{async_runtime, load_config, open_database, CommandResult, StepFailure};

/// Who is speaking, and in which session.
#[derive(Clone, Debug)]
pub struct TurnTarget {
    pub session: String,
    pub user_id: i64,
    pub user_name: String,
}

pub fn chat(target: TurnTarget, message: String) -> CommandResult {
    if message.trim().is_empty() {
        return CommandResult::failure("chat", "invalid_input", "`--message` must not be empty", 1);
    }
    run("chat", target, TurnInput::Message(message))
}

pub fn decide(
    target: TurnTarget,
    kind: String,
    token: Option<String>,
    payload: Option<String>,
) -> CommandResult {
    match decision_record(&kind, token, payload.as_deref()) {
        Ok(record) => run("decide", target, TurnInput::Decision(record)),
        Err(error) => CommandResult::failure("decide", "invalid_input", format!("{error:#}"), 1),
    }
}

/// Builds the wire decision. `--payload` is JSON; feedback also accepts
/// plain text.
pub fn decision_record(kind: &str, token: Option<String>, payload: Option<&str>) -> Result<DecisionRecord> {
    let mut record = DecisionRecord::new(kind.trim());
    if let Some(token) = token.filter(|token| !token.trim().is_empty()) {
        record = record.with_token(ConfirmationToken(token.trim().to_string()));
    }

    if let Some(raw) = payload {
        let value = match serde_json::from_str::<Value>(raw) {
            Ok(value) => value,
            Err(_) if kind.trim().eq_ignore_ascii_case("feedback") => Value::String(raw.to_string()),
            Err(error) => {
                return Err(error).with_context(|| format!("`--payload` for `{kind}` must be JSON"))
            }
        };
        record = record.with_payload(value);
    }

    Ok(record)
}

fn run(command: &str, target: TurnTarget, input: TurnInput) -> CommandResult {
    let key = match SessionKey::parse(target.session.as_str()) {
        Ok(key) => key,
        Err(error) => return CommandResult::failure(command, "invalid_input", error.to_string(), 1),
    };
    let identity = SessionIdentity::new(target.user_id, target.user_name);

    let config = match load_config(command) {
        Ok(config) => config,
        Err(failure) => return failure,
    };
    let runtime = match async_runtime(command) {
        Ok(runtime) => runtime,
        Err(failure) => return failure,
    };

    runtime.block_on(async {
        let pool = match open_database(&config).await {
            Ok(pool) => pool,
            Err(failure) => return CommandResult::from_step(command, failure),
        };
        let result = match build_runtime(&config, &pool) {
            Ok(agent) => execute(&agent, command, &key, identity, input).await,
            Err(failure) => CommandResult::from_step(command, failure),
        };
        pool.close().await;
        result
    })
}

pub(crate) fn build_runtime(config: &AppConfig, pool: &DbPool) -> Result<AgentRuntime, StepFailure> {
    let llm = OpenAiCompatibleClient::from_config(&config.llm)
        .map_err(|error| ("llm_configuration", error.to_string(), 7u8))?;
    let registry = booking_registry(Arc::new(SqlBookingStore::new(pool.clone())), system_clock())
        .map_err(|error| ("registry", error.to_string(), 7u8))?;

    AgentRuntime::builder()
        .llm(Arc::new(llm))
        .registry(Arc::new(registry))
        .checkpoint_store(Arc::new(SqlCheckpointStore::new(pool.clone())))
        .settings(AgentSettings::from_config(&config.agent))
        .build()
        .map_err(|error| ("runtime_init", error.to_string(), 3u8))
}

/// Runs one turn and renders the outcome as a command envelope.
pub async fn execute(
    agent: &AgentRuntime,
    command: &str,
    key: &SessionKey,
    identity: SessionIdentity,
    input: TurnInput,
) -> CommandResult {
    match agent.handle_turn(key, identity, input).await {
        Ok(result) => {
            let message = match &result {
                TurnResult::FinalReply { text } => text.clone(),
                TurnResult::ConfirmationRequired { token, description, .. } => format!(
                    "{description}\n\nResume with: huddle decide --session {key} --kind accept --token {}",
                    token.0
                ),
            };
            CommandResult::success_with_data(command, message, serde_json::to_value(&result).ok())
        }
        Err(error) => {
            tracing::debug!(
                event_name = "cli.turn.failed",
                session_key = %key,
                error_class = error.error_class(),
                "turn ended with a workflow error"
            );
            CommandResult::failure(command, error.error_class(), error.to_string(), 8)
        }
    }
}

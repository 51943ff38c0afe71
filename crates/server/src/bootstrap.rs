use std::sync::Arc;

use huddle_agent::llm::{LlmError, OpenAiCompatibleClient};
use huddle_agent::runtime::{AgentRuntime, AgentSettings, RuntimeBuildError};
use huddle_agent::tools::RegistryError;
use huddle_agent::{booking_registry, system_clock};
use huddle_core::config::{AppConfig, ConfigError, LoadOptions};
use huddle_db::{
    connect_with_config, migrations, DbPool, RepositoryError, RoomSeedDataset, SqlBookingStore,
    SqlCheckpointStore,
};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub agent_runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("room fixtures could not be loaded: {0}")]
    Seed(#[source] RepositoryError),
    #[error("model provider is not usable: {0}")]
    ModelProvider(#[source] LlmError),
    #[error("action registry rejected an action: {0}")]
    Registry(#[source] RegistryError),
    #[error(transparent)]
    Runtime(#[from] RuntimeBuildError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    let seeded = RoomSeedDataset::load(&db_pool).await.map_err(BootstrapError::Seed)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        rooms_inserted = seeded.rooms_inserted,
        "database migrations applied"
    );

    let llm = OpenAiCompatibleClient::from_config(&config.llm).map_err(BootstrapError::ModelProvider)?;
    let bookings = Arc::new(SqlBookingStore::new(db_pool.clone()));
    let registry =
        booking_registry(bookings, system_clock()).map_err(BootstrapError::Registry)?;

    let agent_runtime = AgentRuntime::builder()
        .llm(Arc::new(llm))
        .registry(Arc::new(registry))
        .checkpoint_store(Arc::new(SqlCheckpointStore::new(db_pool.clone())))
        .settings(AgentSettings::from_config(&config.agent))
        .build()?;

    info!(
        event_name = "system.bootstrap.runtime_ready",
        correlation_id = "bootstrap",
        provider = config.llm.provider.as_str(),
        model = %config.llm.model,
        actions = agent_runtime.registry().len(),
        "agent runtime assembled"
    );

    Ok(Application { config, db_pool, agent_runtime: Arc::new(agent_runtime) })
}

#[cfg(test)]
mod tests {
    use huddle_core::config::{ConfigOverrides, LlmProvider, LoadOptions};
    use huddle_db::RoomSeedDataset;

    use crate::bootstrap::bootstrap;

    fn options(provider: LlmProvider) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                llm_provider: Some(provider),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_provider_credentials() {
        let result = bootstrap(options(LlmProvider::OpenAi)).await;

        let message = result.err().expect("missing api key should fail").to_string();
        assert!(message.contains("llm.api_key"));
    }

    #[tokio::test]
    async fn bootstrap_migrates_seeds_and_registers_booking_actions() {
        let app = bootstrap(options(LlmProvider::Ollama)).await.expect("bootstrap");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('conversation_checkpoint', 'room', 'reservation')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("tables");
        assert_eq!(table_count, 3);

        let verification = RoomSeedDataset::verify(&app.db_pool).await.expect("verify");
        assert!(verification.all_present);
        assert_eq!(app.agent_runtime.registry().len(), 5);

        app.db_pool.close().await;
    }
}

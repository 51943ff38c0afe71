use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use huddle_core::config::AppConfig;
use serde::Serialize;
use toml::Value;

use crate::commands::{load_config, CommandResult};

#[derive(Debug, Serialize)]
struct ConfigEntry {
    key: &'static str,
    value: String,
    source: String,
}

pub fn run() -> CommandResult {
    let config = match load_config("config") {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let entries: Vec<ConfigEntry> = effective_values(&config)
        .into_iter()
        .map(|(key, env_key, value)| ConfigEntry {
            key,
            value,
            source: field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref()),
        })
        .collect();

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    lines.extend(entries.iter().map(render_line));

    CommandResult::success_with_data("config", lines.join("\n"), serde_json::to_value(&entries).ok())
}

fn effective_values(config: &AppConfig) -> Vec<(&'static str, &'static str, String)> {
    let api_key = match &config.llm.api_key {
        Some(_) => "<redacted>".to_string(),
        None => "<unset>".to_string(),
    };
    let ttl = config
        .agent
        .confirmation_ttl_secs
        .map(|secs| secs.to_string())
        .unwrap_or_else(|| "<never expires>".to_string());

    vec![
        ("database.url", "HUDDLE_DATABASE_URL", config.database.url.clone()),
        (
            "database.max_connections",
            "HUDDLE_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        ("database.timeout_secs", "HUDDLE_DATABASE_TIMEOUT_SECS", config.database.timeout_secs.to_string()),
        ("llm.provider", "HUDDLE_LLM_PROVIDER", config.llm.provider.as_str().to_string()),
        ("llm.model", "HUDDLE_LLM_MODEL", config.llm.model.clone()),
        ("llm.base_url", "HUDDLE_LLM_BASE_URL", config.llm.resolved_base_url()),
        ("llm.api_key", "HUDDLE_LLM_API_KEY", api_key),
        ("llm.temperature", "HUDDLE_LLM_TEMPERATURE", config.llm.temperature.to_string()),
        ("llm.timeout_secs", "HUDDLE_LLM_TIMEOUT_SECS", config.llm.timeout_secs.to_string()),
        ("llm.max_retries", "HUDDLE_LLM_MAX_RETRIES", config.llm.max_retries.to_string()),
        (
            "agent.max_steps_per_turn",
            "HUDDLE_AGENT_MAX_STEPS_PER_TURN",
            config.agent.max_steps_per_turn.to_string(),
        ),
        ("agent.confirmation_ttl_secs", "HUDDLE_AGENT_CONFIRMATION_TTL_SECS", ttl),
        ("server.bind_address", "HUDDLE_SERVER_BIND_ADDRESS", config.server.bind_address.clone()),
        ("server.port", "HUDDLE_SERVER_PORT", config.server.port.to_string()),
        (
            "server.graceful_shutdown_secs",
            "HUDDLE_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs.to_string(),
        ),
        ("logging.level", "HUDDLE_LOGGING_LEVEL", config.logging.level.clone()),
        ("logging.format", "HUDDLE_LOGGING_FORMAT", format!("{:?}", config.logging.format).to_lowercase()),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("huddle.toml"), PathBuf::from("config/huddle.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(entry: &ConfigEntry) -> String {
    format!("- {} = {} (source: {})", entry.key, entry.value, entry.source)
}

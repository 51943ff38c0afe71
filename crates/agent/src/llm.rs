use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use huddle_core::config::LlmConfig;
use huddle_core::domain::conversation::{ActionCall, Turn};

use crate::tools::ActionSpec;

/// Everything the model sees for one Decision step.
#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub messages: Vec<Turn>,
    pub actions: Vec<ActionSpec>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
    Reply { content: String },
    /// Calls may carry an empty id when the provider does not assign one.
    Actions { content: Option<String>, calls: Vec<ActionCall> },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("model provider is not configured: {0}")]
    Configuration(String),
    #[error("model provider transport failure: {0}")]
    Transport(String),
    #[error("model provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("model provider returned an unusable response: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError>;
}

/// Speaks the `/chat/completions` dialect shared by OpenAI, DashScope
/// compatible mode and Ollama.
pub struct OpenAiCompatibleClient {
    client: Client,
    chat_url: String,
    api_key: Option<SecretString>,
    model: String,
    temperature: f32,
    max_retries: u32,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        if let Some(problem) = config.missing_credentials() {
            return Err(LlmError::Configuration(problem));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| LlmError::Configuration(error.to_string()))?;

        let base_url = config.resolved_base_url();
        let chat_url = if base_url.ends_with("/chat/completions") {
            base_url
        } else {
            format!("{base_url}/chat/completions")
        };

        Ok(Self {
            client,
            chat_url,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
            max_retries: config.max_retries,
        })
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    async fn send_once(&self, body: &ChatRequest) -> Result<ChatResponse, LlmError> {
        let mut request = self.client.post(&self.chat_url).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }

        let response =
            request.send().await.map_err(|error| LlmError::Transport(error.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status: status.as_u16(), body: truncate(&body, 512) });
        }

        response
            .json::<ChatResponse>()
            .await
            .map_err(|error| LlmError::InvalidResponse(error.to_string()))
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        let body = build_chat_request(&self.model, self.temperature, &request);

        let mut attempt = 0;
        let response = loop {
            match self.send_once(&body).await {
                Ok(response) => break response,
                Err(error) if attempt < self.max_retries && is_retryable(&error) => {
                    attempt += 1;
                    tracing::warn!(
                        event_name = "llm.request.retry",
                        attempt,
                        error = %error,
                        "retrying model provider request"
                    );
                    tokio::time::sleep(Duration::from_millis(250 * u64::from(attempt))).await;
                }
                Err(error) => return Err(error),
            }
        };

        parse_chat_response(response)
    }
}

fn is_retryable(error: &LlmError) -> bool {
    match error {
        LlmError::Transport(_) => true,
        LlmError::Status { status, .. } => {
            *status == StatusCode::TOO_MANY_REQUESTS.as_u16() || *status >= 500
        }
        LlmError::Configuration(_) | LlmError::InvalidResponse(_) => false,
    }
}

fn truncate(value: &str, limit: usize) -> String {
    match value.char_indices().nth(limit) {
        Some((index, _)) => format!("{}...", &value[..index]),
        None => value.to_string(),
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<Value>,
    temperature: f32,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<&'static str>,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ToolCall {
    #[serde(default)]
    id: String,
    function: ToolCallFunction,
}

#[derive(Debug, Deserialize)]
struct ToolCallFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

fn build_chat_request(model: &str, temperature: f32, request: &CompletionRequest) -> ChatRequest {
    let mut messages = Vec::with_capacity(request.messages.len() + 1);
    messages.push(json!({ "role": "system", "content": request.system }));
    messages.extend(request.messages.iter().map(turn_to_message));

    let tools: Vec<Value> = request
        .actions
        .iter()
        .map(|spec| {
            json!({
                "type": "function",
                "function": {
                    "name": spec.name,
                    "description": spec.description,
                    "parameters": spec.parameters,
                }
            })
        })
        .collect();
    let tool_choice = (!tools.is_empty()).then_some("auto");

    ChatRequest { model: model.to_string(), messages, temperature, tools, tool_choice }
}

fn turn_to_message(turn: &Turn) -> Value {
    match turn {
        Turn::User { content } => json!({ "role": "user", "content": content }),
        Turn::Assistant { content } => json!({ "role": "assistant", "content": content }),
        Turn::ActionRequest { content, calls } => json!({
            "role": "assistant",
            "content": content,
            "tool_calls": calls
                .iter()
                .map(|call| json!({
                    "id": call.id.as_str(),
                    "type": "function",
                    "function": {
                        "name": call.name,
                        "arguments": call.arguments.to_string(),
                    }
                }))
                .collect::<Vec<_>>(),
        }),
        Turn::ActionResult { call_id, content, .. } => json!({
            "role": "tool",
            "tool_call_id": call_id.as_str(),
            "content": content,
        }),
    }
}

fn parse_chat_response(response: ChatResponse) -> Result<Completion, LlmError> {
    let message = response
        .choices
        .into_iter()
        .next()
        .map(|choice| choice.message)
        .ok_or_else(|| LlmError::InvalidResponse("response contained no choices".to_string()))?;

    let content = message.content.filter(|text| !text.trim().is_empty());
    let tool_calls = message.tool_calls.unwrap_or_default();
    if tool_calls.is_empty() {
        return Ok(Completion::Reply { content: content.unwrap_or_default() });
    }

    let calls = tool_calls
        .into_iter()
        .map(|call| {
            let raw = call.function.arguments.trim();
            let arguments = if raw.is_empty() {
                json!({})
            } else {
                serde_json::from_str::<Value>(raw).map_err(|error| {
                    LlmError::InvalidResponse(format!(
                        "arguments for `{}` are not valid JSON: {error}",
                        call.function.name
                    ))
                })?
            };
            Ok(ActionCall::new(call.id, call.function.name, arguments))
        })
        .collect::<Result<Vec<_>, LlmError>>()?;

    Ok(Completion::Actions { content, calls })
}

/// Replays canned completions in order and records every request. Used as
/// the model provider in tests and offline demos.
#[derive(Default)]
pub struct ScriptedLlmClient {
    script: Mutex<VecDeque<Result<Completion, LlmError>>>,
    requests: Mutex<Vec<CompletionRequest>>,
}

impl ScriptedLlmClient {
    pub fn new(completions: impl IntoIterator<Item = Completion>) -> Self {
        Self {
            script: Mutex::new(completions.into_iter().map(Ok).collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, completion: Completion) {
        lock(&self.script).push_back(Ok(completion));
    }

    pub fn push_failure(&self, error: LlmError) {
        lock(&self.script).push_back(Err(error));
    }

    pub fn invocations(&self) -> usize {
        lock(&self.requests).len()
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        lock(&self.requests).clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, LlmError> {
        lock(&self.requests).push(request);
        lock(&self.script).pop_front().unwrap_or_else(|| {
            Err(LlmError::InvalidResponse("scripted completions exhausted".to_string()))
        })
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use huddle_core::config::{AppConfig, LlmProvider};
    use huddle_core::domain::conversation::{ActionCall, ActionOutcome, Turn};

    use super::{
        build_chat_request, parse_chat_response, ChatResponse, Completion, CompletionRequest,
        LlmClient, LlmError, OpenAiCompatibleClient, ScriptedLlmClient,
    };
    use crate::tools::{ActionSpec, Safety, SideEffect};

    fn spec() -> ActionSpec {
        ActionSpec {
            name: "lookup_user_bookings".to_string(),
            description: "List upcoming bookings".to_string(),
            safety: Safety::Safe,
            effect: SideEffect::ReadOnly,
            parameters: json!({"type": "object", "properties": {"user_id": {"type": "integer"}}}),
        }
    }

    #[test]
    fn request_maps_history_to_chat_messages_with_tools() {
        let call = ActionCall::new("call_1", "lookup_user_bookings", json!({"user_id": 42}));
        let request = CompletionRequest {
            system: "you are a booking assistant".to_string(),
            messages: vec![
                Turn::user("what have I booked?"),
                Turn::ActionRequest { content: None, calls: vec![call.clone()] },
                Turn::action_result(&call, ActionOutcome::Completed, "[]"),
            ],
            actions: vec![spec()],
        };

        let body = serde_json::to_value(build_chat_request("qwen-max", 0.0, &request))
            .expect("serialize");

        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["messages"][2]["tool_calls"][0]["id"], "call_1");
        assert_eq!(body["messages"][2]["tool_calls"][0]["function"]["arguments"], "{\"user_id\":42}");
        assert_eq!(body["messages"][3]["role"], "tool");
        assert_eq!(body["messages"][3]["tool_call_id"], "call_1");
        assert_eq!(body["tools"][0]["function"]["name"], "lookup_user_bookings");
        assert_eq!(body["tool_choice"], "auto");
    }

    #[test]
    fn response_with_tool_calls_becomes_actions() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": "",
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {"name": "book_room", "arguments": "{\"room_id\": 7}"}
                    }]
                }
            }]
        }))
        .expect("deserialize");

        let completion = parse_chat_response(response).expect("parse");
        assert_eq!(
            completion,
            Completion::Actions {
                content: None,
                calls: vec![ActionCall::new("call_abc", "book_room", json!({"room_id": 7}))],
            }
        );
    }

    #[test]
    fn malformed_tool_arguments_are_rejected() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{"id": "c", "function": {"name": "book_room", "arguments": "{room"}}]
                }
            }]
        }))
        .expect("deserialize");

        assert!(matches!(parse_chat_response(response), Err(LlmError::InvalidResponse(_))));
    }

    #[test]
    fn plain_response_becomes_reply() {
        let response: ChatResponse = serde_json::from_value(json!({
            "choices": [{"message": {"content": "Room Vega is free."}}]
        }))
        .expect("deserialize");

        assert_eq!(
            parse_chat_response(response).expect("parse"),
            Completion::Reply { content: "Room Vega is free.".to_string() }
        );
    }

    #[test]
    fn client_requires_credentials_for_hosted_providers() {
        let mut config = AppConfig::default().llm;
        config.api_key = None;
        assert!(matches!(
            OpenAiCompatibleClient::from_config(&config),
            Err(LlmError::Configuration(_))
        ));

        config.provider = LlmProvider::Ollama;
        let client = OpenAiCompatibleClient::from_config(&config).expect("ollama needs no key");
        assert_eq!(client.chat_url(), "http://localhost:11434/v1/chat/completions");
    }

    #[tokio::test]
    async fn scripted_client_replays_and_records() {
        let client = ScriptedLlmClient::new([Completion::Reply { content: "hi".to_string() }]);
        let request = CompletionRequest { system: String::new(), messages: vec![], actions: vec![] };

        let first = client.complete(request.clone()).await.expect("scripted reply");
        assert_eq!(first, Completion::Reply { content: "hi".to_string() });

        let exhausted = client.complete(request).await;
        assert!(exhausted.is_err());
        assert_eq!(client.invocations(), 2);
        assert_eq!(client.remaining(), 0);
    }
}

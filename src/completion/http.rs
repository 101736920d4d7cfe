use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use super::{CompletionError, CompletionRequest, CompletionService};

pub const DEFAULT_COMPLETION_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_COMPLETION_MODEL: &str = "llama3.1";

#[derive(Debug, Clone)]
pub struct CompletionClientConfig {
    pub base_url: String,
    pub model: String,
    pub api_key: Option<String>,
    pub timeout: Option<Duration>,
}

impl Default for CompletionClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_COMPLETION_URL.to_string(),
            model: DEFAULT_COMPLETION_MODEL.to_string(),
            api_key: None,
            timeout: Some(Duration::from_secs(120)),
        }
    }
}

pub struct HttpCompletionClient {
    client: reqwest::blocking::Client,
    chat_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpCompletionClient {
    pub fn new(config: CompletionClientConfig) -> Result<Self, CompletionError> {
        let mut builder = reqwest::blocking::Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder
            .build()
            .map_err(|err| CompletionError::Transport(format!("failed to build http client: {err}")))?;

        Ok(Self {
            client,
            chat_url: format!("{}/api/chat", normalize_base_url(&config.base_url)),
            model: config.model,
            api_key: config.api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    pub fn chat_url(&self) -> &str {
        &self.chat_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl CompletionService for HttpCompletionClient {
    fn complete(&self, request: &CompletionRequest) -> Result<String, CompletionError> {
        let body = chat_body(&self.model, request);
        debug!(
            call_site = request.call_site.as_str(),
            prompt_chars = request.prompt.len(),
            "sending completion request"
        );

        let mut builder = self.client.post(&self.chat_url).json(&body);
        if let Some(api_key) = &self.api_key {
            builder = builder.bearer_auth(api_key);
        }
        let response = builder
            .send()
            .map_err(|err| CompletionError::Transport(format!("{} ({err})", self.chat_url)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = response
            .json()
            .map_err(|err| CompletionError::InvalidBody(err.to_string()))?;
        let content = parsed.message.content.trim().to_string();
        if content.is_empty() {
            return Err(CompletionError::EmptyResponse);
        }
        Ok(content)
    }
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

fn chat_body(model: &str, request: &CompletionRequest) -> serde_json::Value {
    let mut messages = Vec::<serde_json::Value>::new();
    if let Some(system) = &request.system {
        messages.push(json!({ "role": "system", "content": system }));
    }
    messages.push(json!({ "role": "user", "content": request.prompt }));

    let mut options = json!({
        "temperature": request.temperature,
        "num_predict": request.max_tokens,
    });
    if !request.stop.is_empty() {
        options["stop"] = json!(request.stop);
    }

    json!({
        "model": model,
        "stream": false,
        "messages": messages,
        "options": options,
    })
}

fn normalize_base_url(base_url: &str) -> String {
    let mut url = base_url.trim().to_string();
    if url.is_empty() {
        url = DEFAULT_COMPLETION_URL.to_string();
    }
    if !url.starts_with("http://") && !url.starts_with("https://") {
        url = format!("http://{url}");
    }
    url.trim_end_matches('/').to_string()
}

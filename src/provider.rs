use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::error::ProviderError;
use crate::stream::{decode_sse, ChunkStream};
use crate::tools::ToolDefinition;
use crate::types::Message;

/// How long an availability probe may take before the provider counts as
/// unavailable.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// Everything a provider needs for one streamed completion. The session
/// and channel ride along as metadata for gating and audit.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub max_tokens: u32,
    pub temperature: f32,
    pub session_id: String,
    pub channel: String,
}

/// Uniform streaming chat interface over heterogeneous backends.
///
/// Providers are partitioned into *local* (data stays on device, privacy
/// gate bypassed) and *remote*. Errors must carry an integer HTTP status
/// where one applies (0 for network failures) so the fallback chain can
/// classify them.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;

    fn model(&self) -> &str;

    /// True when request data never leaves the device.
    fn is_local(&self) -> bool {
        false
    }

    /// Cheap availability probe. Must not execute a completion.
    async fn is_available(&self) -> bool;

    /// Send a completion request and return the decoded chunk stream.
    async fn chat(&self, request: ChatRequest) -> Result<ChunkStream, ProviderError>;
}

/// Generic streaming HTTP backend speaking the crate's chunk vocabulary
/// over SSE. Points at any gateway or local inference server that accepts
/// the neutral request shape; no vendor wire format is assumed.
pub struct HttpChatProvider {
    name: String,
    model: String,
    base_url: String,
    api_key: Option<String>,
    local: bool,
    client: reqwest::Client,
}

impl HttpChatProvider {
    pub fn new(
        name: impl Into<String>,
        model: impl Into<String>,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            model: model.into(),
            base_url: base_url.into(),
            api_key: None,
            local: false,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Mark the backend as on-device (e.g. an inference server bound to
    /// localhost). Local providers bypass the privacy gate.
    pub fn with_local(mut self, local: bool) -> Self {
        self.local = local;
        self
    }

    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }
}

#[async_trait]
impl ChatProvider for HttpChatProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn is_local(&self) -> bool {
        self.local
    }

    async fn is_available(&self) -> bool {
        let url = format!("{}/health", self.base_url);
        match self
            .client
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
        {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn chat(&self, request: ChatRequest) -> Result<ChunkStream, ProviderError> {
        let body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "temperature": request.temperature,
            "stream": true,
            "messages": request.messages,
            "tools": request.tools.iter().map(|t| t.schema()).collect::<Vec<_>>(),
        });

        debug!(
            provider = %self.name,
            model = %self.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "sending chat request"
        );

        let mut builder = self
            .client
            .post(format!("{}/v1/chat", self.base_url))
            .header("content-type", "application/json");
        if let Some(ref key) = self.api_key {
            builder = builder.header("authorization", format!("Bearer {key}"));
        }

        let resp = builder
            .json(&body)
            .send()
            .await
            .map_err(|e| ProviderError::Transport(e.to_string()))?;

        let status = resp.status().as_u16();
        if !(200..300).contains(&status) {
            let text = resp.text().await.unwrap_or_default();
            let (message, code) = parse_error_body(&text);
            return Err(ProviderError::Api {
                status,
                message,
                code,
            });
        }

        Ok(decode_sse(resp.bytes_stream()))
    }
}

/// Pull `message`/`code` out of an error body shaped like
/// `{"error": {"message": …, "code": …}}`, falling back to the raw text.
fn parse_error_body(body: &str) -> (String, Option<String>) {
    if let Ok(v) = serde_json::from_str::<Value>(body) {
        let err = if v.get("error").is_some() { &v["error"] } else { &v };
        let message = err["message"]
            .as_str()
            .map(String::from)
            .unwrap_or_else(|| body.to_string());
        let code = err["code"].as_str().map(String::from);
        return (message, code);
    }
    (body.to_string(), None)
}

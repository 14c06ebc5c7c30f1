//! OpenAI-compatible Chat Completions backend
//!
//! Non-streaming calls retry transient failures (timeouts, connection
//! errors, 429 and 5xx) with exponential backoff. Streaming calls parse the SSE
//! `data:` lines on a spawned reader task and forward deltas over a channel.

use super::backend::{ChatBackend, ChatMessage, StreamEvent};
use crate::prompt::CompletionParams;
use crate::{DuckError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const MAX_RETRY_ATTEMPTS: u32 = 4;
const RETRY_BASE_DELAY_MS: u64 = 200;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);
const MAX_ERROR_CHARS: usize = 500;
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// ─── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    temperature: f32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
}

// ─── Backend ─────────────────────────────────────────────────────────

/// Chat Completions client
pub struct OpenAiBackend {
    client: Client,
    api_key: String,
    base_url: String,
}

impl OpenAiBackend {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(15))
            .user_agent(concat!("debugduck/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| DuckError::ModelCall(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    /// Point at another OpenAI-compatible endpoint
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn retry_backoff(attempt: u32) -> Duration {
        let exp = 2u64.saturating_pow(attempt.saturating_sub(1));
        let base_ms = RETRY_BASE_DELAY_MS.saturating_mul(exp);
        let jitter = 1.0 + ((attempt as f64 * 0.37).sin() * 0.1);
        Duration::from_millis((base_ms as f64 * jitter) as u64)
    }

    async fn send_request(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
        stream: bool,
    ) -> std::result::Result<reqwest::Response, CallError> {
        let request = ChatRequest {
            model: &params.model,
            messages,
            max_tokens: params.max_tokens,
            temperature: params.temperature,
            top_p: params.top_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            stop: (!params.stop.is_empty()).then_some(params.stop.as_slice()),
            stream,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(CallError::from_transport)?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(CallError::from_response(status, &body))
    }

    async fn complete_once(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> std::result::Result<String, CallError> {
        let response = self.send_request(messages, params, false).await?;
        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| CallError::Fatal(DuckError::ModelCall(e.to_string())))?;
        Ok(chat_response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default())
    }
}

#[async_trait]
impl ChatBackend for OpenAiBackend {
    async fn complete(&self, messages: &[ChatMessage], params: &CompletionParams) -> Result<String> {
        debug!("Calling {} with {} messages", params.model, messages.len());

        let mut last_err = None;
        for attempt in 0..MAX_RETRY_ATTEMPTS {
            if attempt > 0 {
                let delay = Self::retry_backoff(attempt);
                warn!(
                    "Model request failed (attempt {}/{}), retrying in {:?}...",
                    attempt, MAX_RETRY_ATTEMPTS, delay
                );
                tokio::time::sleep(delay).await;
            }

            match self.complete_once(messages, params).await {
                Ok(content) => return Ok(content),
                Err(CallError::Transient(e)) if attempt + 1 < MAX_RETRY_ATTEMPTS => {
                    last_err = Some(e);
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(last_err
            .unwrap_or_else(|| DuckError::ModelCall("all retry attempts exhausted".to_string())))
    }

    async fn stream(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let response = self.send_request(messages, params, true).await?;
        let (tx, rx) = mpsc::channel(32);

        let mut stream = response.bytes_stream();
        tokio::spawn(async move {
            let mut buffer = LineBuffer::default();
            while let Some(chunk_result) = stream.next().await {
                let bytes = match chunk_result {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                for line in buffer.push(&bytes) {
                    match parse_sse_line(&line) {
                        SseLine::Token(content) => {
                            if tx.send(StreamEvent::Token(content)).await.is_err() {
                                return;
                            }
                        }
                        SseLine::Done => {
                            let _ = tx.send(StreamEvent::Done).await;
                            return;
                        }
                        SseLine::Skip => {}
                    }
                }
            }
            let _ = tx.send(StreamEvent::Done).await;
        });

        Ok(rx)
    }

    fn name(&self) -> &str {
        "openai"
    }
}

// ─── Errors ──────────────────────────────────────────────────────────

/// Error object of a failed Chat Completions call:
/// `{"error": {"message": ..., "type": ..., "code": ...}}`
#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorObject,
}

#[derive(Debug, Deserialize)]
struct ApiErrorObject {
    #[serde(default)]
    message: String,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    code: Option<serde_json::Value>,
}

/// A failed request attempt, sorted by whether retrying can help
#[derive(Debug)]
enum CallError {
    /// Timeouts, connection failures, rate limits and 5xx
    Transient(DuckError),
    Fatal(DuckError),
}

impl CallError {
    fn from_transport(e: reqwest::Error) -> Self {
        let error = DuckError::ModelCall(e.to_string());
        if e.is_timeout() || e.is_connect() {
            CallError::Transient(error)
        } else {
            CallError::Fatal(error)
        }
    }

    fn from_response(status: StatusCode, body: &str) -> Self {
        let parsed = serde_json::from_str::<ApiErrorBody>(body).ok().map(|b| b.error);
        let code = parsed
            .as_ref()
            .and_then(|e| e.code.as_ref())
            .and_then(|c| c.as_str());
        // Out of credit is reported as 429 too but never clears on its own.
        let transient = status.is_server_error()
            || (status == StatusCode::TOO_MANY_REQUESTS && code != Some("insufficient_quota"));

        let mut text = format!("API error {status}");
        match &parsed {
            Some(e) => {
                if let Some(kind) = &e.kind {
                    text.push_str(&format!(" ({kind})"));
                }
                if !e.message.is_empty() {
                    text.push_str(&format!(": {}", truncate_chars(&e.message, MAX_ERROR_CHARS)));
                }
            }
            None if !body.trim().is_empty() => {
                text.push_str(&format!(": {}", truncate_chars(body.trim(), MAX_ERROR_CHARS)));
            }
            None => {}
        }

        let error = DuckError::ModelCall(text);
        if transient {
            CallError::Transient(error)
        } else {
            CallError::Fatal(error)
        }
    }
}

impl From<CallError> for DuckError {
    fn from(e: CallError) -> Self {
        match e {
            CallError::Transient(e) | CallError::Fatal(e) => e,
        }
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut truncated: String = text.chars().take(max_chars).collect();
    truncated.push_str("... [truncated]");
    truncated
}

// ─── Streaming ───────────────────────────────────────────────────────

/// Splits streamed bytes into lines.
///
/// Chunks can end inside a multi-byte character, so bytes are held until a
/// whole line has arrived and only then decoded.
#[derive(Debug, Default)]
struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(String::from_utf8_lossy(&line).trim_end().to_string());
        }
        lines
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Token(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
        return SseLine::Skip;
    };
    if data == "[DONE]" {
        return SseLine::Done;
    }
    let Ok(chunk) = serde_json::from_str::<StreamChunk>(data) else {
        debug!("Skipping unparseable stream chunk: {}", data);
        return SseLine::Skip;
    };
    let Some(choice) = chunk.choices.into_iter().next() else {
        return SseLine::Skip;
    };
    match (choice.delta.content, choice.finish_reason) {
        (Some(content), _) if !content.is_empty() => SseLine::Token(content),
        (_, Some(_)) => SseLine::Done,
        _ => SseLine::Skip,
    }
}

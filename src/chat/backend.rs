//! Language-model backend capability

use crate::prompt::CompletionParams;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Speaker of a chat turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }

    /// Prefix used when rendering history as plain text
    pub fn speaker(&self) -> &'static str {
        match self {
            Role::System => "System",
            Role::User => "Human",
            Role::Assistant => "AI",
        }
    }
}

/// A role-tagged message as sent to the backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Incremental output from a streaming call
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Token(String),
    Done,
    Error(String),
}

/// Sends conversation turns to a language model
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Complete the conversation, returning the whole reply
    async fn complete(&self, messages: &[ChatMessage], params: &CompletionParams) -> Result<String>;

    /// Complete the conversation, yielding fragments as they arrive.
    ///
    /// The default sends the whole reply as a single token.
    async fn stream(
        &self,
        messages: &[ChatMessage],
        params: &CompletionParams,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let text = self.complete(messages, params).await?;
        let (tx, rx) = mpsc::channel(2);
        let _ = tx.send(StreamEvent::Token(text)).await;
        let _ = tx.send(StreamEvent::Done).await;
        Ok(rx)
    }

    /// Backend name for logs
    fn name(&self) -> &str;
}

/// Offline backend that replies with the last message upper-cased.
#[derive(Debug, Clone, Default)]
pub struct DummyBackend;

impl DummyBackend {
    pub fn new() -> Self {
        Self
    }

    fn reply(messages: &[ChatMessage]) -> String {
        messages
            .last()
            .map(|m| m.content.to_uppercase())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ChatBackend for DummyBackend {
    async fn complete(&self, messages: &[ChatMessage], _params: &CompletionParams) -> Result<String> {
        Ok(Self::reply(messages))
    }

    /// Streams space-separated words, each keeping its trailing space
    async fn stream(
        &self,
        messages: &[ChatMessage],
        _params: &CompletionParams,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let reply = Self::reply(messages);
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(async move {
            for token in reply.split_inclusive(' ') {
                if tx.send(StreamEvent::Token(token.to_string())).await.is_err() {
                    return;
                }
            }
            let _ = tx.send(StreamEvent::Done).await;
        });
        Ok(rx)
    }

    fn name(&self) -> &str {
        "dummy"
    }
}

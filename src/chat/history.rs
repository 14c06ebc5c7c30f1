//! Conversation history with a word budget
//!
//! Word counts stand in for tokens: the budget is 75% of the model's
//! context window (in "words"), which is rough but errs on the safe side
//! for English prose and code.

use super::backend::{ChatBackend, ChatMessage, Role, StreamEvent};
use super::models::context_window;
use crate::prompt::{PromptFields, PromptTemplate};
use crate::{DuckError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

/// Words per token used to turn a context window into a word budget
const WORDS_PER_TOKEN: f64 = 0.75;

/// One turn of the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    fn new(role: Role, content: String) -> Self {
        Self {
            role,
            content,
            timestamp: Utc::now(),
        }
    }

    fn word_count(&self) -> usize {
        self.content.split_whitespace().count()
    }
}

/// Receives reply fragments as they arrive
#[async_trait]
pub trait TokenSink: Send {
    async fn on_token(&mut self, token: &str);
}

/// Sink that drops every fragment
pub struct NoopSink;

#[async_trait]
impl TokenSink for NoopSink {
    async fn on_token(&mut self, _token: &str) {}
}

/// Ordered `[system, user, assistant, ...]` turns for one session.
///
/// A user turn is only kept once the assistant has answered it.
#[derive(Debug, Clone)]
pub struct Conversation {
    template: PromptTemplate,
    turns: Vec<Turn>,
    context_window: usize,
    hard_limit_words: usize,
    soft_limit_words: usize,
}

impl Conversation {
    pub fn new(template: PromptTemplate) -> Self {
        let window = context_window(&template.completion().model);
        let mut conversation = Self {
            turns: vec![Turn::new(Role::System, template.system().to_string())],
            template,
            context_window: 0,
            hard_limit_words: 0,
            soft_limit_words: 0,
        };
        conversation.set_context_window(window);
        conversation
    }

    /// Override the model's nominal context window (in tokens)
    pub fn with_context_window(mut self, tokens: usize) -> Self {
        self.set_context_window(tokens);
        self
    }

    fn set_context_window(&mut self, tokens: usize) {
        let max_tokens = self.template.completion().max_tokens as usize;
        self.context_window = tokens;
        self.hard_limit_words = (WORDS_PER_TOKEN * tokens as f64) as usize;
        self.soft_limit_words = (WORDS_PER_TOKEN * tokens.saturating_sub(max_tokens) as f64) as usize;
    }

    pub fn template(&self) -> &PromptTemplate {
        &self.template
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    /// Never true: the system turn is always present.
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn context_window(&self) -> usize {
        self.context_window
    }

    /// (soft, hard) budgets in words
    pub fn word_limits(&self) -> (usize, usize) {
        (self.soft_limit_words, self.hard_limit_words)
    }

    /// Drop everything but the system turn
    pub fn reset(&mut self) {
        self.turns.truncate(1);
    }

    /// Fields a user-message variant needs
    pub fn input_variables(&self, key: &str) -> Result<&BTreeSet<String>> {
        self.template.field_names(key)
    }

    /// Render a user message without sending it
    pub fn user_message(&self, key: &str, fields: &PromptFields) -> Result<String> {
        self.template.render(key, fields)
    }

    /// History as a single string, optionally with `Human:`/`AI:` prefixes
    pub fn history_text(&self, sep: &str, speaker_prefix: bool) -> String {
        self.turns
            .iter()
            .map(|turn| {
                if speaker_prefix {
                    format!("{}: {}", turn.role.speaker(), turn.content)
                } else {
                    turn.content.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(sep)
    }

    pub fn word_count(&self) -> usize {
        self.history_text("\n", true).split_whitespace().count()
    }

    /// Render the `key` variant with `fields`, send the conversation and
    /// record the reply.
    ///
    /// Fragments are forwarded to `sink` as they arrive (the whole reply at
    /// once when the template disables streaming). On any error the user turn
    /// added here is removed again.
    pub async fn send(
        &mut self,
        backend: &dyn ChatBackend,
        fields: &PromptFields,
        key: &str,
        sink: &mut dyn TokenSink,
    ) -> Result<String> {
        let message = self.user_message(key, fields)?;
        self.turns.push(Turn::new(Role::User, message));

        if let Err(e) = self.truncate_history() {
            self.turns.pop();
            return Err(e);
        }

        let messages: Vec<ChatMessage> = self
            .turns
            .iter()
            .map(|turn| ChatMessage::new(turn.role, turn.content.clone()))
            .collect();
        let params = self.template.completion();
        debug!(
            "Sending {} turns to {} ({})",
            messages.len(),
            backend.name(),
            params.model
        );

        let reply = if params.stream {
            Self::stream_reply(backend, &messages, params, sink).await
        } else {
            match backend.complete(&messages, params).await {
                Ok(text) => {
                    sink.on_token(&text).await;
                    Ok(text)
                }
                Err(e) => Err(e),
            }
        };

        match reply {
            Ok(text) => {
                self.turns.push(Turn::new(Role::Assistant, text.clone()));
                Ok(text)
            }
            Err(e) => {
                self.turns.pop();
                Err(e)
            }
        }
    }

    async fn stream_reply(
        backend: &dyn ChatBackend,
        messages: &[ChatMessage],
        params: &crate::prompt::CompletionParams,
        sink: &mut dyn TokenSink,
    ) -> Result<String> {
        let mut rx = backend.stream(messages, params).await?;
        let mut reply = String::new();
        while let Some(event) = rx.recv().await {
            match event {
                StreamEvent::Token(token) => {
                    sink.on_token(&token).await;
                    reply.push_str(&token);
                }
                StreamEvent::Done => break,
                StreamEvent::Error(e) => return Err(DuckError::ModelCall(e)),
            }
        }
        Ok(reply)
    }

    /// Evict the oldest non-system turns until the history fits.
    fn truncate_history(&mut self) -> Result<()> {
        let mut words = self.word_count();
        while words > self.hard_limit_words {
            if self.turns.len() <= 2 {
                return Err(DuckError::HistoryOverflow {
                    words,
                    limit_words: self.hard_limit_words,
                    context_window: self.context_window,
                });
            }
            let turn = self.turns.remove(1);
            // +1 for the speaker prefix
            words = words.saturating_sub(turn.word_count() + 1);
            debug!("Evicted a {:?} turn; ~{} words remain", turn.role, words);
        }

        if words > self.soft_limit_words {
            warn!(
                "Chat history contains ~{} words, so the model's context window of ~{} words \
                 ({} tokens) will limit the answer length more than max_tokens does",
                words, self.hard_limit_words, self.context_window
            );
        }
        Ok(())
    }
}

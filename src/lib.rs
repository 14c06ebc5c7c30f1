//! Debugduck - conversational debugging
//!
//! Wraps a line-stepping debugger so that:
//! - Questions typed at the debugger prompt are answered by a language model
//! - The paused frame's code and variables are sent along as context
//! - Uncaught errors can be explained automatically and the session closed

pub mod cache;
pub mod chat;
pub mod config;
pub mod context;
pub mod diff;
pub mod errors;
pub mod frame;
pub mod parse;
pub mod prompt;
pub mod replay;
pub mod session;

pub use cache::{CacheEntry, CompletionCache};
pub use chat::{ChatBackend, Conversation, DummyBackend, OpenAiBackend};
pub use context::{ContextExtractor, ContextSnapshot};
pub use errors::{post_mortem, ErrorDispatch, ErrorReport, PostMortemOptions};
pub use frame::{Frame, RecordedFrame, VarValue};
pub use prompt::{PromptAssembler, PromptTemplate};
pub use session::{DuckSession, InputClassifier, InputLine, LineDebugger, SessionMode};

use std::collections::BTreeSet;
use std::time::Duration;

/// Name of the pause primitive stripped from source sent to the model.
pub const DEFAULT_PAUSE_PRIMITIVE: &str = "duck";

/// Configuration for a debugging session
#[derive(Debug, Clone)]
pub struct DuckConfig {
    /// Built-in template name or path to a TOML template
    pub prompt_name: String,

    /// Approximate character budget for each variable's repr
    pub max_len_per_var: usize,

    /// Suppress live typing (cache is still populated)
    pub silent: bool,

    /// Color used for answers
    pub color: String,

    /// Delay between typed characters when streaming
    pub typing_delay: Duration,

    /// Name of the call that pauses the program (e.g. `duck`)
    pub pause_primitive: String,

    /// Overrides the template's model name
    pub model_name: Option<String>,

    /// Overrides the template's max_tokens
    pub max_tokens: Option<u32>,

    /// Overrides the template's streaming flag
    pub stream: Option<bool>,

    /// Filter variables against the whole source file. Whether the file
    /// itself is sent is up to the template.
    pub full_context: bool,
}

impl DuckConfig {
    pub fn new(prompt_name: impl Into<String>) -> Self {
        Self {
            prompt_name: prompt_name.into(),
            max_len_per_var: 79,
            silent: false,
            color: "green".to_string(),
            typing_delay: Duration::from_millis(10),
            pause_primitive: DEFAULT_PAUSE_PRIMITIVE.to_string(),
            model_name: None,
            max_tokens: None,
            stream: None,
            full_context: false,
        }
    }

    pub fn with_max_len_per_var(mut self, max_len: usize) -> Self {
        self.max_len_per_var = max_len;
        self
    }

    pub fn with_silent(mut self, silent: bool) -> Self {
        self.silent = silent;
        self
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_typing_delay(mut self, delay: Duration) -> Self {
        self.typing_delay = delay;
        self
    }

    pub fn with_pause_primitive(mut self, name: impl Into<String>) -> Self {
        self.pause_primitive = name.into();
        self
    }

    pub fn with_model_name(mut self, model: impl Into<String>) -> Self {
        self.model_name = Some(model.into());
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = Some(stream);
        self
    }

    pub fn with_full_context(mut self, full_context: bool) -> Self {
        self.full_context = full_context;
        self
    }

    /// Color for the rendered prompt shown in `[dev]` mode
    pub fn dev_color(&self) -> &'static str {
        if self.color == "red" {
            "blue"
        } else {
            "red"
        }
    }
}

impl Default for DuckConfig {
    fn default() -> Self {
        Self::new("debug")
    }
}

/// Result type for Debugduck operations
pub type Result<T> = std::result::Result<T, DuckError>;

/// Errors that can occur in Debugduck
#[derive(Debug, thiserror::Error)]
pub enum DuckError {
    /// Source or state could not be read from the paused frame. Recoverable.
    #[error("Context extraction error: {0}")]
    Extraction(String),

    #[error(
        "Prompt fields do not match the template (unexpected: {unexpected:?}, missing: {missing:?}). \
         If you are using a custom prompt template, fix its placeholders or override the context \
         extraction step so it produces exactly the declared fields."
    )]
    FieldMismatch {
        unexpected: BTreeSet<String>,
        missing: BTreeSet<String>,
    },

    #[error("Prompt template error: {0}")]
    Template(String),

    #[error(
        "Chat history contains ~{words} words even when only including the system prompt and the \
         latest user message, which is more than this model can support. Context window is \
         ~{limit_words} words ({context_window} tokens). Try a model with a larger context window, \
         a more concise prompt template, a smaller max_len_per_var, or splitting up very large \
         functions."
    )]
    HistoryOverflow {
        words: usize,
        limit_words: usize,
        context_window: usize,
    },

    #[error("Model call failed: {0}")]
    ModelCall(String),

    #[error("Completion parse error: {0}")]
    Parse(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl DuckError {
    /// Whether the session can carry on with reduced context
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DuckError::Extraction(_))
    }
}

//! Chat backends and conversation history

pub mod backend;
pub mod history;
pub mod models;
pub mod openai;

pub use backend::{ChatBackend, ChatMessage, DummyBackend, Role, StreamEvent};
pub use history::{Conversation, NoopSink, TokenSink, Turn};
pub use models::context_window;
pub use openai::OpenAiBackend;

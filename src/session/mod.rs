//! Conversational debugger session
//!
//! Sits on the input stream of a [`LineDebugger`]: questions go to the
//! model, everything else goes to the debugger untouched.

pub mod classify;
mod controller;
pub mod debugger;
pub mod typing;

pub use classify::{has_dev_marker, strip_dev_marker, InputClassifier};
pub use controller::{DuckSession, AUTO_EXPLAIN_QUESTION, DUCK_PROMPT, FALLBACK_ANSWER};
pub use debugger::{CommandOutcome, Console, LineDebugger, ScriptedConsole, StdConsole};
pub use typing::LiveTyper;

/// How the session was started
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionMode {
    /// User types questions and commands live
    #[default]
    Interactive,
    /// One seeded explanation, then quit unless `interactive`
    AutoExplain { interactive: bool },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Stepping,
    AwaitingInput,
    Answering,
    Done,
}

/// One line of input, optionally carrying a stack trace for the model
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLine {
    Text(String),
    WithTrace { text: String, stack_trace: String },
}

impl InputLine {
    pub fn text(&self) -> &str {
        match self {
            InputLine::Text(text) | InputLine::WithTrace { text, .. } => text,
        }
    }

    /// `(text, stack_trace)`; the trace is empty for plain lines
    pub fn into_parts(self) -> (String, String) {
        match self {
            InputLine::Text(text) => (text, String::new()),
            InputLine::WithTrace { text, stack_trace } => (text, stack_trace),
        }
    }
}

impl From<&str> for InputLine {
    fn from(text: &str) -> Self {
        InputLine::Text(text.to_string())
    }
}

impl From<String> for InputLine {
    fn from(text: String) -> Self {
        InputLine::Text(text)
    }
}

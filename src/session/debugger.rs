//! Collaborators the session drives: the line debugger and the terminal

use crate::frame::Frame;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};
use tracing::warn;

/// Prompt shown when reading debugger input
pub const DEBUGGER_PROMPT: &str = ">>> ";

/// What the debugger wants to happen after a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Keep reading commands
    Continue,
    /// Leave the command loop (resume, step or quit)
    Stop,
    /// The command was rejected; the message has already been shown
    Failed(String),
}

/// The underlying command-read-eval debugger.
///
/// The session only intercepts its input; everything that is not a
/// question is forwarded here unchanged.
#[async_trait]
pub trait LineDebugger: Send + Sync {
    /// Frame the debugger is paused in
    fn frame(&self) -> &dyn Frame;

    fn prompt(&self) -> &str {
        DEBUGGER_PROMPT
    }

    /// True while a multi-line command block is being defined
    fn is_defining_commands(&self) -> bool {
        false
    }

    /// Take one line of a command-block definition
    async fn handle_command_def(&mut self, line: &str, console: &mut dyn Console) -> CommandOutcome {
        self.onecmd(line, console).await
    }

    /// Interpret one command line
    async fn onecmd(&mut self, line: &str, console: &mut dyn Console) -> CommandOutcome;
}

/// Line-oriented terminal
#[async_trait]
pub trait Console: Send {
    /// Show `prompt` and read one line; `None` at end of input
    async fn read_line(&mut self, prompt: &str) -> Option<String>;

    async fn write(&mut self, text: &str);
}

/// Console over the process's stdin/stdout
pub struct StdConsole {
    lines: Lines<BufReader<Stdin>>,
    stdout: tokio::io::Stdout,
}

impl StdConsole {
    pub fn new() -> Self {
        Self {
            lines: BufReader::new(tokio::io::stdin()).lines(),
            stdout: tokio::io::stdout(),
        }
    }
}

impl Default for StdConsole {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Console for StdConsole {
    async fn read_line(&mut self, prompt: &str) -> Option<String> {
        self.write(prompt).await;
        match self.lines.next_line().await {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to read input: {}", e);
                None
            }
        }
    }

    async fn write(&mut self, text: &str) {
        let result = async {
            self.stdout.write_all(text.as_bytes()).await?;
            self.stdout.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!("Failed to write output: {}", e);
        }
    }
}

#[derive(Debug, Default)]
struct ScriptedInner {
    input: VecDeque<String>,
    output: String,
}

/// Console fed from a fixed list of lines; output is captured.
///
/// Clones share the same input and output.
#[derive(Debug, Clone, Default)]
pub struct ScriptedConsole {
    inner: Arc<Mutex<ScriptedInner>>,
}

impl ScriptedConsole {
    pub fn new<I, S>(lines: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(Mutex::new(ScriptedInner {
                input: lines.into_iter().map(Into::into).collect(),
                output: String::new(),
            })),
        }
    }

    fn with_inner<T>(&self, f: impl FnOnce(&mut ScriptedInner) -> T) -> T {
        let mut guard = match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Everything written so far (prompts included)
    pub fn output(&self) -> String {
        self.with_inner(|inner| inner.output.clone())
    }
}

#[async_trait]
impl Console for ScriptedConsole {
    async fn read_line(&mut self, prompt: &str) -> Option<String> {
        self.with_inner(|inner| {
            inner.output.push_str(prompt);
            let line = inner.input.pop_front();
            if let Some(line) = &line {
                inner.output.push_str(line);
                inner.output.push('\n');
            }
            line
        })
    }

    async fn write(&mut self, text: &str) {
        self.with_inner(|inner| inner.output.push_str(text));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_console_echoes_input() {
        let console = ScriptedConsole::new(["n"]);
        let mut handle = console.clone();
        assert_eq!(handle.read_line(">>> ").await.as_deref(), Some("n"));
        assert_eq!(handle.read_line(">>> ").await, None);
        handle.write("done\n").await;
        assert_eq!(console.output(), ">>> n\n>>> done\n");
    }
}

//! Debugger over a captured frame
//!
//! A recorded frame can't be stepped, so every stepping command ends the
//! session. Inspection commands work off the frame's source and variables.

use crate::context::truncated_repr;
use crate::frame::{Frame, SourceId, VarValue};
use crate::session::{CommandOutcome, Console, LineDebugger};
use async_trait::async_trait;
use std::sync::Arc;

const HELP: &str = "\
Documented commands:
  p / pp NAME      print a variable
  a / args         print local variables
  l / list / ll    show the source around the current line
  w / where        show the current location
  c / n / s / q    leave the session (a recorded frame can't be stepped)
  h / help         this message
End a line with '?' or start it with '>' to ask Duck instead.
";

/// Repr budget for printed values; printing is for people, not prompts
const PRINT_REPR_LEN: usize = 2000;

/// [`LineDebugger`] over a frame that can only be inspected
pub struct RecordedDebugger {
    frame: Arc<dyn Frame>,
}

impl RecordedDebugger {
    pub fn new(frame: Arc<dyn Frame>) -> Self {
        Self { frame }
    }

    fn lookup(&self, name: &str) -> Option<VarValue> {
        self.frame
            .locals()
            .remove(name)
            .or_else(|| self.frame.globals().remove(name))
    }

    fn location(&self) -> String {
        match self.frame.source_file_id() {
            SourceId::Script { path } | SourceId::Notebook { path, .. } => path.display().to_string(),
            SourceId::Session => "<interactive>".to_string(),
            SourceId::Inline => "<string>".to_string(),
        }
    }

    fn listing(&self) -> Result<String, String> {
        let block = self.frame.enclosing_source().map_err(|e| e.to_string())?;
        let current = self.frame.current_line();
        let mut out = String::new();
        for (offset, line) in block.text.lines().enumerate() {
            let lineno = block.first_line + offset;
            let marker = if lineno == current { "->" } else { "  " };
            out.push_str(&format!("{lineno:>4} {marker} {line}\n"));
        }
        Ok(out)
    }

    fn current_source_line(&self) -> Option<String> {
        let block = self.frame.enclosing_source().ok()?;
        let idx = self.frame.current_line().checked_sub(block.first_line)?;
        block.text.lines().nth(idx).map(|l| l.trim().to_string())
    }

    async fn fail(console: &mut dyn Console, message: String) -> CommandOutcome {
        console.write(&format!("*** {message}\n")).await;
        CommandOutcome::Failed(message)
    }

    fn name_error(name: &str) -> String {
        format!("NameError: name '{name}' is not defined")
    }
}

#[async_trait]
impl LineDebugger for RecordedDebugger {
    fn frame(&self) -> &dyn Frame {
        self.frame.as_ref()
    }

    async fn onecmd(&mut self, line: &str, console: &mut dyn Console) -> CommandOutcome {
        let line = line.trim();
        let (command, arg) = match line.split_once(char::is_whitespace) {
            Some((command, arg)) => (command, arg.trim()),
            None => (line, ""),
        };

        match command {
            "" => CommandOutcome::Continue,
            "q" | "quit" | "exit" | "c" | "cont" | "continue" | "n" | "next" | "s" | "step"
            | "r" | "return" | "unt" | "until" => CommandOutcome::Stop,
            "h" | "help" => {
                console.write(HELP).await;
                CommandOutcome::Continue
            }
            "p" | "pp" if arg.is_empty() => {
                Self::fail(console, "SyntaxError: invalid syntax".to_string()).await
            }
            "p" | "pp" => match self.lookup(arg) {
                Some(value) => {
                    console
                        .write(&format!("{}\n", truncated_repr(&value, PRINT_REPR_LEN)))
                        .await;
                    CommandOutcome::Continue
                }
                None if arg.chars().all(|c| c.is_alphanumeric() || c == '_') => {
                    Self::fail(console, Self::name_error(arg)).await
                }
                None => {
                    Self::fail(
                        console,
                        format!("cannot evaluate '{arg}' in a recorded frame; print a variable by name"),
                    )
                    .await
                }
            },
            "a" | "args" => {
                let mut out = String::new();
                for (name, value) in self.frame.locals() {
                    out.push_str(&format!("{name} = {}\n", truncated_repr(&value, PRINT_REPR_LEN)));
                }
                console.write(&out).await;
                CommandOutcome::Continue
            }
            "l" | "list" | "ll" | "longlist" => match self.listing() {
                Ok(listing) => {
                    console.write(&listing).await;
                    CommandOutcome::Continue
                }
                Err(message) => Self::fail(console, message).await,
            },
            "w" | "where" | "bt" => {
                let mut out = format!("> {}({})\n", self.location(), self.frame.current_line());
                if let Some(source) = self.current_source_line() {
                    out.push_str(&format!("-> {source}\n"));
                }
                console.write(&out).await;
                CommandOutcome::Continue
            }
            name if arg.is_empty() => match self.lookup(name) {
                Some(value) => {
                    console
                        .write(&format!("{}\n", truncated_repr(&value, PRINT_REPR_LEN)))
                        .await;
                    CommandOutcome::Continue
                }
                None => Self::fail(console, Self::name_error(name)).await,
            },
            _ => {
                let first = line
                    .split(|c: char| !(c.is_alphanumeric() || c == '_'))
                    .find(|token| !token.is_empty())
                    .unwrap_or(line);
                if self.lookup(first).is_some() {
                    Self::fail(
                        console,
                        format!("cannot evaluate '{line}' in a recorded frame; print a variable by name"),
                    )
                    .await
                } else {
                    Self::fail(console, Self::name_error(first)).await
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{RecordedFrame, SourceBlock};
    use crate::session::ScriptedConsole;
    use pretty_assertions::assert_eq;

    fn debugger() -> RecordedDebugger {
        RecordedDebugger::new(Arc::new(
            RecordedFrame::new(SourceBlock::new("def f(nums):\n    total = 0\n    return total", 10), 11)
                .with_local("nums", VarValue::List(vec![VarValue::Int(1)]))
                .with_global("limit", VarValue::Int(5)),
        ))
    }

    async fn run(cmd: &str) -> (CommandOutcome, String) {
        let console = ScriptedConsole::new(Vec::<String>::new());
        let mut handle = console.clone();
        let outcome = debugger().onecmd(cmd, &mut handle).await;
        (outcome, console.output())
    }

    #[tokio::test]
    async fn test_print_variables() {
        assert_eq!(run("p nums").await, (CommandOutcome::Continue, "[1]\n".to_string()));
        assert_eq!(run("pp limit").await, (CommandOutcome::Continue, "5\n".to_string()));
        assert_eq!(run("nums").await, (CommandOutcome::Continue, "[1]\n".to_string()));
    }

    #[tokio::test]
    async fn test_unknown_name_is_name_error() {
        let (outcome, output) = run("p missing").await;
        assert_eq!(
            outcome,
            CommandOutcome::Failed("NameError: name 'missing' is not defined".to_string())
        );
        assert_eq!(output, "*** NameError: name 'missing' is not defined\n");

        let (outcome, _) = run("ok that makes sense").await;
        assert!(matches!(outcome, CommandOutcome::Failed(m) if m.contains("'ok'")));
    }

    #[tokio::test]
    async fn test_stepping_stops() {
        for cmd in ["n", "next", "c", "continue", "s", "q", "quit", "exit"] {
            assert_eq!(run(cmd).await.0, CommandOutcome::Stop, "{cmd}");
        }
    }

    #[tokio::test]
    async fn test_list_marks_current_line() {
        let (_, output) = run("l").await;
        assert_eq!(
            output,
            "  10    def f(nums):\n  11 ->     total = 0\n  12        return total\n"
        );
    }

    #[tokio::test]
    async fn test_where_and_args() {
        let (_, output) = run("w").await;
        assert_eq!(output, "> <string>(11)\n-> total = 0\n");
        let (_, output) = run("a").await;
        assert_eq!(output, "nums = [1]\n");
    }
}

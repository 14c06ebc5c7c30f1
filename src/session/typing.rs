//! Live typing of streamed answers

use super::debugger::Console;
use crate::chat::TokenSink;
use async_trait::async_trait;
use colored::Colorize;
use std::time::Duration;

/// Writes each fragment one character at a time, pausing between them.
pub struct LiveTyper<'a> {
    console: &'a mut dyn Console,
    color: &'a str,
    delay: Duration,
    silent: bool,
    typed: usize,
}

impl<'a> LiveTyper<'a> {
    pub fn new(console: &'a mut dyn Console, color: &'a str, delay: Duration, silent: bool) -> Self {
        Self {
            console,
            color,
            delay,
            silent,
            typed: 0,
        }
    }

    /// Characters written so far
    pub fn typed(&self) -> usize {
        self.typed
    }
}

#[async_trait]
impl TokenSink for LiveTyper<'_> {
    async fn on_token(&mut self, token: &str) {
        if self.silent {
            return;
        }
        for c in token.chars() {
            let mut buf = [0u8; 4];
            let text: &str = c.encode_utf8(&mut buf);
            self.console.write(&text.color(self.color).to_string()).await;
            self.typed += 1;
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::debugger::ScriptedConsole;
    use regex::Regex;

    #[tokio::test]
    async fn test_types_every_character() {
        let console = ScriptedConsole::new(Vec::<String>::new());
        let mut handle = console.clone();
        let mut typer = LiveTyper::new(&mut handle, "green", Duration::ZERO, false);
        typer.on_token("Hi ").await;
        typer.on_token("there").await;
        assert_eq!(typer.typed(), 8);
        let plain = Regex::new(r"\x1b\[[0-9;]*m")
            .unwrap()
            .replace_all(&console.output(), "")
            .to_string();
        assert_eq!(plain, "Hi there");
    }

    #[tokio::test]
    async fn test_silent_writes_nothing() {
        let console = ScriptedConsole::new(Vec::<String>::new());
        let mut handle = console.clone();
        let mut typer = LiveTyper::new(&mut handle, "green", Duration::ZERO, true);
        typer.on_token("secret").await;
        assert_eq!(console.output(), "");
    }
}

//! Explaining uncaught errors
//!
//! Hosts report an error through an [`ErrorDispatch`]. When a handler is
//! installed it gets the error message, the formatted stack trace and the
//! frame the error was raised in; [`ExplainingHandler`] runs a one-shot
//! session that explains the error and returns the augmented message.

use crate::cache::CompletionCache;
use crate::chat::ChatBackend;
use crate::frame::Frame;
use crate::replay::RecordedDebugger;
use crate::session::{Console, DuckSession, SessionMode, StdConsole};
use crate::{DuckConfig, DuckError, Result};
use async_trait::async_trait;
use std::sync::{Arc, OnceLock, RwLock};
use tracing::{debug, info, warn};

/// Template used for error explanations
pub const STACK_TRACE_PROMPT: &str = "debug_stack_trace";

/// An uncaught error as reported by the host
#[derive(Clone)]
pub struct ErrorReport {
    /// Error message as the user would see it
    pub message: String,
    /// Full formatted stack trace
    pub stack_trace: String,
    /// Frame the error was raised in
    pub frame: Arc<dyn Frame>,
}

impl ErrorReport {
    pub fn new(message: impl Into<String>, stack_trace: impl Into<String>, frame: Arc<dyn Frame>) -> Self {
        Self {
            message: message.into(),
            stack_trace: stack_trace.into(),
            frame,
        }
    }
}

impl std::fmt::Debug for ErrorReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReport")
            .field("message", &self.message)
            .field("stack_trace", &self.stack_trace)
            .finish_non_exhaustive()
    }
}

/// Options for [`post_mortem`]
#[derive(Debug, Clone)]
pub struct PostMortemOptions {
    /// Session config; `prompt_name` should be a stack-trace template
    pub config: DuckConfig,
    /// Keep the session open for follow-up questions
    pub interactive: bool,
    /// Append the colored diff instead of the plain new code
    pub colordiff: bool,
}

impl Default for PostMortemOptions {
    fn default() -> Self {
        Self {
            config: DuckConfig::new(STACK_TRACE_PROMPT).with_color("red"),
            interactive: false,
            colordiff: true,
        }
    }
}

/// Explain `report` in an auto-explain session and return its message
/// extended with the explanation and revised code.
///
/// The message comes back unchanged when no answer was produced.
pub async fn post_mortem(
    report: ErrorReport,
    options: PostMortemOptions,
    backend: Arc<dyn ChatBackend>,
    cache: CompletionCache,
    console: Box<dyn Console>,
) -> Result<String> {
    if report.stack_trace.trim().is_empty() {
        return Err(DuckError::Config(
            "post_mortem needs the stack trace of the error it explains".to_string(),
        ));
    }
    if !options.config.prompt_name.contains("debug") {
        warn!(
            "Unexpected prompt name {} for post_mortem; did you mean {}?",
            options.config.prompt_name, STACK_TRACE_PROMPT
        );
    }

    let debugger = RecordedDebugger::new(report.frame.clone());
    let mut session = DuckSession::from_config(
        options.config,
        Box::new(debugger),
        console,
        backend,
        cache.clone(),
    )
    .await?
    .with_mode(SessionMode::AutoExplain {
        interactive: options.interactive,
    });
    session.seed_explanation(report.stack_trace.as_str());
    session.run().await;

    if session.answer_count() == 0 {
        debug!("No explanation produced; returning the message unchanged");
        return Ok(report.message);
    }
    let entry = cache.snapshot().await;
    let code = if options.colordiff {
        entry.last_code_diff
    } else {
        entry.last_new_code
    };
    Ok(format!("{}\n\n{}\n\n{}", report.message, entry.last_explanation, code))
}

/// Something that reacts to uncaught errors
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    /// Handle `report`, returning the message to show the user
    async fn handle(&self, report: ErrorReport) -> Result<String>;
}

/// Registry holding at most one error handler
#[derive(Default)]
pub struct ErrorDispatch {
    handler: RwLock<Option<Arc<dyn ErrorHandler>>>,
}

impl ErrorDispatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatch shared by the whole process
    pub fn global() -> &'static ErrorDispatch {
        static GLOBAL: OnceLock<ErrorDispatch> = OnceLock::new();
        GLOBAL.get_or_init(ErrorDispatch::new)
    }

    /// Install `handler`, returning the one it replaces
    pub fn install(&self, handler: Arc<dyn ErrorHandler>) -> Option<Arc<dyn ErrorHandler>> {
        info!("Installing error handler");
        let mut slot = match self.handler.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.replace(handler)
    }

    /// Remove the installed handler, if any
    pub fn uninstall(&self) -> Option<Arc<dyn ErrorHandler>> {
        let mut slot = match self.handler.write() {
            Ok(slot) => slot,
            Err(poisoned) => poisoned.into_inner(),
        };
        slot.take()
    }

    pub fn is_installed(&self) -> bool {
        self.current().is_some()
    }

    fn current(&self) -> Option<Arc<dyn ErrorHandler>> {
        match self.handler.read() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Hand `report` to the installed handler. Without one the message is
    /// returned as is.
    pub async fn dispatch(&self, report: ErrorReport) -> Result<String> {
        match self.current() {
            Some(handler) => handler.handle(report).await,
            None => Ok(report.message),
        }
    }
}

/// Builds the console each handled error talks to
pub type ConsoleFactory = Arc<dyn Fn() -> Box<dyn Console> + Send + Sync>;

/// Handler that explains errors with [`post_mortem`], automatically or
/// after asking.
pub struct ExplainingHandler {
    backend: Arc<dyn ChatBackend>,
    cache: CompletionCache,
    options: PostMortemOptions,
    auto: bool,
    console_factory: ConsoleFactory,
}

impl ExplainingHandler {
    pub fn new(backend: Arc<dyn ChatBackend>, cache: CompletionCache) -> Self {
        Self {
            backend,
            cache,
            options: PostMortemOptions::default(),
            auto: false,
            console_factory: Arc::new(|| Box::new(StdConsole::new()) as Box<dyn Console>),
        }
    }

    /// Explain without asking first
    pub fn with_auto(mut self, auto: bool) -> Self {
        self.auto = auto;
        self
    }

    pub fn with_options(mut self, options: PostMortemOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_console_factory(mut self, factory: ConsoleFactory) -> Self {
        self.console_factory = factory;
        self
    }

    async fn confirm(console: &mut dyn Console) -> bool {
        loop {
            let Some(answer) = console.read_line("Explain error message? [y/n]\n").await else {
                return false;
            };
            match answer.trim().to_lowercase().as_str() {
                "y" | "yes" => return true,
                "n" | "no" => return false,
                _ => {
                    console
                        .write("Unrecognized command. Valid choices are \"y\" or \"n\".\n\n")
                        .await
                }
            }
        }
    }
}

#[async_trait]
impl ErrorHandler for ExplainingHandler {
    async fn handle(&self, report: ErrorReport) -> Result<String> {
        let mut console = (self.console_factory)();
        if !self.options.config.silent {
            console.write(&format!("{}\n", report.stack_trace)).await;
        }
        if !self.auto && !Self::confirm(console.as_mut()).await {
            return Ok(report.message);
        }
        post_mortem(
            report,
            self.options.clone(),
            self.backend.clone(),
            self.cache.clone(),
            console,
        )
        .await
    }
}

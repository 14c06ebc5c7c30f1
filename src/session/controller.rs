use super::classify::{has_dev_marker, looks_like_syntax_or_name_error, strip_dev_marker, InputClassifier};
use super::debugger::{CommandOutcome, Console, LineDebugger};
use super::typing::LiveTyper;
use super::{InputLine, SessionMode, SessionState};
use crate::cache::{CacheEntry, CompletionCache};
use crate::chat::{ChatBackend, Conversation};
use crate::context::{fields, ContextExtractor};
use crate::diff::colordiff_new_str;
use crate::parse::{default_parse_fn, ParseFn};
use crate::prompt::{PromptAssembler, PromptTemplate};
use crate::{DuckConfig, Result};
use colored::Colorize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Printed before every answer
pub const DUCK_PROMPT: &str = "[Duck] ";

/// Shown when the model returns nothing
pub const FALLBACK_ANSWER: &str = "Sorry, I don't know. Can you try rephrasing your question?";

/// Seeded in auto-explain mode. Stack-trace templates don't declare a
/// question field, so this only reaches the model if a custom template asks
/// for it.
pub const AUTO_EXPLAIN_QUESTION: &str = "This is a placeholder question that makes sure the \
     language model gets called. It should be removed from the prompt before the call. \
     If you can read this, can you mention that in your response?";

const COMMAND_HINT: &str = "If you meant to respond to Duck in natural language, start your \
     reply with '>' or include a question mark.";

/// Conversational wrapper around one paused debugger
pub struct DuckSession {
    config: DuckConfig,
    debugger: Box<dyn LineDebugger>,
    console: Box<dyn Console>,
    backend: Arc<dyn ChatBackend>,
    conversation: Conversation,
    assembler: PromptAssembler,
    extractor: ContextExtractor,
    classifier: InputClassifier,
    cache: CompletionCache,
    parse_fn: ParseFn,
    mode: SessionMode,
    state: SessionState,
    cmdqueue: VecDeque<InputLine>,
    answers: usize,
}

impl DuckSession {
    pub fn new(
        config: DuckConfig,
        template: PromptTemplate,
        debugger: Box<dyn LineDebugger>,
        console: Box<dyn Console>,
        backend: Arc<dyn ChatBackend>,
        cache: CompletionCache,
    ) -> Self {
        let extractor = ContextExtractor::new(config.max_len_per_var)
            .with_pause_primitive(config.pause_primitive.clone());
        Self {
            conversation: Conversation::new(template),
            config,
            debugger,
            console,
            backend,
            assembler: PromptAssembler::new(),
            extractor,
            classifier: InputClassifier::new(),
            cache,
            parse_fn: default_parse_fn(),
            mode: SessionMode::Interactive,
            state: SessionState::Stepping,
            cmdqueue: VecDeque::new(),
            answers: 0,
        }
    }

    /// Load `config.prompt_name` and apply the config's model overrides
    pub async fn from_config(
        config: DuckConfig,
        debugger: Box<dyn LineDebugger>,
        console: Box<dyn Console>,
        backend: Arc<dyn ChatBackend>,
        cache: CompletionCache,
    ) -> Result<Self> {
        let mut template = PromptTemplate::load(&config.prompt_name).await?;
        let params = template.completion_mut();
        if let Some(model) = &config.model_name {
            params.model = model.clone();
        }
        if let Some(max_tokens) = config.max_tokens {
            params.max_tokens = max_tokens;
        }
        if let Some(stream) = config.stream {
            params.stream = stream;
        }
        info!("Using template {} with model {}", template.name(), template.completion().model);
        Ok(Self::new(config, template, debugger, console, backend, cache))
    }

    pub fn with_mode(mut self, mode: SessionMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_parse_fn(mut self, parse_fn: ParseFn) -> Self {
        self.parse_fn = parse_fn;
        self
    }

    pub fn with_classifier(mut self, classifier: InputClassifier) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_extractor(mut self, extractor: ContextExtractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn with_conversation(mut self, conversation: Conversation) -> Self {
        self.conversation = conversation;
        self
    }

    pub fn mode(&self) -> SessionMode {
        self.mode
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn cache(&self) -> &CompletionCache {
        &self.cache
    }

    pub fn config(&self) -> &DuckConfig {
        &self.config
    }

    /// Questions answered successfully in this session
    pub fn answer_count(&self) -> usize {
        self.answers
    }

    /// Fields a variant of the active template needs (empty key: default)
    pub fn field_names(&self, key: &str) -> Result<Vec<String>> {
        Ok(self
            .conversation
            .template()
            .field_names(key)?
            .iter()
            .cloned()
            .collect())
    }

    /// Queue a line to run before reading from the console
    pub fn push_input(&mut self, line: impl Into<InputLine>) {
        self.cmdqueue.push_back(line.into());
    }

    /// Queue the synthetic explain-this-error question, followed by a quit
    /// unless the session is interactive.
    pub fn seed_explanation(&mut self, stack_trace: impl Into<String>) {
        self.cmdqueue.push_front(InputLine::WithTrace {
            text: AUTO_EXPLAIN_QUESTION.to_string(),
            stack_trace: stack_trace.into(),
        });
        let interactive = match self.mode {
            SessionMode::AutoExplain { interactive } => interactive,
            SessionMode::Interactive => true,
        };
        if !interactive {
            self.cmdqueue.insert(1, InputLine::from("q"));
        }
    }

    /// Interpret one input line.
    ///
    /// Questions return `Continue` once answered; debugger commands return
    /// whatever the debugger decided.
    pub async fn onecmd(&mut self, line: InputLine) -> Result<CommandOutcome> {
        let (text, stack_trace) = line.into_parts();

        if self.debugger.is_defining_commands() {
            return Ok(self
                .debugger
                .handle_command_def(&text, self.console.as_mut())
                .await);
        }

        if !stack_trace.is_empty() || self.classifier.is_conversational(&text) {
            let verbose = has_dev_marker(&text);
            let question = strip_dev_marker(&text);
            let question = question.strip_prefix('>').unwrap_or(question).trim();
            self.state = SessionState::Answering;
            let result = self.ask_language_model(question, &stack_trace, verbose).await;
            self.state = SessionState::AwaitingInput;
            result?;
            return Ok(CommandOutcome::Continue);
        }

        let outcome = self
            .debugger
            .onecmd(strip_dev_marker(&text), self.console.as_mut())
            .await;
        if let CommandOutcome::Failed(message) = &outcome {
            if looks_like_syntax_or_name_error(message) {
                self.console
                    .write(&format!("{}\n", COMMAND_HINT.color(self.config.dev_color())))
                    .await;
            }
        }
        Ok(outcome)
    }

    /// Answer `question` about the paused frame and cache the exchange
    pub async fn ask_language_model(&mut self, question: &str, stack_trace: &str, verbose: bool) -> Result<()> {
        let full_context = self.conversation.template().needs_full_context();
        let extraction = self
            .extractor
            .extract_scoped(self.debugger.frame(), full_context, self.config.full_context)
            .await;
        for err in &extraction.errors {
            self.console
                .write(&format!("*** {}\n", err.to_string().color(self.config.dev_color())))
                .await;
        }

        let assembled = self.assembler.assemble(
            extraction.snapshot,
            question,
            stack_trace,
            self.conversation.template(),
        )?;
        debug!(
            "Asking with variant {} ({} fields)",
            assembled.key,
            assembled.fields.len()
        );

        if verbose {
            let prompt = self.conversation.user_message(&assembled.key, &assembled.fields)?;
            self.console
                .write(&format!("{}\n", prompt.color(self.config.dev_color())))
                .await;
        }
        let silent = self.config.silent;
        if !silent {
            self.console
                .write(&DUCK_PROMPT.color(self.config.color.as_str()).to_string())
                .await;
        }

        let reply = {
            let mut typer = LiveTyper::new(
                self.console.as_mut(),
                &self.config.color,
                self.config.typing_delay,
                silent,
            );
            self.conversation
                .send(self.backend.as_ref(), &assembled.fields, &assembled.key, &mut typer)
                .await?
        };

        let mut answer = reply.trim().to_string();
        if answer.is_empty() {
            answer = FALLBACK_ANSWER.to_string();
            if !silent {
                self.console
                    .write(&FALLBACK_ANSWER.color(self.config.color.as_str()).to_string())
                    .await;
            }
        }
        if !silent {
            self.console.write("\n").await;
        }

        let parsed = (self.parse_fn)(&answer)?;
        let old_code = assembled
            .fields
            .get(fields::CODE)
            .cloned()
            .unwrap_or_default();
        self.cache
            .update(CacheEntry {
                last_code_diff: colordiff_new_str(&old_code, &parsed.code, "green"),
                last_completion: answer,
                last_explanation: parsed.explanation,
                last_code: old_code,
                last_new_code: parsed.code,
                last_extra: parsed.extra,
            })
            .await;
        self.assembler.commit(assembled.snapshot_hash);
        self.answers += 1;
        Ok(())
    }

    /// Read-eval loop: queued lines first, then the console, until the
    /// debugger stops or input runs out.
    pub async fn run(&mut self) {
        self.state = SessionState::AwaitingInput;
        loop {
            let line = match self.cmdqueue.pop_front() {
                Some(line) => line,
                None => {
                    let prompt = self.debugger.prompt().to_string();
                    match self.console.read_line(&prompt).await {
                        Some(text) => InputLine::Text(text),
                        None => break,
                    }
                }
            };

            match self.onecmd(line).await {
                Ok(CommandOutcome::Stop) => break,
                Ok(_) => {}
                Err(e) => {
                    warn!("Question failed: {}", e);
                    self.console
                        .write(&format!("*** {}\n", e.to_string().color(self.config.dev_color())))
                        .await;
                }
            }
        }
        self.state = SessionState::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chat::{ChatMessage, DummyBackend};
    use crate::frame::{RecordedFrame, SourceBlock, VarValue};
    use crate::prompt::CompletionParams;
    use crate::replay::RecordedDebugger;
    use crate::session::debugger::ScriptedConsole;
    use crate::DuckError;
    use async_trait::async_trait;
    use std::time::Duration;

    struct FixedBackend(String);

    #[async_trait]
    impl ChatBackend for FixedBackend {
        async fn complete(&self, _: &[ChatMessage], _: &CompletionParams) -> Result<String> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    struct FailingBackend;

    #[async_trait]
    impl ChatBackend for FailingBackend {
        async fn complete(&self, _: &[ChatMessage], _: &CompletionParams) -> Result<String> {
            Err(DuckError::ModelCall("service unavailable".to_string()))
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn frame() -> Arc<RecordedFrame> {
        Arc::new(
            RecordedFrame::new(SourceBlock::new("for i in range(4)\n    i", 1), 2)
                .with_local("i", VarValue::Int(3)),
        )
    }

    /// Collects lines typed while a command block is being defined
    struct BlockDebugger {
        frame: RecordedFrame,
        lines: Arc<std::sync::Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl LineDebugger for BlockDebugger {
        fn frame(&self) -> &dyn crate::frame::Frame {
            &self.frame
        }

        fn is_defining_commands(&self) -> bool {
            true
        }

        async fn handle_command_def(&mut self, line: &str, _: &mut dyn Console) -> CommandOutcome {
            if let Ok(mut lines) = self.lines.lock() {
                lines.push(line.to_string());
            }
            CommandOutcome::Continue
        }

        async fn onecmd(&mut self, _: &str, _: &mut dyn Console) -> CommandOutcome {
            CommandOutcome::Failed("not reached".to_string())
        }
    }

    async fn session(backend: Arc<dyn ChatBackend>, console: &ScriptedConsole) -> DuckSession {
        session_with(DuckConfig::default(), backend, console).await
    }

    async fn session_with(
        config: DuckConfig,
        backend: Arc<dyn ChatBackend>,
        console: &ScriptedConsole,
    ) -> DuckSession {
        DuckSession::from_config(
            config.with_typing_delay(Duration::ZERO),
            Box::new(RecordedDebugger::new(frame())),
            Box::new(console.clone()),
            backend,
            CompletionCache::new(),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_commands_pass_through() {
        let console = ScriptedConsole::new(Vec::<String>::new());
        let mut s = session(Arc::new(DummyBackend), &console).await;
        assert_eq!(s.onecmd("p i".into()).await.unwrap(), CommandOutcome::Continue);
        assert_eq!(s.onecmd("q".into()).await.unwrap(), CommandOutcome::Stop);
        assert_eq!(s.conversation().len(), 1);
        assert!(console.output().contains("3\n"));
    }

    #[tokio::test]
    async fn test_failed_command_prints_hint() {
        let console = ScriptedConsole::new(Vec::<String>::new());
        let mut s = session(Arc::new(DummyBackend), &console).await;
        let outcome = s.onecmd("ok that makes sense".into()).await.unwrap();
        assert!(matches!(outcome, CommandOutcome::Failed(_)));
        assert!(console
            .output()
            .contains("If you meant to respond to Duck in natural language"));
    }

    #[tokio::test]
    async fn test_question_updates_cache_and_history() {
        let console = ScriptedConsole::new(Vec::<String>::new());
        let reply = "The loop body only evaluates i.\n```\nfor i in range(4):\n    print(i)\n```";
        let mut s = session(Arc::new(FixedBackend(reply.to_string())), &console).await;
        let outcome = s.onecmd("why is i not being displayed?".into()).await.unwrap();
        assert_eq!(outcome, CommandOutcome::Continue);
        assert_eq!(s.answer_count(), 1);
        assert_eq!(s.conversation().len(), 3);

        let entry = s.cache().snapshot().await;
        assert_eq!(entry.last_code, "for i in range(4)\n    i");
        assert_eq!(entry.last_new_code, "for i in range(4):\n    print(i)");
        assert_eq!(entry.last_explanation, "The loop body only evaluates i.");
        assert!(console.output().contains(DUCK_PROMPT));
    }

    #[tokio::test]
    async fn test_follow_up_withholds_context() {
        let console = ScriptedConsole::new(Vec::<String>::new());
        let mut s = session(Arc::new(DummyBackend), &console).await;
        s.onecmd("why is i 3?".into()).await.unwrap();
        s.onecmd("and why not 4?".into()).await.unwrap();
        let turns = s.conversation().turns();
        assert!(turns[1].content.contains("LOCAL VARIABLES"));
        assert_eq!(turns[3].content, "QUESTION:\nand why not 4?");
        // Follow-ups have no code to diff against.
        assert_eq!(s.cache().snapshot().await.last_code, "");
    }

    #[tokio::test]
    async fn test_empty_reply_uses_fallback() {
        let console = ScriptedConsole::new(Vec::<String>::new());
        let mut s = session(Arc::new(FixedBackend("  \n".to_string())), &console).await;
        s.onecmd("what now?".into()).await.unwrap();
        assert_eq!(s.cache().snapshot().await.last_completion, FALLBACK_ANSWER);
        assert!(console.output().contains("Sorry, I don't know."));
    }

    #[tokio::test]
    async fn test_model_failure_keeps_session_alive() {
        let console = ScriptedConsole::new(["why is i 3?", "p i", "q"]);
        let mut s = session(Arc::new(FailingBackend), &console).await;
        s.run().await;
        assert_eq!(s.state(), SessionState::Done);
        assert_eq!(s.conversation().len(), 1);
        let output = console.output();
        assert!(output.contains("service unavailable"));
        assert!(output.contains(">>> p i\n3\n"));
    }

    #[tokio::test]
    async fn test_dev_marker_prints_prompt() {
        let console = ScriptedConsole::new(Vec::<String>::new());
        let mut s = session(Arc::new(DummyBackend), &console).await;
        s.onecmd("[dev] why is i 3?".into()).await.unwrap();
        let turns = s.conversation().turns();
        assert!(turns[1].content.contains("QUESTION:\nwhy is i 3?"));
        assert!(console.output().contains("CURRENT CODE SNIPPET"));
    }

    #[tokio::test]
    async fn test_seeded_explanation_without_trace_field_fails_then_quits() {
        // The plain debug template declares no stack_trace field.
        let console = ScriptedConsole::new(["p i"]);
        let mut s = session(Arc::new(DummyBackend), &console)
            .await
            .with_mode(SessionMode::AutoExplain { interactive: false });
        s.seed_explanation("Traceback: boom");
        s.run().await;
        assert_eq!(s.answer_count(), 0);
        assert!(console.output().contains("stack_trace"));
        // The queued quit ends the session before the console is read.
        assert!(!console.output().contains("p i"));
    }

    #[tokio::test]
    async fn test_scope_override_keeps_fields_valid() {
        let console = ScriptedConsole::new(Vec::<String>::new());
        let config = DuckConfig::new("debug").with_full_context(true);
        let mut s = session_with(config, Arc::new(DummyBackend), &console).await;
        s.onecmd("why is i 3?".into()).await.unwrap();
        assert_eq!(s.answer_count(), 1);
        assert!(!console.output().contains("*** "));
    }

    #[tokio::test]
    async fn test_full_template_gets_full_code_without_override() {
        let console = ScriptedConsole::new(Vec::<String>::new());
        let mut s = session_with(DuckConfig::new("debug_full"), Arc::new(DummyBackend), &console).await;
        s.onecmd("why is i 3?".into()).await.unwrap();
        // Inline source has no file, so full_code is empty but declared.
        assert_eq!(s.answer_count(), 1);
        assert!(console.output().contains("*** "));
        assert!(s.conversation().turns()[1].content.contains("FULL unknown:"));
    }

    #[tokio::test]
    async fn test_command_block_lines_skip_the_model() {
        let console = ScriptedConsole::new(Vec::<String>::new());
        let lines = Arc::new(std::sync::Mutex::new(Vec::new()));
        let debugger = BlockDebugger {
            frame: RecordedFrame::new(SourceBlock::new("x = 1", 1), 1),
            lines: lines.clone(),
        };
        let mut s = DuckSession::from_config(
            DuckConfig::default(),
            Box::new(debugger),
            Box::new(console.clone()),
            Arc::new(DummyBackend),
            CompletionCache::new(),
        )
        .await
        .unwrap();
        let outcome = s.onecmd("p 'why is x 1?'".into()).await.unwrap();
        assert_eq!(outcome, CommandOutcome::Continue);
        assert_eq!(*lines.lock().unwrap(), vec!["p 'why is x 1?'".to_string()]);
        assert_eq!(s.conversation().len(), 1);
        assert_eq!(s.answer_count(), 0);
    }

    #[tokio::test]
    async fn test_dev_marker_stripped_before_debugger() {
        let console = ScriptedConsole::new(Vec::<String>::new());
        let mut s = session(Arc::new(DummyBackend), &console).await;
        let outcome = s.onecmd("[dev] p i".into()).await.unwrap();
        assert_eq!(outcome, CommandOutcome::Continue);
        assert_eq!(console.output(), "3\n");
    }

    #[tokio::test]
    async fn test_dev_marker_does_not_unsilence() {
        let console = ScriptedConsole::new(Vec::<String>::new());
        let config = DuckConfig::default().with_silent(true);
        let mut s = session_with(config, Arc::new(DummyBackend), &console).await;
        s.onecmd("[dev] why is i 3?".into()).await.unwrap();
        let output = console.output();
        assert!(output.contains("CURRENT CODE SNIPPET"));
        assert!(!output.contains(DUCK_PROMPT));
        assert!(!output.contains("THIS CODE SNIPPET"));
        assert_eq!(s.answer_count(), 1);
    }
}

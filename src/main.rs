//! Debugduck CLI
//!
//! Runs a conversational debugging session over a recorded frame.

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use debugduck::config::{self, UserConfig};
use debugduck::errors::{post_mortem, ErrorReport, PostMortemOptions};
use debugduck::prompt::available_templates;
use debugduck::replay::RecordedDebugger;
use debugduck::session::{DuckSession, SessionMode, StdConsole};
use debugduck::{ChatBackend, CompletionCache, DuckConfig, DummyBackend, OpenAiBackend, RecordedFrame};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Debugduck - ask questions about a paused program in plain English
#[derive(Parser, Debug)]
#[command(name = "debugduck")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Verbose output: debug logs on stderr
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Open a session over a recorded frame
    Ask {
        #[command(flatten)]
        session: SessionArgs,

        /// Questions or commands to run before quitting (interactive if none)
        #[arg(trailing_var_arg = true)]
        lines: Vec<String>,
    },
    /// Explain an error raised in a recorded frame
    Explain {
        #[command(flatten)]
        session: SessionArgs,

        /// File holding the formatted stack trace
        #[arg(long)]
        trace: PathBuf,

        /// Error message; defaults to the last line of the trace
        #[arg(long)]
        message: Option<String>,

        /// Keep the session open for follow-up questions
        #[arg(long)]
        interactive: bool,

        /// Print the plain revised code instead of a colored diff
        #[arg(long)]
        no_colordiff: bool,
    },
    /// List built-in prompt templates
    Templates,
    /// Show or update the user config file
    Config {
        /// Default model name (empty string removes it)
        #[arg(long)]
        model_name: Option<String>,

        /// API key (empty string removes it)
        #[arg(long)]
        api_key: Option<String>,
    },
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Recorded frame JSON file
    #[arg(long)]
    frame: PathBuf,

    /// Built-in template name or path to a template TOML file
    #[arg(long)]
    prompt: Option<String>,

    /// Model name; overrides the config file and the template
    #[arg(long)]
    model: Option<String>,

    #[arg(long)]
    max_tokens: Option<u32>,

    /// Character budget per variable repr
    #[arg(long, default_value_t = 79)]
    max_len_per_var: usize,

    /// Don't type answers out
    #[arg(long)]
    silent: bool,

    /// Pick variables from the whole source file, not just the current function
    #[arg(long)]
    full_context: bool,

    /// API key; falls back to OPENAI_API_KEY then the config file
    #[arg(long)]
    api_key: Option<String>,

    /// Use the offline echo backend instead of a real model
    #[arg(long)]
    dummy: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Command::Ask { session, lines } => run_ask(session, lines).await,
        Command::Explain {
            session,
            trace,
            message,
            interactive,
            no_colordiff,
        } => run_explain(session, &trace, message, interactive, !no_colordiff).await,
        Command::Templates => {
            for name in available_templates() {
                println!("{name}");
            }
            Ok(())
        }
        Command::Config {
            model_name,
            api_key,
        } => run_config(model_name, api_key).await,
    }
}

async fn run_ask(args: SessionArgs, lines: Vec<String>) -> anyhow::Result<()> {
    let user_config = config::load_config().await?;
    let duck_config = session_config(&args, "debug", &user_config);
    let backend = make_backend(&args, &user_config)?;
    let frame = load_frame(&args.frame).await?;

    let mut session = DuckSession::from_config(
        duck_config,
        Box::new(RecordedDebugger::new(frame)),
        Box::new(StdConsole::new()),
        backend,
        CompletionCache::new(),
    )
    .await?
    .with_mode(SessionMode::Interactive);

    if !lines.is_empty() {
        for line in lines {
            session.push_input(line);
        }
        session.push_input("q");
    }
    info!("Starting session over {}", args.frame.display());
    session.run().await;
    Ok(())
}

async fn run_explain(
    args: SessionArgs,
    trace_path: &Path,
    message: Option<String>,
    interactive: bool,
    colordiff: bool,
) -> anyhow::Result<()> {
    let user_config = config::load_config().await?;
    let trace = tokio::fs::read_to_string(trace_path)
        .await
        .with_context(|| format!("Failed to read stack trace {}", trace_path.display()))?;
    let message = message.unwrap_or_else(|| last_line(&trace).to_string());

    let options = PostMortemOptions {
        config: session_config(&args, "debug_stack_trace", &user_config).with_color("red"),
        interactive,
        colordiff,
    };
    let backend = make_backend(&args, &user_config)?;
    let frame = load_frame(&args.frame).await?;

    let explained = post_mortem(
        ErrorReport::new(message, trace, frame),
        options,
        backend,
        CompletionCache::new(),
        Box::new(StdConsole::new()),
    )
    .await?;
    println!("\n{explained}");
    Ok(())
}

async fn run_config(model_name: Option<String>, api_key: Option<String>) -> anyhow::Result<()> {
    let mut updates = BTreeMap::new();
    if let Some(model) = model_name {
        updates.insert("model_name".to_string(), model);
    }
    if let Some(key) = api_key {
        updates.insert("openai_api_key".to_string(), key);
    }

    let path = config::config_path()?;
    if !updates.is_empty() {
        config::update_config(&updates).await?;
        println!("Updated {}", path.display());
    }

    let current = config::load_config().await?;
    println!("model_name = {}", current.model_name.as_deref().unwrap_or("<template default>"));
    println!(
        "openai_api_key = {}",
        if current.openai_api_key.is_some() { "<set>" } else { "<unset>" }
    );
    Ok(())
}

fn session_config(args: &SessionArgs, default_prompt: &str, user_config: &UserConfig) -> DuckConfig {
    let mut duck_config = DuckConfig::new(args.prompt.as_deref().unwrap_or(default_prompt))
        .with_max_len_per_var(args.max_len_per_var)
        .with_silent(args.silent);
    if args.full_context {
        duck_config = duck_config.with_full_context(true);
    }
    if let Some(model) = args.model.as_deref().or(user_config.model_name.as_deref()) {
        duck_config = duck_config.with_model_name(model);
    }
    if let Some(max_tokens) = args.max_tokens {
        duck_config = duck_config.with_max_tokens(max_tokens);
    }
    duck_config
}

fn make_backend(args: &SessionArgs, user_config: &UserConfig) -> anyhow::Result<Arc<dyn ChatBackend>> {
    if args.dummy {
        return Ok(Arc::new(DummyBackend::new()));
    }
    let api_key = config::resolve_api_key(args.api_key.as_deref(), user_config).ok_or_else(|| {
        anyhow::anyhow!(
            "No API key found. Pass --api-key, set {}, or run `debugduck config --api-key ...`",
            config::API_KEY_ENV
        )
    })?;
    Ok(Arc::new(OpenAiBackend::new(api_key)?))
}

async fn load_frame(path: &Path) -> anyhow::Result<Arc<RecordedFrame>> {
    let frame = RecordedFrame::load(path)
        .await
        .with_context(|| format!("Failed to load frame {}", path.display()))?;
    Ok(Arc::new(frame))
}

fn last_line(text: &str) -> &str {
    text.lines().rev().find(|l| !l.trim().is_empty()).unwrap_or("").trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_ask() {
        let cli = Cli::try_parse_from([
            "debugduck", "ask", "--frame", "f.json", "--dummy", "why is i 3?",
        ])
        .unwrap();
        match cli.command {
            Command::Ask { session, lines } => {
                assert!(session.dummy);
                assert_eq!(session.max_len_per_var, 79);
                assert_eq!(lines, vec!["why is i 3?".to_string()]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_last_line_of_trace() {
        assert_eq!(
            last_line("Traceback (most recent call last):\n  ...\nKeyError: 'a'\n\n"),
            "KeyError: 'a'"
        );
        assert_eq!(last_line(""), "");
    }

    #[test]
    fn test_session_config_model_priority() {
        let cli = Cli::try_parse_from(["debugduck", "ask", "--frame", "f.json"]).unwrap();
        let Command::Ask { session, .. } = cli.command else {
            panic!("expected ask");
        };
        let user = UserConfig {
            model_name: Some("gpt-4".to_string()),
            openai_api_key: None,
        };
        let duck_config = session_config(&session, "debug", &user);
        assert_eq!(duck_config.model_name.as_deref(), Some("gpt-4"));
        assert_eq!(duck_config.prompt_name, "debug");
    }

    #[test]
    fn test_full_context_only_when_flag_given() {
        let parse = |extra: &[&str]| {
            let mut argv = vec!["debugduck", "ask", "--frame", "f.json"];
            argv.extend_from_slice(extra);
            match Cli::try_parse_from(argv).unwrap().command {
                Command::Ask { session, .. } => session_config(&session, "debug", &UserConfig::default()),
                other => panic!("unexpected command {other:?}"),
            }
        };
        assert!(!parse(&[]).full_context);
        assert!(parse(&["--full-context"]).full_context);
        assert_eq!(parse(&["--full-context"]).prompt_name, "debug");
    }
}

//! Splitting a completion into explanation and code

use crate::{DuckError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

/// Structured view of a completion
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ParsedCompletion {
    pub explanation: String,
    pub code: String,
    #[serde(default)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Replaceable completion parser
pub type ParseFn = Arc<dyn Fn(&str) -> Result<ParsedCompletion> + Send + Sync>;

/// The default parser as a [`ParseFn`]
pub fn default_parse_fn() -> ParseFn {
    Arc::new(parse_completion)
}

/// Fenced blocks found in a completion
#[derive(Debug, Clone, PartialEq)]
pub enum CodeSnippets {
    /// All blocks joined; numbered `# 1`, `# 2`, ... when there are several
    Joined(String),
    Blocks(Vec<String>),
}

fn fence_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)```(?:python)?\n(.*?)\n```").expect("valid regex"))
}

/// Pull fenced code out of `text`
pub fn extract_code(text: &str, join_multi: bool) -> CodeSnippets {
    let chunks: Vec<String> = fence_pattern()
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect();
    if !join_multi {
        return CodeSnippets::Blocks(chunks);
    }
    if chunks.len() <= 1 {
        return CodeSnippets::Joined(chunks.concat());
    }
    let joined: String = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| format!("\n\n# {}\n{chunk}", i + 1))
        .collect();
    CodeSnippets::Joined(joined.trim_start().to_string())
}

/// Explanation is everything before the first fence; code is the joined
/// fenced blocks.
pub fn parse_completion(text: &str) -> Result<ParsedCompletion> {
    let explanation = text
        .split_once("\n```")
        .map(|(head, _)| head)
        .unwrap_or(text)
        .to_string();
    let code = match extract_code(text, true) {
        CodeSnippets::Joined(code) => code,
        CodeSnippets::Blocks(blocks) => blocks.concat(),
    };
    Ok(ParsedCompletion {
        explanation,
        code,
        extra: serde_json::Map::new(),
    })
}

/// Parser for templates that ask the model to answer in JSON:
/// `{"explanation": ..., "code": ..., "extra": {...}}`.
pub fn parse_json_completion(text: &str) -> Result<ParsedCompletion> {
    let body = text.trim();
    let body = body
        .strip_prefix("```json")
        .and_then(|rest| rest.strip_suffix("```"))
        .unwrap_or(body);
    serde_json::from_str(body.trim())
        .map_err(|e| DuckError::Parse(format!("expected a JSON object with explanation and code: {e}")))
}

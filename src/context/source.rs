//! Source text helpers: pause-call stripping, next-line lookup, notebook
//! and interactive-session loading.

use crate::{DuckError, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;
use tracing::{debug, warn};

/// Names the REPL injects that never matter to the user's question.
const REPL_INTERNAL_NAMES: &[&str] = &["In", "Out", "_dh", "_ih", "_ii", "_iii", "_oh"];

/// Poll interval while waiting for a notebook save to land on disk
const SAVE_POLL_INTERVAL: Duration = Duration::from_millis(250);

fn is_pause_call(line: &str, primitive: &str) -> bool {
    line.trim_start()
        .strip_prefix(primitive)
        .is_some_and(|rest| rest.starts_with('('))
}

/// Remove every line that invokes the pause primitive.
///
/// Only lines that *start* with the call are removed; a mention inside a
/// comment or string survives.
pub fn strip_pause_calls(code: &str, primitive: &str) -> String {
    code.lines()
        .filter(|line| !is_pause_call(line, primitive))
        .collect::<Vec<_>>()
        .join("\n")
}

/// The line about to execute, skipping pause-primitive calls.
///
/// `current_line` is 1-indexed in file coordinates and `first_line` is the
/// file line of the block's first line. Returns an empty string when the
/// scan runs off the end of the block.
pub fn next_line(block: &str, first_line: usize, current_line: usize, primitive: &str) -> String {
    let Some(mut idx) = current_line.checked_sub(first_line.max(1)) else {
        return String::new();
    };
    let lines: Vec<&str> = block.lines().collect();
    while let Some(line) = lines.get(idx) {
        if !is_pause_call(line, primitive) {
            return line.to_string();
        }
        idx += 1;
    }
    String::new()
}

/// True for REPL bookkeeping names like `_`, `__`, `_7`, `_i3`, `Out`.
pub fn is_repl_internal_name(name: &str) -> bool {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"^_{1,2}i?\d*$").expect("valid regex"));
    re.is_match(name) || name.trim_matches('_').is_empty() || REPL_INTERNAL_NAMES.contains(&name)
}

/// Identifier-like tokens appearing in `code`.
pub fn identifier_tokens(code: &str) -> HashSet<&str> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let re = PATTERN.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("valid regex"));
    re.find_iter(code).map(|m| m.as_str()).collect()
}

// ─── Notebooks ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct NotebookJson {
    cells: Vec<NotebookCell>,
}

#[derive(Debug, Deserialize)]
struct NotebookCell {
    cell_type: String,
    #[serde(default)]
    source: CellSource,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CellSource {
    Lines(Vec<String>),
    Text(String),
}

impl Default for CellSource {
    fn default() -> Self {
        CellSource::Text(String::new())
    }
}

impl CellSource {
    fn joined(&self) -> String {
        match self {
            CellSource::Lines(lines) => lines.concat(),
            CellSource::Text(text) => text.clone(),
        }
    }
}

/// Concatenate a notebook's cells; code cells are fenced in backticks.
pub fn format_notebook(json: &str) -> Result<String> {
    let notebook: NotebookJson = serde_json::from_str(json)?;
    let mut out = String::new();
    for cell in &notebook.cells {
        let source = cell.source.joined();
        if source.is_empty() {
            continue;
        }
        if cell.cell_type == "code" {
            out.push_str(&format!("\n```\n{source}\n```\n"));
        } else {
            out.push_str(&format!("\n{source}\n"));
        }
    }
    Ok(out)
}

/// Load and format a notebook file
pub async fn load_notebook(path: &Path) -> Result<String> {
    let json = tokio::fs::read_to_string(path).await.map_err(|e| {
        DuckError::Extraction(format!("could not read notebook {}: {e}", path.display()))
    })?;
    format_notebook(&json)
}

/// Format interactive-session cells, each fenced in backticks.
pub fn format_session_history(cells: &[String]) -> String {
    cells
        .iter()
        .map(|cell| cell.trim())
        .filter(|cell| !cell.is_empty())
        .map(|cell| format!("```\n{cell}\n```"))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Asks the notebook host to save the notebook we are running in.
#[async_trait]
pub trait NotebookSaver: Send + Sync {
    async fn request_save(&self, path: &Path) -> Result<()>;
}

async fn file_digest(path: &Path) -> Result<String> {
    let bytes = tokio::fs::read(path).await?;
    Ok(hex::encode(Sha256::digest(&bytes)))
}

/// Ask `saver` to save `path`, then wait until its content changes.
///
/// Returns `Ok(false)` if the file did not change before `timeout`; the
/// caller then reads whatever is on disk.
pub async fn save_and_wait(saver: &dyn NotebookSaver, path: &Path, timeout: Duration) -> Result<bool> {
    let before = file_digest(path).await?;
    saver.request_save(path).await?;

    let waited = tokio::time::timeout(timeout, async {
        loop {
            tokio::time::sleep(SAVE_POLL_INTERVAL).await;
            match file_digest(path).await {
                Ok(current) if current != before => return,
                Ok(_) => {}
                Err(e) => debug!("Notebook digest failed while waiting for save: {}", e),
            }
        }
    })
    .await;

    if waited.is_err() {
        warn!(
            "Notebook {} did not change within {:?} of requesting a save",
            path.display(),
            timeout
        );
        return Ok(false);
    }
    Ok(true)
}

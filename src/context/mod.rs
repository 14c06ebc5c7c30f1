//! Context extraction
//!
//! Turns a paused [`Frame`] into a [`ContextSnapshot`]: the current code,
//! the next line to run, filtered/truncated variables and, when the
//! template asks for it, the whole file/notebook/session source.

mod repr;
pub mod source;

pub use repr::{truncated_repr, type_annotated_dict_str};
pub use source::{
    format_notebook, format_session_history, identifier_tokens, is_repl_internal_name,
    load_notebook, next_line, save_and_wait, strip_pause_calls, NotebookSaver,
};

use crate::frame::{Frame, Namespace, SourceId};
use crate::{DuckError, Result, DEFAULT_PAUSE_PRIMITIVE};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Field names a snapshot (and a prompt template) may use
pub mod fields {
    pub const CODE: &str = "code";
    pub const NEXT_LINE: &str = "next_line";
    pub const LOCAL_VARS: &str = "local_vars";
    pub const GLOBAL_VARS: &str = "global_vars";
    pub const FULL_CODE: &str = "full_code";
    pub const FILE_TYPE: &str = "file_type";
    pub const QUESTION: &str = "question";
    pub const STACK_TRACE: &str = "stack_trace";
}

/// Per-question mapping of field name → value. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContextSnapshot {
    fields: BTreeMap<String, String>,
}

impl ContextSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.fields.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.fields.remove(key)
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn keys(&self) -> BTreeSet<String> {
        self.fields.keys().cloned().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &String)> {
        self.fields.iter()
    }

    pub fn into_fields(self) -> BTreeMap<String, String> {
        self.fields
    }

    /// SHA-256 over the sorted key/value pairs
    pub fn content_hash(&self) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in &self.fields {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0u8]);
        }
        hex::encode(hasher.finalize())
    }
}

impl FromIterator<(String, String)> for ContextSnapshot {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

/// Snapshot plus the recoverable errors hit while building it
#[derive(Debug, Default)]
pub struct Extraction {
    pub snapshot: ContextSnapshot,
    pub errors: Vec<DuckError>,
}

/// Builds context snapshots from paused frames
pub struct ContextExtractor {
    pause_primitive: String,
    max_len_per_var: usize,
    notebook_saver: Option<Arc<dyn NotebookSaver>>,
    save_timeout: Duration,
}

impl ContextExtractor {
    pub fn new(max_len_per_var: usize) -> Self {
        Self {
            pause_primitive: DEFAULT_PAUSE_PRIMITIVE.to_string(),
            max_len_per_var,
            notebook_saver: None,
            save_timeout: Duration::from_secs(5),
        }
    }

    pub fn with_pause_primitive(mut self, name: impl Into<String>) -> Self {
        self.pause_primitive = name.into();
        self
    }

    /// Save the running notebook before reading it in full-context mode
    pub fn with_notebook_saver(mut self, saver: Arc<dyn NotebookSaver>, timeout: Duration) -> Self {
        self.notebook_saver = Some(saver);
        self.save_timeout = timeout;
        self
    }

    pub fn pause_primitive(&self) -> &str {
        &self.pause_primitive
    }

    pub fn repr(&self, value: &crate::frame::VarValue) -> String {
        truncated_repr(value, self.max_len_per_var)
    }

    /// Build a snapshot for `frame`.
    ///
    /// `full_context` adds `full_code` and `file_type`; it should follow
    /// [`PromptTemplate::needs_full_context`](crate::prompt::PromptTemplate::needs_full_context).
    /// Source that can't be read degrades to empty `code`/`next_line`
    /// (or `full_code`) and the error is returned alongside.
    pub async fn extract(&self, frame: &dyn Frame, full_context: bool) -> Extraction {
        self.extract_scoped(frame, full_context, full_context).await
    }

    /// Like [`extract`](Self::extract), but variables can be filtered against
    /// the whole source file without sending it. The file is still used as
    /// scope whenever `full_context` is set.
    pub async fn extract_scoped(&self, frame: &dyn Frame, full_context: bool, whole_file_scope: bool) -> Extraction {
        let mut out = Extraction::default();

        // next_line must be located before pause calls are stripped.
        let (code, next) = match frame.enclosing_source() {
            Ok(block) => (
                strip_pause_calls(&block.text, &self.pause_primitive),
                next_line(
                    &block.text,
                    block.first_line,
                    frame.current_line(),
                    &self.pause_primitive,
                ),
            ),
            Err(e) => {
                warn!("Continuing without a code snippet: {}", e);
                out.errors.push(e);
                (String::new(), String::new())
            }
        };

        let mut full_code = None;
        if full_context || whole_file_scope {
            match self.load_full_source(frame).await {
                Ok((text, file_type)) => {
                    if full_context {
                        out.snapshot.insert(fields::FILE_TYPE, file_type);
                    }
                    full_code = Some(strip_pause_calls(&text, &self.pause_primitive));
                }
                Err(e) if full_context => {
                    warn!("Continuing without full source: {}", e);
                    out.errors.push(e);
                    out.snapshot.insert(fields::FILE_TYPE, "unknown");
                }
                Err(e) => debug!("Filtering variables against the snippet only: {}", e),
            }
        }

        // Only variables the code in scope actually mentions.
        let scope = full_code.as_deref().unwrap_or(&code);
        let used = identifier_tokens(scope);
        let local_vars = self.render_namespace(&frame.locals(), &used);
        let global_vars = self.render_namespace(&frame.globals(), &used);

        out.snapshot.insert(fields::LOCAL_VARS, local_vars);
        out.snapshot.insert(fields::GLOBAL_VARS, global_vars);
        if full_context {
            out.snapshot
                .insert(fields::FULL_CODE, full_code.unwrap_or_default());
        }
        out.snapshot.insert(fields::CODE, code);
        out.snapshot.insert(fields::NEXT_LINE, next);
        out
    }

    fn render_namespace(&self, namespace: &Namespace, used: &HashSet<&str>) -> String {
        let filtered: Namespace = namespace
            .iter()
            .filter(|(name, _)| used.contains(name.as_str()) && !is_repl_internal_name(name))
            .map(|(name, value)| (name.clone(), value.clone()))
            .collect();
        type_annotated_dict_str(&filtered, |v| self.repr(v))
    }

    async fn load_full_source(&self, frame: &dyn Frame) -> Result<(String, &'static str)> {
        match frame.source_file_id() {
            SourceId::Script { path } => {
                let text = tokio::fs::read_to_string(&path).await.map_err(|e| {
                    DuckError::Extraction(format!("could not read {}: {e}", path.display()))
                })?;
                Ok((text, "script"))
            }
            SourceId::Notebook { path, running } => {
                if running {
                    if let Some(saver) = &self.notebook_saver {
                        if let Err(e) = save_and_wait(saver.as_ref(), &path, self.save_timeout).await {
                            warn!("Could not save running notebook first: {}", e);
                        }
                    } else {
                        debug!("No notebook saver configured; reading {} as is", path.display());
                    }
                }
                Ok((load_notebook(&path).await?, "jupyter notebook"))
            }
            SourceId::Session => {
                let cells = frame.session_history().ok_or_else(|| {
                    DuckError::Extraction("interactive session history is unavailable".to_string())
                })?;
                Ok((format_session_history(&cells), "interactive session"))
            }
            SourceId::Inline => Err(DuckError::Extraction(
                "source is unavailable for code passed inline".to_string(),
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{RecordedFrame, SourceBlock, VarValue};
    use pretty_assertions::assert_eq;
    use std::io::Write;

    fn bubble_frame() -> RecordedFrame {
        let source = "def bubble(nums):\n    for i in range(len(nums)):\n        duck()\n        total = nums[i]\n    return nums";
        RecordedFrame::new(SourceBlock::new(source, 3), 5)
            .with_local("nums", VarValue::List(vec![VarValue::Int(3), VarValue::Int(1)]))
            .with_local("i", VarValue::Int(0))
            .with_local("_", VarValue::None)
            .with_global("unused_global", VarValue::Int(1))
            .with_global("len", VarValue::Class { name: "builtin_function".into() })
    }

    #[tokio::test]
    async fn test_extract_local_context() {
        let extractor = ContextExtractor::new(79);
        let out = extractor.extract(&bubble_frame(), false).await;
        assert!(out.errors.is_empty());
        let snap = out.snapshot;
        assert_eq!(
            snap.get(fields::CODE).unwrap(),
            "def bubble(nums):\n    for i in range(len(nums)):\n        total = nums[i]\n    return nums"
        );
        assert_eq!(snap.get(fields::NEXT_LINE).unwrap(), "        total = nums[i]");
        let locals = snap.get(fields::LOCAL_VARS).unwrap();
        assert!(locals.contains("'nums': [3, 1],   # type: list"));
        assert!(locals.contains("'i': 0,"));
        assert!(!locals.contains("'_'"));
        let globals = snap.get(fields::GLOBAL_VARS).unwrap();
        assert!(globals.contains("'len'"));
        assert!(!globals.contains("unused_global"));
        assert!(!snap.contains(fields::FULL_CODE));
    }

    #[tokio::test]
    async fn test_missing_source_degrades() {
        let mut frame = bubble_frame();
        frame.source = None;
        let out = ContextExtractor::new(79).extract(&frame, false).await;
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.snapshot.get(fields::CODE), Some(""));
        assert_eq!(out.snapshot.get(fields::NEXT_LINE), Some(""));
    }

    #[tokio::test]
    async fn test_full_context_reads_script() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "unused_global = 1\nduck()\nprint(unused_global)\n").unwrap();
        let frame = bubble_frame().with_source_id(SourceId::Script {
            path: file.path().to_path_buf(),
        });
        let out = ContextExtractor::new(79).extract(&frame, true).await;
        assert!(out.errors.is_empty());
        let snap = out.snapshot;
        assert_eq!(snap.get(fields::FILE_TYPE), Some("script"));
        assert_eq!(
            snap.get(fields::FULL_CODE),
            Some("unused_global = 1\nprint(unused_global)")
        );
        // Variables are filtered against the whole file in this mode.
        assert!(snap.get(fields::GLOBAL_VARS).unwrap().contains("unused_global"));
    }

    #[tokio::test]
    async fn test_whole_file_scope_without_full_code() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "unused_global = 1\nprint(unused_global)\n").unwrap();
        let frame = bubble_frame().with_source_id(SourceId::Script {
            path: file.path().to_path_buf(),
        });
        let out = ContextExtractor::new(79).extract_scoped(&frame, false, true).await;
        assert!(out.errors.is_empty());
        let snap = out.snapshot;
        assert!(!snap.contains(fields::FULL_CODE));
        assert!(!snap.contains(fields::FILE_TYPE));
        assert!(snap.get(fields::GLOBAL_VARS).unwrap().contains("unused_global"));

        // Inline source has no file to widen to; nothing is reported.
        let out = ContextExtractor::new(79).extract_scoped(&bubble_frame(), false, true).await;
        assert!(out.errors.is_empty());
        assert!(!out.snapshot.get(fields::GLOBAL_VARS).unwrap().contains("unused_global"));
    }

    #[tokio::test]
    async fn test_full_context_inline_is_recoverable() {
        let out = ContextExtractor::new(79).extract(&bubble_frame(), true).await;
        assert_eq!(out.errors.len(), 1);
        assert!(out.errors[0].is_recoverable());
        assert_eq!(out.snapshot.get(fields::FULL_CODE), Some(""));
    }

    #[tokio::test]
    async fn test_session_history_source() {
        let frame = bubble_frame()
            .with_source_id(SourceId::Session)
            .with_session_history(vec!["nums = [3, 1]".into()]);
        let out = ContextExtractor::new(79).extract(&frame, true).await;
        assert_eq!(out.snapshot.get(fields::FILE_TYPE), Some("interactive session"));
        assert_eq!(out.snapshot.get(fields::FULL_CODE), Some("```\nnums = [3, 1]\n```"));
    }

    #[test]
    fn test_content_hash_is_stable_and_sensitive() {
        let mut a = ContextSnapshot::new();
        a.insert("code", "x = 1");
        a.insert("local_vars", "{}");
        let b: ContextSnapshot = a.clone().into_fields().into_iter().collect();
        assert_eq!(a.content_hash(), b.content_hash());
        a.insert("local_vars", "{x: 1}");
        assert_ne!(a.content_hash(), b.content_hash());
    }
}

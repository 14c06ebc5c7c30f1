//! Paused-frame capability
//!
//! The host debugger hands us a [`Frame`]: current line, variables, the
//! enclosing source block and the identity of the file it came from.
//! Variable values are described structurally by [`VarValue`] so that the
//! context extractor can truncate them without slicing through tokens.

use crate::{DuckError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

/// Variable name → value mapping as exposed by a frame
pub type Namespace = BTreeMap<String, VarValue>;

/// Everything the session needs to know about a paused execution frame.
pub trait Frame: Send + Sync {
    /// Line about to execute (1-indexed, relative to the whole file)
    fn current_line(&self) -> usize;

    /// Local variables
    fn locals(&self) -> Namespace;

    /// Global/module-level variables
    fn globals(&self) -> Namespace;

    /// Source of the function/block containing the frame
    fn enclosing_source(&self) -> Result<SourceBlock>;

    /// Where the frame's code lives
    fn source_file_id(&self) -> SourceId;

    /// Cells executed so far in an interactive session, oldest first
    fn session_history(&self) -> Option<Vec<String>> {
        None
    }
}

/// A block of source text and the file line its first line sits on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceBlock {
    pub text: String,
    #[serde(default = "default_first_line")]
    pub first_line: usize,
}

fn default_first_line() -> usize {
    1
}

impl SourceBlock {
    pub fn new(text: impl Into<String>, first_line: usize) -> Self {
        Self {
            text: text.into(),
            first_line: first_line.max(1),
        }
    }
}

/// Source identity of a frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceId {
    /// Plain script/module file on disk
    Script { path: PathBuf },
    /// Notebook file; `running` is set when it is the notebook executing us
    Notebook {
        path: PathBuf,
        #[serde(default)]
        running: bool,
    },
    /// Live interactive session (cells come from `Frame::session_history`)
    Session,
    /// Code passed inline on a command line; no source is available
    Inline,
}

/// Structured description of a variable's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum VarValue {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<VarValue>),
    Tuple(Vec<VarValue>),
    Set(Vec<VarValue>),
    Dict(Vec<(VarValue, VarValue)>),
    /// A class/type object
    Class { name: String },
    /// Anything else: the host supplies its type name and full repr
    Object { type_name: String, repr: String },
}

impl VarValue {
    pub fn str(s: impl Into<String>) -> Self {
        VarValue::Str(s.into())
    }

    pub fn type_name(&self) -> &str {
        match self {
            VarValue::None => "NoneType",
            VarValue::Bool(_) => "bool",
            VarValue::Int(_) => "int",
            VarValue::Float(_) => "float",
            VarValue::Str(_) => "str",
            VarValue::List(_) => "list",
            VarValue::Tuple(_) => "tuple",
            VarValue::Set(_) => "set",
            VarValue::Dict(_) => "dict",
            VarValue::Class { .. } => "type",
            VarValue::Object { type_name, .. } => type_name,
        }
    }

    /// Number of items for collections, `None` for scalars
    pub fn len(&self) -> Option<usize> {
        match self {
            VarValue::List(items) | VarValue::Tuple(items) | VarValue::Set(items) => {
                Some(items.len())
            }
            VarValue::Dict(items) => Some(items.len()),
            VarValue::Str(s) => Some(s.chars().count()),
            _ => None,
        }
    }

    pub fn repr(&self) -> String {
        match self {
            VarValue::None => "None".to_string(),
            VarValue::Bool(true) => "True".to_string(),
            VarValue::Bool(false) => "False".to_string(),
            VarValue::Int(i) => i.to_string(),
            VarValue::Float(f) => {
                if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
                    format!("{f:.1}")
                } else {
                    f.to_string()
                }
            }
            VarValue::Str(s) => quote_str(s),
            VarValue::List(items) => format!("[{}]", join_reprs(items)),
            VarValue::Tuple(items) if items.len() == 1 => format!("({},)", items[0].repr()),
            VarValue::Tuple(items) => format!("({})", join_reprs(items)),
            VarValue::Set(items) if items.is_empty() => "set()".to_string(),
            VarValue::Set(items) => format!("{{{}}}", join_reprs(items)),
            VarValue::Dict(items) => {
                let body = items
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect::<Vec<_>>()
                    .join(", ");
                format!("{{{body}}}")
            }
            VarValue::Class { name } => format!("<class '{name}'>"),
            VarValue::Object { repr, .. } => repr.clone(),
        }
    }
}

impl fmt::Display for VarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.repr())
    }
}

fn join_reprs(items: &[VarValue]) -> String {
    items
        .iter()
        .map(VarValue::repr)
        .collect::<Vec<_>>()
        .join(", ")
}

fn quote_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            _ => out.push(c),
        }
    }
    out.push('\'');
    out
}

// ─── Recorded frames ─────────────────────────────────────────────────

/// A frame captured to JSON by a host debugger (or written by hand).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordedFrame {
    pub current_line: usize,
    #[serde(default)]
    pub source: Option<SourceBlock>,
    #[serde(default = "default_source_id")]
    pub source_id: SourceId,
    #[serde(default)]
    pub locals: Namespace,
    #[serde(default)]
    pub globals: Namespace,
    #[serde(default)]
    pub session_history: Option<Vec<String>>,
}

fn default_source_id() -> SourceId {
    SourceId::Inline
}

impl RecordedFrame {
    pub fn new(source: SourceBlock, current_line: usize) -> Self {
        Self {
            current_line,
            source: Some(source),
            source_id: SourceId::Inline,
            locals: Namespace::new(),
            globals: Namespace::new(),
            session_history: None,
        }
    }

    pub fn with_source_id(mut self, source_id: SourceId) -> Self {
        self.source_id = source_id;
        self
    }

    pub fn with_local(mut self, name: impl Into<String>, value: VarValue) -> Self {
        self.locals.insert(name.into(), value);
        self
    }

    pub fn with_global(mut self, name: impl Into<String>, value: VarValue) -> Self {
        self.globals.insert(name.into(), value);
        self
    }

    pub fn with_session_history(mut self, cells: Vec<String>) -> Self {
        self.session_history = Some(cells);
        self
    }

    /// Load a recorded frame from a JSON file
    pub async fn load(path: &Path) -> Result<Self> {
        let text = tokio::fs::read_to_string(path).await?;
        Ok(serde_json::from_str(&text)?)
    }
}

impl Frame for RecordedFrame {
    fn current_line(&self) -> usize {
        self.current_line
    }

    fn locals(&self) -> Namespace {
        self.locals.clone()
    }

    fn globals(&self) -> Namespace {
        self.globals.clone()
    }

    fn enclosing_source(&self) -> Result<SourceBlock> {
        self.source.clone().ok_or_else(|| {
            DuckError::Extraction("could not get source code for the current frame".to_string())
        })
    }

    fn source_file_id(&self) -> SourceId {
        self.source_id.clone()
    }

    fn session_history(&self) -> Option<Vec<String>> {
        self.session_history.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repr_matches_host_conventions() {
        assert_eq!(VarValue::None.repr(), "None");
        assert_eq!(VarValue::Bool(true).repr(), "True");
        assert_eq!(VarValue::Float(3.0).repr(), "3.0");
        assert_eq!(VarValue::str("it's").repr(), "'it\\'s'");
        assert_eq!(VarValue::Tuple(vec![VarValue::Int(1)]).repr(), "(1,)");
        assert_eq!(VarValue::Set(vec![]).repr(), "set()");
        let d = VarValue::Dict(vec![(VarValue::str("a"), VarValue::Int(1))]);
        assert_eq!(d.repr(), "{'a': 1}");
    }

    #[test]
    fn test_recorded_frame_json() {
        let json = r#"{
            "current_line": 2,
            "source": {"text": "for i in range(4):\n    i"},
            "locals": {"i": {"type": "int", "value": 3}}
        }"#;
        let frame: RecordedFrame = serde_json::from_str(json).unwrap();
        assert_eq!(frame.current_line(), 2);
        assert_eq!(frame.enclosing_source().unwrap().first_line, 1);
        assert_eq!(frame.locals()["i"], VarValue::Int(3));
        assert_eq!(frame.source_file_id(), SourceId::Inline);
    }

    #[test]
    fn test_missing_source_is_extraction_error() {
        let mut frame = RecordedFrame::new(SourceBlock::new("x = 1", 1), 1);
        frame.source = None;
        let err = frame.enclosing_source().unwrap_err();
        assert!(err.is_recoverable());
    }
}

//! Variant selection and field validation

use super::template::PromptTemplate;
use crate::context::{fields, ContextSnapshot};
use crate::{DuckError, Result};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Assembled prompt fields, keyed by placeholder name
pub type PromptFields = BTreeMap<String, String>;

/// Output of [`PromptAssembler::assemble`]
#[derive(Debug, Clone, PartialEq)]
pub struct Assembled {
    /// Variant the fields were validated against
    pub key: String,
    pub fields: PromptFields,
    /// Hash of the snapshot the fields came from; pass to `commit` once the
    /// exchange succeeds.
    pub snapshot_hash: String,
    /// True when context was withheld because it had not changed
    pub follow_up: bool,
}

/// Chooses between a template's contextful and contextless variants.
///
/// When the snapshot for a new question hashes the same as the one sent
/// with the previous successful question, the context is withheld and the
/// fallback variant is used.
#[derive(Debug, Default)]
pub struct PromptAssembler {
    prev_hash: Option<String>,
}

impl PromptAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn assemble(
        &self,
        snapshot: ContextSnapshot,
        question: &str,
        stack_trace: &str,
        template: &PromptTemplate,
    ) -> Result<Assembled> {
        let snapshot_hash = snapshot.content_hash();
        // A single-variant template has nowhere to drop context to.
        let follow_up = template.fallback_key() != template.default_key()
            && self.prev_hash.as_deref() == Some(snapshot_hash.as_str());

        let (key, mut prompt_fields) = if follow_up {
            debug!("Context unchanged since last question; using fallback variant");
            (template.fallback_key().to_string(), PromptFields::new())
        } else {
            (template.default_key().to_string(), snapshot.into_fields())
        };

        let declared = template.field_names(&key)?;
        if declared.contains(fields::QUESTION) {
            prompt_fields.insert(fields::QUESTION.to_string(), question.to_string());
        }
        if !stack_trace.is_empty() {
            prompt_fields.insert(fields::STACK_TRACE.to_string(), stack_trace.to_string());
        }

        validate_fields(&prompt_fields, declared)?;
        Ok(Assembled {
            key,
            fields: prompt_fields,
            snapshot_hash,
            follow_up,
        })
    }

    /// Remember the hash of a snapshot whose exchange succeeded
    pub fn commit(&mut self, snapshot_hash: impl Into<String>) {
        self.prev_hash = Some(snapshot_hash.into());
    }

    /// Forget the last snapshot so the next question is sent with context
    pub fn reset(&mut self) {
        self.prev_hash = None;
    }

    pub fn last_hash(&self) -> Option<&str> {
        self.prev_hash.as_deref()
    }
}

/// Assembled names must equal the declared names exactly.
pub fn validate_fields(assembled: &PromptFields, declared: &BTreeSet<String>) -> Result<()> {
    let names: BTreeSet<String> = assembled.keys().cloned().collect();
    let unexpected: BTreeSet<String> = names.difference(declared).cloned().collect();
    let missing: BTreeSet<String> = declared.difference(&names).cloned().collect();
    if unexpected.is_empty() && missing.is_empty() {
        return Ok(());
    }
    Err(DuckError::FieldMismatch {
        unexpected,
        missing,
    })
}

//! Declarative prompt templates
//!
//! A template is a TOML document:
//!
//! ```toml
//! system = "You are ..."
//!
//! [completion]
//! model = "gpt-3.5-turbo"
//! max_tokens = 512
//!
//! [[user]]
//! name = "contextful"
//! template = "QUESTION:\n{question}\n\nCODE:\n{code}"
//!
//! [[user]]
//! name = "contextless"
//! template = "QUESTION:\n{question}"
//! ```
//!
//! Placeholder names become the variant's required fields. `{{` and `}}`
//! produce literal braces.

use crate::{DuckError, Result};
use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;
use tracing::{debug, warn};

const BUILTIN_TEMPLATES: &[(&str, &str)] = &[
    ("debug", include_str!("builtin/debug.toml")),
    ("debug_full", include_str!("builtin/debug_full.toml")),
    ("debug_stack_trace", include_str!("builtin/debug_stack_trace.toml")),
    (
        "debug_full_stack_trace",
        include_str!("builtin/debug_full_stack_trace.toml"),
    ),
];

/// Names of the templates shipped with the crate
pub fn available_templates() -> Vec<&'static str> {
    BUILTIN_TEMPLATES.iter().map(|(name, _)| *name).collect()
}

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\{\{|\}\}|\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("valid regex")
    })
}

/// Field names referenced by a format string
pub fn placeholder_names(template: &str) -> BTreeSet<String> {
    placeholder_pattern()
        .captures_iter(template)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().to_string()))
        .collect()
}

/// Model parameters sent with every request made from this template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionParams {
    pub model: String,
    pub temperature: f32,
    pub top_p: f32,
    pub max_tokens: u32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub stop: Vec<String>,
    /// Ask the backend for incremental tokens
    pub stream: bool,
}

impl Default for CompletionParams {
    fn default() -> Self {
        Self {
            model: "gpt-3.5-turbo".to_string(),
            temperature: 0.0,
            top_p: 1.0,
            max_tokens: 512,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            stop: Vec::new(),
            stream: true,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    system: String,
    #[serde(default)]
    user: Vec<UserEntry>,
    #[serde(default)]
    completion: CompletionParams,
}

#[derive(Debug, Deserialize)]
struct UserEntry {
    name: String,
    template: String,
}

/// One named user-message format
#[derive(Debug, Clone, PartialEq)]
pub struct UserVariant {
    pub name: String,
    pub template: String,
    pub fields: BTreeSet<String>,
}

/// Immutable prompt template
#[derive(Debug, Clone)]
pub struct PromptTemplate {
    name: String,
    system: String,
    variants: Vec<UserVariant>,
    completion: CompletionParams,
}

impl PromptTemplate {
    /// Load a built-in template by name, or a TOML file by path
    pub async fn load(name_or_path: &str) -> Result<Self> {
        if let Some((name, text)) = BUILTIN_TEMPLATES.iter().find(|(n, _)| *n == name_or_path) {
            return Self::from_toml_str(name, text);
        }

        let path = Path::new(name_or_path);
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(DuckError::Template(format!(
                "\"{name_or_path}\" is neither a built-in template nor a file. \
                 Available templates: {}",
                available_templates().join(", ")
            )));
        }
        let text = tokio::fs::read_to_string(path).await?;
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| name_or_path.to_string());
        debug!("Loaded prompt template {} from {}", name, path.display());
        Self::from_toml_str(&name, &text)
    }

    pub fn from_toml_str(name: &str, text: &str) -> Result<Self> {
        let file: TemplateFile = toml::from_str(text)?;
        let variants: Vec<UserVariant> = file
            .user
            .into_iter()
            .map(|entry| {
                let template = entry.template.trim().to_string();
                UserVariant {
                    fields: placeholder_names(&template),
                    name: entry.name,
                    template,
                }
            })
            .collect();
        Self::new(name, file.system.trim(), variants, file.completion)
    }

    pub fn new(
        name: impl Into<String>,
        system: impl Into<String>,
        variants: Vec<UserVariant>,
        completion: CompletionParams,
    ) -> Result<Self> {
        let name = name.into();
        if variants.is_empty() {
            return Err(DuckError::Template(format!(
                "template {name} declares no user messages"
            )));
        }
        let mut seen = BTreeSet::new();
        for variant in &variants {
            if !seen.insert(variant.name.as_str()) {
                return Err(DuckError::Template(format!(
                    "template {name} declares user message {} twice",
                    variant.name
                )));
            }
        }
        if variants.len() > 2 {
            warn!(
                "Template {} has {} user messages; only {} (default) and {} (fallback) are used automatically",
                name,
                variants.len(),
                variants[0].name,
                variants[1].name
            );
        }
        Ok(Self {
            name,
            system: system.into(),
            variants,
            completion,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn completion(&self) -> &CompletionParams {
        &self.completion
    }

    pub fn completion_mut(&mut self) -> &mut CompletionParams {
        &mut self.completion
    }

    pub fn variants(&self) -> &[UserVariant] {
        &self.variants
    }

    /// Variant used for fresh questions
    pub fn default_key(&self) -> &str {
        &self.variants[0].name
    }

    /// Variant used for follow-ups; the default when only one exists
    pub fn fallback_key(&self) -> &str {
        self.variants
            .get(1)
            .map(|v| v.name.as_str())
            .unwrap_or_else(|| self.default_key())
    }

    /// Look up a variant; an empty key means the default.
    pub fn variant(&self, key: &str) -> Result<&UserVariant> {
        if key.is_empty() {
            return Ok(&self.variants[0]);
        }
        self.variants.iter().find(|v| v.name == key).ok_or_else(|| {
            DuckError::Template(format!(
                "template {} has no user message named {key}",
                self.name
            ))
        })
    }

    pub fn field_names(&self, key: &str) -> Result<&BTreeSet<String>> {
        Ok(&self.variant(key)?.fields)
    }

    /// Whether any variant wants the whole file/notebook/session source
    pub fn needs_full_context(&self) -> bool {
        self.variants
            .iter()
            .any(|v| v.fields.contains(crate::context::fields::FULL_CODE))
    }

    /// Fill a variant's placeholders
    pub fn render(&self, key: &str, fields: &BTreeMap<String, String>) -> Result<String> {
        let variant = self.variant(key)?;
        let mut missing = None;
        let rendered = placeholder_pattern().replace_all(&variant.template, |caps: &Captures| {
            match caps.get(1) {
                Some(name) => match fields.get(name.as_str()) {
                    Some(value) => value.clone(),
                    None => {
                        missing.get_or_insert_with(|| name.as_str().to_string());
                        String::new()
                    }
                },
                None if &caps[0] == "{{" => "{".to_string(),
                None => "}".to_string(),
            }
        });
        if let Some(name) = missing {
            return Err(DuckError::Template(format!(
                "no value for field {name} in user message {}",
                variant.name
            )));
        }
        Ok(rendered.into_owned())
    }
}

//! Prompt templates and assembly

pub mod assembler;
pub mod template;

pub use assembler::{validate_fields, Assembled, PromptAssembler, PromptFields};
pub use template::{available_templates, CompletionParams, PromptTemplate, UserVariant};

//! Request shapes for the exposed operations and their validation.
//!
//! Requests are checked here, before anything reaches the engine. A
//! malformed request is the only user-visible failure of the core.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ValidationReport;

/// Largest document accepted, in bytes.
pub const MAX_TEXT_BYTES: usize = 1_000_000;

/// Default document type when a request omits it.
pub const DEFAULT_DOCUMENT_TYPE: &str = "general";

/// A malformed request.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InputError {
    #[error("text must not be empty")]
    EmptyText,

    #[error("text is {len} bytes, the limit is {max}")]
    TextTooLarge { len: usize, max: usize },

    #[error("document_type must not be empty")]
    EmptyDocumentType,

    #[error("unknown module: {0}")]
    UnknownModule(String),

    #[error("prompt must not be empty")]
    EmptyPrompt,

    #[error("at least one provider spec is required")]
    NoProviders,

    #[error("provider spec {index} has no name")]
    UnnamedProvider { index: usize },

    #[error("malformed request: {0}")]
    Malformed(String),
}

fn default_document_type() -> String {
    DEFAULT_DOCUMENT_TYPE.to_string()
}

fn check_text(text: &str) -> Result<(), InputError> {
    if text.trim().is_empty() {
        return Err(InputError::EmptyText);
    }
    if text.len() > MAX_TEXT_BYTES {
        return Err(InputError::TextTooLarge {
            len: text.len(),
            max: MAX_TEXT_BYTES,
        });
    }
    Ok(())
}

fn check_document_type(document_type: &str) -> Result<(), InputError> {
    if document_type.trim().is_empty() {
        return Err(InputError::EmptyDocumentType);
    }
    Ok(())
}

/// `{text, document_type, modules}`. Omitted `modules` selects all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub text: String,
    #[serde(default = "default_document_type")]
    pub document_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules: Option<Vec<String>>,
}

impl EvaluationRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            document_type: default_document_type(),
            modules: None,
        }
    }

    pub fn validate(&self) -> Result<(), InputError> {
        check_text(&self.text)?;
        check_document_type(&self.document_type)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvancedOptions {
    /// Correct failures of all modules in one pass.
    #[serde(default)]
    pub multi_level: bool,
}

/// `{text, validation_results?, advanced_options?}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionRequest {
    pub text: String,
    #[serde(default = "default_document_type")]
    pub document_type: String,
    /// A prior report whose failures seed the first iteration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_results: Option<ValidationReport>,
    #[serde(default)]
    pub advanced_options: AdvancedOptions,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules: Option<Vec<String>>,
}

impl CorrectionRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            document_type: default_document_type(),
            validation_results: None,
            advanced_options: AdvancedOptions::default(),
            modules: None,
        }
    }

    pub fn validate(&self) -> Result<(), InputError> {
        check_text(&self.text)?;
        check_document_type(&self.document_type)
    }
}

/// One candidate generator.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSpec {
    /// Provider type, optionally with a model: `simulated`, `anthropic:claude-x`.
    pub name: String,
    /// Fixed response; forces the simulated provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simulated_response: Option<String>,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl ProviderSpec {
    pub fn simulated(name: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            simulated_response: Some(response.into()),
            api_key: None,
            max_tokens: None,
        }
    }
}

impl fmt::Debug for ProviderSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSpec")
            .field("name", &self.name)
            .field("simulated_response", &self.simulated_response)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("max_tokens", &self.max_tokens)
            .finish()
    }
}

/// `{prompt, provider_specs, modules}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiModelRequest {
    pub prompt: String,
    pub provider_specs: Vec<ProviderSpec>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modules: Option<Vec<String>>,
    #[serde(default = "default_document_type")]
    pub document_type: String,
}

impl MultiModelRequest {
    pub fn validate(&self) -> Result<(), InputError> {
        if self.prompt.trim().is_empty() {
            return Err(InputError::EmptyPrompt);
        }
        if self.provider_specs.is_empty() {
            return Err(InputError::NoProviders);
        }
        if let Some(index) = self.provider_specs.iter().position(|s| s.name.trim().is_empty()) {
            return Err(InputError::UnnamedProvider { index });
        }
        check_document_type(&self.document_type)
    }
}

//! The Gate contract.
//!
//! A gate is a single, side-effect-free compliance check. It first asks a
//! cheap relevance predicate and only runs its substantive check when the
//! document is in scope; otherwise it reports `N/A`.
//!
//! ## Contract
//!
//! | Outcome | Meaning |
//! |---------|---------|
//! | `Ok(PASS/WARNING/FAIL)` | The check ran |
//! | `Ok(N/A)` | The relevance predicate rejected the document |
//! | `Err(GateFault)` | The gate itself broke; the module turns this into `ERROR` |
//!
//! Gates must be pure: identical `(text, document_type)` yields an
//! identical result.

use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::catalog::{CatalogError, GateDefinition, MissingOutcome};
use crate::span::TextSpan;
use crate::types::{GateResult, Severity};

/// Failures raised by a gate. Never propagated past the module boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GateFault {
    #[error("gate check failed: {0}")]
    Check(String),

    #[error("gate timed out after {0:?}")]
    Timeout(Duration),

    #[error("gate panicked: {0}")]
    Panic(String),
}

/// Static metadata every gate exposes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateMetadata {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_source: Option<String>,
    #[serde(default = "default_gate_version")]
    pub version: String,
}

fn default_gate_version() -> String {
    "1.0.0".to_string()
}

impl GateMetadata {
    pub fn new(id: impl Into<String>, name: impl Into<String>, severity: Severity) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            severity,
            legal_source: None,
            version: default_gate_version(),
        }
    }

    pub fn with_legal_source(mut self, source: impl Into<String>) -> Self {
        self.legal_source = Some(source.into());
        self
    }
}

/// Trait implemented by every gate.
pub trait Gate: Send + Sync {
    fn metadata(&self) -> &GateMetadata;

    fn id(&self) -> &str {
        &self.metadata().id
    }

    /// Cheap predicate deciding whether the rule applies at all.
    fn is_relevant(&self, _text: &str, _document_type: &str) -> bool {
        true
    }

    /// The substantive check. Only called for relevant documents.
    fn check(&self, text: &str, document_type: &str) -> Result<GateResult, GateFault>;

    /// Relevance predicate followed by the check.
    fn evaluate(&self, text: &str, document_type: &str) -> Result<GateResult, GateFault> {
        if !self.is_relevant(text, document_type) {
            return Ok(GateResult::not_applicable(format!(
                "{} does not apply to this document",
                self.metadata().name
            )));
        }
        self.check(text, document_type)
    }
}

/// A labelled, compiled pattern.
#[derive(Debug, Clone)]
struct LabelledPattern {
    label: String,
    regex: Regex,
}

/// A keyword/regex gate built from a rule-pack definition.
///
/// Most regulatory rules are simple predicates of this shape: "fail if
/// any of these phrases appear" and/or "require at least one of these".
#[derive(Debug, Clone)]
pub struct PatternGate {
    metadata: GateMetadata,
    document_types: Vec<String>,
    relevance: Vec<Regex>,
    fail_if_any: Vec<LabelledPattern>,
    require_any: Vec<Regex>,
    missing_outcome: MissingOutcome,
    fail_message: String,
    missing_message: String,
    pass_message: String,
    suggestion: Option<String>,
}

/// Compile a rule-pack pattern case-insensitively.
pub(crate) fn compile_pattern(pattern: &str) -> Result<Regex, CatalogError> {
    Regex::new(&format!("(?i){}", pattern)).map_err(|e| CatalogError::InvalidPattern {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

impl PatternGate {
    /// Compile a gate from its definition.
    pub fn from_definition(def: &GateDefinition) -> Result<Self, CatalogError> {
        let relevance = def
            .relevance
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<Result<Vec<_>, _>>()?;
        let fail_if_any = def
            .fail_if_any
            .iter()
            .map(|p| {
                Ok(LabelledPattern {
                    label: p.label.clone().unwrap_or_else(|| p.pattern.clone()),
                    regex: compile_pattern(&p.pattern)?,
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        let require_any = def
            .require_any
            .iter()
            .map(|p| compile_pattern(p))
            .collect::<Result<Vec<_>, _>>()?;

        let mut metadata = GateMetadata::new(&def.id, &def.name, def.severity);
        metadata.legal_source = def.legal_source.clone();
        if let Some(version) = &def.version {
            metadata.version = version.clone();
        }

        Ok(Self {
            fail_message: def
                .messages
                .fail
                .clone()
                .unwrap_or_else(|| format!("{} requirement not met", def.name)),
            missing_message: def
                .messages
                .missing
                .clone()
                .unwrap_or_else(|| format!("Required {} language is missing", def.name)),
            pass_message: def
                .messages
                .pass
                .clone()
                .unwrap_or_else(|| format!("{} requirement met", def.name)),
            metadata,
            document_types: def.document_types.iter().map(|d| d.to_lowercase()).collect(),
            relevance,
            fail_if_any,
            require_any,
            missing_outcome: def.missing_outcome,
            suggestion: def.suggestion.clone(),
        })
    }

    fn with_suggestion(&self, result: GateResult) -> GateResult {
        match &self.suggestion {
            Some(s) => result.with_suggestion(s.clone()),
            None => result,
        }
    }
}

impl Gate for PatternGate {
    fn metadata(&self) -> &GateMetadata {
        &self.metadata
    }

    fn is_relevant(&self, text: &str, document_type: &str) -> bool {
        let type_ok = self.document_types.is_empty()
            || self
                .document_types
                .iter()
                .any(|d| d == "any" || d.eq_ignore_ascii_case(document_type));
        let topic_ok = self.relevance.is_empty() || self.relevance.iter().any(|r| r.is_match(text));
        type_ok && topic_ok
    }

    fn check(&self, text: &str, _document_type: &str) -> Result<GateResult, GateFault> {
        let matches: Vec<_> = self
            .fail_if_any
            .iter()
            .flat_map(|p| {
                p.regex.find_iter(text).map(move |m| {
                    let span = TextSpan::of(&m);
                    json!({
                        "label": p.label,
                        "text": m.as_str(),
                        "pointer": span.pointer(),
                    })
                })
            })
            .collect();

        if !matches.is_empty() {
            let result = GateResult::fail(self.metadata.severity, self.fail_message.clone())
                .with_details(json!({ "matches": matches }));
            return Ok(self.with_suggestion(result));
        }

        if !self.require_any.is_empty() && !self.require_any.iter().any(|r| r.is_match(text)) {
            let result = match self.missing_outcome {
                MissingOutcome::Fail => {
                    GateResult::fail(self.metadata.severity, self.missing_message.clone())
                }
                MissingOutcome::Warning => {
                    GateResult::warning(self.metadata.severity, self.missing_message.clone())
                }
            };
            return Ok(self.with_suggestion(result));
        }

        Ok(GateResult::pass(self.pass_message.clone()))
    }
}

//! Snippet registry and mapper.
//!
//! A snippet is a parameterised text transformation tagged with a domain.
//! The mapper looks snippets up by the failing gate's domain, preferring
//! one written for that gate, so a new gate in an existing domain is
//! covered without a new snippet.

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::domain::{DomainTaxonomy, Resolution};
use crate::catalog::CatalogError;
use crate::gate::{compile_pattern, GateMetadata};
use crate::types::{Failure, GateRef};

/// How a snippet changes the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnippetAction {
    #[default]
    Append,
    Prepend,
    /// Replace every match of the snippet's `pattern`.
    Replace,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnippetDefinition {
    pub id: String,
    pub domain: String,
    /// Gate ids (or `module/gate`) the snippet was written for.
    #[serde(default)]
    pub applies_to: Vec<String>,
    #[serde(default)]
    pub action: SnippetAction,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    /// Placeholders: `{module_id}`, `{gate_id}`, `{gate_name}`, `{legal_source}`.
    pub template: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnippetConfig {
    #[serde(default)]
    pub version: String,
    pub snippets: Vec<SnippetDefinition>,
}

#[derive(Debug, Clone)]
struct Snippet {
    def: SnippetDefinition,
    pattern: Option<Regex>,
}

impl Snippet {
    fn written_for(&self, gate: &GateRef) -> bool {
        self.def.applies_to.iter().any(|a| match a.split_once('/') {
            Some((module, gate_id)) => module == gate.module_id && gate_id == gate.gate_id,
            None => a == &gate.gate_id,
        })
    }
}

/// A resolved correction for one failing gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionPlan {
    pub gate: GateRef,
    pub domain: String,
    pub resolution: Resolution,
    pub snippet_id: String,
    pub action: SnippetAction,
    /// Template with placeholders filled in.
    pub rendered: String,
}

/// Read-only snippet library.
#[derive(Debug, Clone, Default)]
pub struct SnippetRegistry {
    snippets: Vec<Snippet>,
}

impl SnippetRegistry {
    pub fn from_config(config: SnippetConfig) -> Result<Self, CatalogError> {
        let snippets = config
            .snippets
            .into_iter()
            .map(|def| {
                let pattern = match (&def.action, &def.pattern) {
                    (SnippetAction::Replace, Some(p)) => Some(compile_pattern(p)?),
                    (SnippetAction::Replace, None) => {
                        return Err(CatalogError::Invalid(format!(
                            "snippet {} replaces but has no pattern",
                            def.id
                        )))
                    }
                    _ => None,
                };
                Ok(Snippet { def, pattern })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        Ok(Self { snippets })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, CatalogError> {
        Self::from_config(serde_yaml::from_str(yaml)?)
    }

    pub fn len(&self) -> usize {
        self.snippets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snippets.is_empty()
    }

    /// `(snippet id, domain)` pairs in declaration order.
    pub fn domains(&self) -> impl Iterator<Item = (&str, &str)> {
        self.snippets.iter().map(|s| (s.def.id.as_str(), s.def.domain.as_str()))
    }

    /// Map a failure to a plan, or `None` when its domain has no snippet.
    pub fn plan(
        &self,
        failure: &Failure,
        metadata: Option<&GateMetadata>,
        taxonomy: &DomainTaxonomy,
    ) -> Option<CorrectionPlan> {
        let (domain, resolution) = taxonomy.resolve(&failure.gate, &failure.result)?;
        let in_domain = || self.snippets.iter().filter(|s| s.def.domain == domain.id);
        let snippet = in_domain()
            .find(|s| s.written_for(&failure.gate))
            .or_else(|| in_domain().find(|s| s.def.applies_to.is_empty()))
            .or_else(|| in_domain().next())?;

        Some(CorrectionPlan {
            gate: failure.gate.clone(),
            domain: domain.id.clone(),
            resolution,
            snippet_id: snippet.def.id.clone(),
            action: snippet.def.action,
            rendered: render(&snippet.def.template, &failure.gate, metadata),
        })
    }

    /// Apply a plan. Returns `None` when the text would not change.
    ///
    /// Append and prepend are idempotent: a snippet already present is not
    /// added again.
    pub fn apply(&self, text: &str, plan: &CorrectionPlan) -> Option<String> {
        let rendered = plan.rendered.trim();
        if rendered.is_empty() {
            return None;
        }
        match plan.action {
            SnippetAction::Append | SnippetAction::Prepend => {
                if text.to_lowercase().contains(&rendered.to_lowercase()) {
                    return None;
                }
                let body = text.trim();
                Some(match (plan.action, body.is_empty()) {
                    (_, true) => rendered.to_string(),
                    (SnippetAction::Prepend, false) => format!("{}\n\n{}", rendered, body),
                    _ => format!("{}\n\n{}", body, rendered),
                })
            }
            SnippetAction::Replace => {
                let snippet = self.snippets.iter().find(|s| s.def.id == plan.snippet_id)?;
                let pattern = snippet.pattern.as_ref()?;
                let replaced = pattern.replace_all(text, regex::NoExpand(rendered));
                (replaced != text).then(|| replaced.into_owned())
            }
        }
    }
}

fn render(template: &str, gate: &GateRef, metadata: Option<&GateMetadata>) -> String {
    let gate_name = metadata.map_or(gate.gate_id.as_str(), |m| m.name.as_str());
    let legal_source = metadata
        .and_then(|m| m.legal_source.as_deref())
        .unwrap_or("the applicable rules");
    template
        .replace("{module_id}", &gate.module_id)
        .replace("{gate_id}", &gate.gate_id)
        .replace("{gate_name}", gate_name)
        .replace("{legal_source}", legal_source)
}

//! Semantic augmentation of raw gate results.
//!
//! Some rules cannot be expressed as a single regex: "a risk warning must
//! appear within a few hundred characters of the *Risk warning* heading",
//! "any synonym of *guaranteed* is a critical failure". The augmentor
//! applies such phrase/header-proximity rules after a gate has run.
//!
//! Escalation is one-way. Status only moves toward `FAIL` and severity only
//! toward `critical`, so `postprocess` is idempotent and never weakens a
//! gate's own verdict.
//!
//! Phrase patterns are compiled on first use per module and shared
//! afterwards.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::catalog::CatalogError;
use crate::span::floor_char_boundary;
use crate::types::{GateResult, Severity, Status, SEMANTIC_HITS_KEY};

const DEFAULT_WINDOW: usize = 400;

/// Rule kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    /// Escalate when any phrase or synonym is present.
    FailIfPresent,
    /// Escalate when none of the phrases is present (optionally near a header).
    RequireOneOf,
}

/// One semantic rule attached to a gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemanticRule {
    pub id: String,
    pub kind: RuleKind,
    pub phrases: Vec<String>,
    #[serde(default)]
    pub synonyms: Vec<String>,
    /// Header anchoring a `require_one_of` search window.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
    #[serde(default = "default_window")]
    pub window: usize,
    #[serde(default = "default_status")]
    pub status: Status,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

fn default_window() -> usize {
    DEFAULT_WINDOW
}

fn default_status() -> Status {
    Status::Fail
}

/// Semantic rule file: `modules -> gate -> [rules]`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemanticConfig {
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub modules: BTreeMap<String, BTreeMap<String, Vec<SemanticRule>>>,
}

impl SemanticConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, CatalogError> {
        let config: SemanticConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CatalogError> {
        for (module, gates) in &self.modules {
            for (gate, rules) in gates {
                for rule in rules {
                    if rule.phrases.iter().chain(&rule.synonyms).all(|p| p.trim().is_empty()) {
                        return Err(CatalogError::Invalid(format!(
                            "semantic rule {}/{}/{} has no phrases",
                            module, gate, rule.id
                        )));
                    }
                    if !matches!(rule.status, Status::Warning | Status::Fail) {
                        return Err(CatalogError::Invalid(format!(
                            "semantic rule {}/{}/{} must escalate to WARNING or FAIL",
                            module, gate, rule.id
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// A rule with its patterns compiled.
#[derive(Debug)]
struct CompiledRule {
    rule: SemanticRule,
    phrases: Regex,
    header: Option<Regex>,
}

impl CompiledRule {
    fn compile(rule: &SemanticRule) -> Result<Self, regex::Error> {
        let phrases = alternation(rule.phrases.iter().chain(&rule.synonyms))?;
        let header = match &rule.header {
            Some(h) => Some(alternation(std::iter::once(h))?),
            None => None,
        };
        Ok(Self {
            rule: rule.clone(),
            phrases,
            header,
        })
    }

    fn triggered(&self, text: &str) -> bool {
        match self.rule.kind {
            RuleKind::FailIfPresent => self.phrases.is_match(text),
            RuleKind::RequireOneOf => !self.satisfied(text),
        }
    }

    /// Whether a required phrase occurs, inside a header window if one is set.
    ///
    /// A missing header leaves nothing to search, so the requirement is
    /// unmet.
    fn satisfied(&self, text: &str) -> bool {
        let Some(header) = &self.header else {
            return self.phrases.is_match(text);
        };
        header.find_iter(text).any(|h| {
            let end = floor_char_boundary(text, h.end().saturating_add(self.rule.window));
            self.phrases.is_match(&text[h.end()..end])
        })
    }
}

/// Build a case-folded, word-boundary-anchored alternation of phrases.
///
/// Whitespace inside a phrase matches any run of whitespace.
fn alternation<'a>(phrases: impl Iterator<Item = &'a String>) -> Result<Regex, regex::Error> {
    let parts: Vec<String> = phrases
        .map(|p| p.trim())
        .filter(|p| !p.is_empty())
        .map(phrase_pattern)
        .collect();
    Regex::new(&format!("(?i)(?:{})", parts.join("|")))
}

fn phrase_pattern(phrase: &str) -> String {
    let body = phrase
        .split_whitespace()
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(r"\s+");
    let is_word = |c: Option<char>| c.map_or(false, |c| c.is_alphanumeric() || c == '_');
    let lead = if is_word(phrase.chars().next()) { r"\b" } else { "" };
    let trail = if is_word(phrase.chars().last()) { r"\b" } else { "" };
    format!("{}{}{}", lead, body, trail)
}

type GateRules = HashMap<String, Vec<CompiledRule>>;

/// Deterministic phrase/header-proximity post-processor.
#[derive(Debug, Default)]
pub struct SemanticAugmentor {
    config: SemanticConfig,
    compiled: RwLock<HashMap<String, Arc<GateRules>>>,
}

impl SemanticAugmentor {
    pub fn new(config: SemanticConfig) -> Self {
        Self {
            config,
            compiled: RwLock::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SemanticConfig {
        &self.config
    }

    pub fn has_rules(&self, module_id: &str, gate_id: &str) -> bool {
        self.config
            .modules
            .get(module_id)
            .and_then(|gates| gates.get(gate_id))
            .map_or(false, |rules| !rules.is_empty())
    }

    /// Compiled rules for a module, compiling them on first use.
    fn module_rules(&self, module_id: &str) -> Option<Arc<GateRules>> {
        if let Some(rules) = self.compiled.read().get(module_id) {
            return Some(Arc::clone(rules));
        }
        let gates = self.config.modules.get(module_id)?;

        let mut cache = self.compiled.write();
        let entry = cache.entry(module_id.to_string()).or_insert_with(|| {
            debug!(module = %module_id, "Compiling semantic rules");
            let compiled = gates
                .iter()
                .map(|(gate_id, rules)| {
                    let rules = rules
                        .iter()
                        .filter_map(|rule| match CompiledRule::compile(rule) {
                            Ok(compiled) => Some(compiled),
                            Err(e) => {
                                warn!(
                                    module = %module_id,
                                    gate = %gate_id,
                                    rule = %rule.id,
                                    error = %e,
                                    "Skipping semantic rule"
                                );
                                None
                            }
                        })
                        .collect();
                    (gate_id.clone(), rules)
                })
                .collect();
            Arc::new(compiled)
        });
        Some(Arc::clone(entry))
    }

    /// Re-score a gate's raw result.
    ///
    /// Gates without rules, and `N/A`/`ERROR` results, pass through
    /// unchanged.
    pub fn postprocess(
        &self,
        module_id: &str,
        gate_id: &str,
        text: &str,
        mut result: GateResult,
    ) -> GateResult {
        if result.status.risk_rank().is_none() {
            return result;
        }
        let Some(module_rules) = self.module_rules(module_id) else {
            return result;
        };
        let Some(rules) = module_rules.get(gate_id) else {
            return result;
        };

        let mut hits: Vec<String> = existing_hits(&result);
        let mut notes: Vec<String> = Vec::new();

        for compiled in rules.iter().filter(|c| c.triggered(text)) {
            let rule = &compiled.rule;
            if !hits.contains(&rule.id) {
                hits.push(rule.id.clone());
            }

            let status = result.status.escalate(rule.status);
            let severity = result.severity.max(rule.severity);
            if status != result.status || severity != result.severity {
                debug!(
                    module = %module_id,
                    gate = %gate_id,
                    rule = %rule.id,
                    from = %result.status,
                    to = %status,
                    "Semantic escalation"
                );
                result.status = status;
                result.severity = severity;
                notes.push(rule.message.clone().unwrap_or_else(|| rule.id.clone()));
            }
        }

        if !notes.is_empty() {
            result.message = format!("{} [semantic: {}]", result.message, notes.join("; "));
        }
        if !hits.is_empty() {
            result.metadata.insert(
                SEMANTIC_HITS_KEY.to_string(),
                JsonValue::Array(hits.into_iter().map(JsonValue::String).collect()),
            );
        }
        result
    }
}

fn existing_hits(result: &GateResult) -> Vec<String> {
    result
        .metadata
        .get(SEMANTIC_HITS_KEY)
        .and_then(JsonValue::as_array)
        .map(|hits| {
            hits.iter()
                .filter_map(|h| h.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const RULES: &str = r#"
version: "1.0"
modules:
  fca_uk:
    fair_clear_not_misleading:
      - id: absolute_language
        kind: fail_if_present
        phrases: ["guaranteed"]
        synonyms: ["risk free", "can't lose"]
        severity: critical
        message: Absolute performance language
    risk_warning:
      - id: warning_near_header
        kind: require_one_of
        phrases: ["capital at risk"]
        header: "risk warning"
        window: 60
        status: WARNING
        severity: high
"#;

    fn augmentor() -> SemanticAugmentor {
        SemanticAugmentor::new(SemanticConfig::from_yaml(RULES).unwrap())
    }

    #[test]
    fn test_unknown_gate_is_noop() {
        let aug = augmentor();
        let raw = GateResult::pass("ok");
        assert_eq!(aug.postprocess("fca_uk", "other", "guaranteed", raw.clone()), raw);
        assert_eq!(aug.postprocess("nope", "other", "guaranteed", raw.clone()), raw);
    }

    #[test]
    fn test_fail_if_present_escalates() {
        let aug = augmentor();
        let out = aug.postprocess(
            "fca_uk",
            "fair_clear_not_misleading",
            "This fund is Risk   Free.",
            GateResult::pass("ok"),
        );
        assert_eq!(out.status, Status::Fail);
        assert_eq!(out.severity, Severity::Critical);
        assert!(out.has_semantic_hits());
        assert!(out.message.contains("Absolute performance language"));
    }

    #[test]
    fn test_word_boundaries() {
        let aug = augmentor();
        let out = aug.postprocess(
            "fca_uk",
            "fair_clear_not_misleading",
            "unguaranteedness",
            GateResult::pass("ok"),
        );
        assert_eq!(out.status, Status::Pass);
    }

    #[test]
    fn test_require_one_of_with_header_window() {
        let aug = augmentor();
        let near = "Risk warning: your capital at risk.";
        let far = format!("Risk warning: {} capital at risk.", "x".repeat(80));
        let missing_header = "Capital at risk.";

        let ok = aug.postprocess("fca_uk", "risk_warning", near, GateResult::pass("ok"));
        assert_eq!(ok.status, Status::Pass);

        let out = aug.postprocess("fca_uk", "risk_warning", &far, GateResult::pass("ok"));
        assert_eq!(out.status, Status::Warning);
        assert_eq!(out.severity, Severity::High);

        let out = aug.postprocess("fca_uk", "risk_warning", missing_header, GateResult::pass("ok"));
        assert_eq!(out.status, Status::Warning);
    }

    #[test]
    fn test_never_downgrades() {
        let aug = augmentor();
        let raw = GateResult::fail(Severity::Critical, "raw failure");
        let out = aug.postprocess("fca_uk", "risk_warning", "no header here", raw.clone());
        assert_eq!(out.status, Status::Fail);
        assert_eq!(out.severity, Severity::Critical);
        assert_eq!(out.message, raw.message);
    }

    #[test]
    fn test_na_and_error_untouched() {
        let aug = augmentor();
        let na = GateResult::not_applicable("skip");
        let gate = "fair_clear_not_misleading";
        assert_eq!(aug.postprocess("fca_uk", gate, "guaranteed", na.clone()), na);
        let err = GateResult::error("boom");
        assert_eq!(aug.postprocess("fca_uk", gate, "guaranteed", err.clone()), err);
    }

    #[test]
    fn test_rule_without_phrases_rejected() {
        let yaml = r#"
modules:
  m:
    g:
      - id: empty
        kind: fail_if_present
        phrases: [" "]
        severity: low
"#;
        assert!(SemanticConfig::from_yaml(yaml).is_err());
    }

    fn status_strategy() -> impl Strategy<Value = Status> {
        prop_oneof![Just(Status::Pass), Just(Status::Warning), Just(Status::Fail)]
    }

    fn severity_strategy() -> impl Strategy<Value = Severity> {
        prop_oneof![
            Just(Severity::None),
            Just(Severity::Low),
            Just(Severity::Medium),
            Just(Severity::High),
            Just(Severity::Critical),
        ]
    }

    fn text_strategy() -> impl Strategy<Value = String> {
        prop::collection::vec(
            prop_oneof![
                Just("guaranteed".to_string()),
                Just("risk free".to_string()),
                Just("Risk warning:".to_string()),
                Just("capital at risk".to_string()),
                "[a-z]{1,8}",
            ],
            0..12,
        )
        .prop_map(|words| words.join(" "))
    }

    proptest! {
        #[test]
        fn prop_postprocess_is_idempotent(
            status in status_strategy(),
            severity in severity_strategy(),
            text in text_strategy(),
            gate in prop_oneof![Just("fair_clear_not_misleading"), Just("risk_warning")],
        ) {
            let aug = augmentor();
            let raw = GateResult {
                status,
                severity,
                message: "raw".into(),
                suggestion: None,
                details: None,
                metadata: Default::default(),
            };
            let once = aug.postprocess("fca_uk", gate, &text, raw);
            let twice = aug.postprocess("fca_uk", gate, &text, once.clone());
            prop_assert_eq!(once, twice);
        }

        #[test]
        fn prop_postprocess_is_monotone(
            status in status_strategy(),
            severity in severity_strategy(),
            text in text_strategy(),
            gate in prop_oneof![Just("fair_clear_not_misleading"), Just("risk_warning")],
        ) {
            let aug = augmentor();
            let raw = GateResult {
                status,
                severity,
                message: "raw".into(),
                suggestion: None,
                details: None,
                metadata: Default::default(),
            };
            let out = aug.postprocess("fca_uk", gate, &text, raw);
            prop_assert!(out.severity >= severity);
            prop_assert!(out.status.risk_rank() >= status.risk_rank());
        }
    }
}

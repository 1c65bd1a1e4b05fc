//! Targeted rewrite rules.
//!
//! Rules are keyed by literal failure signatures (gate ids). A failure
//! whose gate no rule names falls back to its domain: the sanitizer
//! resolves the domain through the taxonomy and applies the most
//! conservative rule registered for it. Unknown gates never make the
//! sanitizer fail; at worst they produce no actions.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::domain::DomainTaxonomy;
use crate::analyzers::patterns::EntityKind;
use crate::catalog::CatalogError;
use crate::gate::compile_pattern;
use crate::span::TextSpan;
use crate::types::{Failure, GateRef};

/// A single pattern replacement. `$1`-style group references are expanded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewriteDefinition {
    pub pattern: String,
    pub replacement: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizerRuleDefinition {
    pub id: String,
    pub domain: String,
    /// Gate ids (or `module/gate`) this rule is written for.
    #[serde(default)]
    pub signatures: Vec<String>,
    /// Safe to apply to gates the rule was not written for.
    #[serde(default)]
    pub conservative: bool,
    /// Lower runs first among fallback candidates.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub rewrites: Vec<RewriteDefinition>,
    /// Entity kinds to redact.
    #[serde(default)]
    pub redact: Vec<EntityKind>,
}

fn default_priority() -> u32 {
    100
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SanitizerConfig {
    #[serde(default)]
    pub version: String,
    pub rules: Vec<SanitizerRuleDefinition>,
}

/// Audit record for one replacement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanitizationAction {
    pub rule_triggered: String,
    pub gate: GateRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    /// Span in the text the rewrite was applied to.
    pub before_span: TextSpan,
    pub before_text: String,
    /// Span in the text the rewrite produced.
    pub after_span: TextSpan,
    pub after_text: String,
}

/// Output text plus the actions that produced it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SanitizationResult {
    pub text: String,
    pub actions: Vec<SanitizationAction>,
    /// Rule ids in application order.
    pub rules_applied: Vec<String>,
    /// Failures that neither matched a signature nor classified into a domain.
    pub unclassified: Vec<GateRef>,
}

impl SanitizationResult {
    pub fn changed(&self) -> bool {
        !self.actions.is_empty()
    }

    /// Gates that produced at least one action.
    pub fn touched(&self, gate: &GateRef) -> bool {
        self.actions.iter().any(|a| &a.gate == gate)
    }
}

#[derive(Debug, Clone)]
struct CompiledRewrite {
    regex: Regex,
    replacement: String,
}

#[derive(Debug, Clone)]
struct SanitizerRule {
    def: SanitizerRuleDefinition,
    rewrites: Vec<CompiledRewrite>,
}

impl SanitizerRule {
    fn compile(def: SanitizerRuleDefinition) -> Result<Self, CatalogError> {
        let mut rewrites = def
            .rewrites
            .iter()
            .map(|r| {
                Ok(CompiledRewrite {
                    regex: compile_pattern(&r.pattern)?,
                    replacement: r.replacement.clone(),
                })
            })
            .collect::<Result<Vec<_>, CatalogError>>()?;
        rewrites.extend(def.redact.iter().map(|kind| CompiledRewrite {
            regex: kind.pattern().clone(),
            replacement: kind.redaction().to_string(),
        }));
        Ok(Self { def, rewrites })
    }

    fn matches_signature(&self, gate: &GateRef) -> bool {
        self.def.signatures.iter().any(|sig| match sig.split_once('/') {
            Some((module, gate_id)) => module == gate.module_id && gate_id == gate.gate_id,
            None => sig == &gate.gate_id,
        })
    }

    /// Apply every rewrite in order. Returns the new text and its actions.
    fn apply(
        &self,
        text: &str,
        gate: &GateRef,
        domain: Option<&str>,
    ) -> (String, Vec<SanitizationAction>) {
        let mut current = text.to_string();
        let mut actions = Vec::new();
        for rewrite in &self.rewrites {
            let (next, spans) = replace_recorded(&current, &rewrite.regex, &rewrite.replacement);
            actions.extend(spans.into_iter().map(
                |(before_span, before_text, after_span, after_text)| SanitizationAction {
                    rule_triggered: self.def.id.clone(),
                    gate: gate.clone(),
                    domain: domain.map(str::to_string),
                    before_span,
                    before_text,
                    after_span,
                    after_text,
                },
            ));
            current = next;
        }
        (current, actions)
    }
}

type Replacement = (TextSpan, String, TextSpan, String);

/// `Regex::replace_all` that records each replacement's spans.
fn replace_recorded(text: &str, regex: &Regex, replacement: &str) -> (String, Vec<Replacement>) {
    let mut out = String::with_capacity(text.len());
    let mut records = Vec::new();
    let mut last = 0;

    for caps in regex.captures_iter(text) {
        let Some(m) = caps.get(0) else { continue };
        if m.as_str().is_empty() {
            continue;
        }
        let rendered = match_case(m.as_str(), &expand(&caps, replacement));
        if rendered == m.as_str() {
            continue;
        }
        out.push_str(&text[last..m.start()]);
        let after_start = out.len();
        out.push_str(&rendered);
        records.push((
            TextSpan::of(&m),
            m.as_str().to_string(),
            TextSpan::new(after_start, out.len()),
            rendered,
        ));
        last = m.end();
    }
    out.push_str(&text[last..]);
    (out, records)
}

fn expand(caps: &Captures<'_>, replacement: &str) -> String {
    let mut dst = String::new();
    caps.expand(replacement, &mut dst);
    dst
}

/// Carry the capitalisation of the matched text's first letter over.
fn match_case(matched: &str, replacement: &str) -> String {
    let upper = matched.chars().next().map_or(false, char::is_uppercase);
    let mut chars = replacement.chars();
    match chars.next() {
        Some(first) if upper && first.is_lowercase() => first.to_uppercase().chain(chars).collect(),
        _ => replacement.to_string(),
    }
}

/// The compiled rule library.
#[derive(Debug, Clone, Default)]
pub struct Sanitizer {
    rules: Vec<SanitizerRule>,
}

impl Sanitizer {
    pub fn from_config(config: SanitizerConfig) -> Result<Self, CatalogError> {
        let rules = config
            .rules
            .into_iter()
            .map(SanitizerRule::compile)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    pub fn from_yaml(yaml: &str) -> Result<Self, CatalogError> {
        Self::from_config(serde_yaml::from_str(yaml)?)
    }

    pub fn rule_ids(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.def.id.as_str()).collect()
    }

    /// Domains referenced by rules.
    pub fn domains(&self) -> impl Iterator<Item = (&str, &str)> {
        self.rules.iter().map(|r| (r.def.id.as_str(), r.def.domain.as_str()))
    }

    /// Fallback candidates for a domain, most conservative first.
    fn fallback_rules<'a>(&'a self, domain: &'a str) -> Vec<&'a SanitizerRule> {
        let mut candidates: Vec<(usize, &SanitizerRule)> = self
            .rules
            .iter()
            .enumerate()
            .filter(|(_, r)| r.def.domain == domain)
            .collect();
        candidates.sort_by_key(|(i, r)| (!r.def.conservative, r.def.priority, *i));
        candidates.into_iter().map(|(_, r)| r).collect()
    }

    /// Rewrite `text` for the given failures, in failure order.
    ///
    /// Each rule runs at most once per call.
    pub fn sanitize(
        &self,
        text: &str,
        failures: &[Failure],
        taxonomy: &DomainTaxonomy,
    ) -> SanitizationResult {
        let mut result = SanitizationResult {
            text: text.to_string(),
            ..Default::default()
        };

        for failure in failures {
            let gate = &failure.gate;
            let signature_rules: Vec<&SanitizerRule> =
                self.rules.iter().filter(|r| r.matches_signature(gate)).collect();

            if !signature_rules.is_empty() {
                for rule in signature_rules {
                    self.run_rule(rule, gate, Some(rule.def.domain.as_str()), &mut result);
                }
                continue;
            }

            let Some((domain, _)) = taxonomy.resolve(gate, &failure.result) else {
                debug!(gate = %gate, "No sanitizer signature or domain");
                result.unclassified.push(gate.clone());
                continue;
            };

            for rule in self.fallback_rules(&domain.id) {
                if result.rules_applied.contains(&rule.def.id) {
                    break;
                }
                if self.run_rule(rule, gate, Some(domain.id.as_str()), &mut result) {
                    break;
                }
            }
        }
        result
    }

    /// Run one rule if it has not run yet. Returns whether it changed the text.
    fn run_rule(
        &self,
        rule: &SanitizerRule,
        gate: &GateRef,
        domain: Option<&str>,
        result: &mut SanitizationResult,
    ) -> bool {
        if result.rules_applied.contains(&rule.def.id) {
            return false;
        }
        let (text, actions) = rule.apply(&result.text, gate, domain);
        if actions.is_empty() {
            return false;
        }
        debug!(
            gate = %gate,
            rule = %rule.def.id,
            actions = actions.len(),
            "Sanitizer rule applied"
        );
        result.text = text;
        result.actions.extend(actions);
        result.rules_applied.push(rule.def.id.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GateResult, Severity};

    const RULES: &str = r#"
version: "1.0"
rules:
  - id: absolute_guarantees
    domain: absolute_claims
    signatures: [fair_clear_not_misleading]
    conservative: true
    rewrites:
      - { pattern: '\bguaranteed\b', replacement: potential }
      - { pattern: '\b(?:zero|no) risk\b', replacement: some risk }
  - id: redact_personal_data
    domain: protected_information
    conservative: true
    rewrites:
      - { pattern: '\b(share|sell)s? your (personal|medical) (data|information|records)\b', replacement: 'protect your $2 $3' }
    redact: [email, ssn]
  - id: vague_disclosure
    domain: disclosure
    conservative: true
    rewrites:
      - { pattern: '\bterms apply\b', replacement: 'full terms and conditions are available on request' }
"#;

    const TAXONOMY: &str = r#"
domains:
  - id: absolute_claims
    keywords: [guarantee]
  - id: protected_information
    min_severity: high
    keywords: ["protected information", "personal data"]
  - id: disclosure
    keywords: [disclos]
"#;

    fn fixtures() -> (Sanitizer, DomainTaxonomy) {
        (
            Sanitizer::from_yaml(RULES).unwrap(),
            DomainTaxonomy::from_yaml(TAXONOMY).unwrap(),
        )
    }

    fn failure(module: &str, gate: &str, severity: Severity, message: &str) -> Failure {
        Failure {
            gate: GateRef::new(module, gate),
            result: GateResult::fail(severity, message),
        }
    }

    #[test]
    fn test_signature_rule_with_case_preserved() {
        let (sanitizer, taxonomy) = fixtures();
        let failures = [failure("fca_uk", "fair_clear_not_misleading", Severity::Critical, "x")];
        let out = sanitizer.sanitize("Guaranteed returns with zero risk.", &failures, &taxonomy);
        assert_eq!(out.text, "Potential returns with some risk.");
        assert_eq!(out.actions.len(), 2);
        assert_eq!(out.rules_applied, vec!["absolute_guarantees"]);

        let first = &out.actions[0];
        assert_eq!(first.before_span, TextSpan::new(0, 10));
        assert_eq!(first.before_text, "Guaranteed");
        assert_eq!(first.after_text, "Potential");
    }

    #[test]
    fn test_after_spans_point_into_output() {
        let (sanitizer, taxonomy) = fixtures();
        let failures = [failure("fca_uk", "fair_clear_not_misleading", Severity::Critical, "x")];
        let out = sanitizer.sanitize("a guaranteed b guaranteed c", &failures, &taxonomy);
        for action in &out.actions {
            assert_eq!(action.after_span.slice(&out.text), Some(action.after_text.as_str()));
        }
    }

    #[test]
    fn test_unseen_gate_generalizes_by_domain() {
        let (sanitizer, taxonomy) = fixtures();
        let failures = [failure(
            "novel_pack",
            "gate_never_seen_7",
            Severity::Critical,
            "Protected information disclosure detected",
        )];
        let out = sanitizer.sanitize(
            "We share your personal data with partners. Email jane@example.com.",
            &failures,
            &taxonomy,
        );
        assert!(!out.actions.is_empty());
        assert!(out.text.contains("We protect your personal data"));
        assert!(out.text.contains("[REDACTED EMAIL]"));
        assert_eq!(out.actions[0].domain.as_deref(), Some("protected_information"));
    }

    #[test]
    fn test_low_severity_falls_to_next_domain() {
        let (sanitizer, taxonomy) = fixtures();
        let failures = [failure("p", "g", Severity::Low, "Disclosure missing; terms apply")];
        let out = sanitizer.sanitize("Offer ends soon, terms apply.", &failures, &taxonomy);
        assert_eq!(out.rules_applied, vec!["vague_disclosure"]);
    }

    #[test]
    fn test_unknown_domain_is_empty_not_error() {
        let (sanitizer, taxonomy) = fixtures();
        let failures = [failure("p", "font_size", Severity::Critical, "Text too small")];
        let out = sanitizer.sanitize("Some text", &failures, &taxonomy);
        assert!(out.actions.is_empty());
        assert_eq!(out.text, "Some text");
        assert_eq!(out.unclassified, vec![GateRef::new("p", "font_size")]);
    }

    #[test]
    fn test_rule_runs_once_per_call() {
        let (sanitizer, taxonomy) = fixtures();
        let failures = [
            failure("fca_uk", "fair_clear_not_misleading", Severity::Critical, "x"),
            failure("other", "fair_clear_not_misleading", Severity::Critical, "x"),
        ];
        let out = sanitizer.sanitize("guaranteed", &failures, &taxonomy);
        assert_eq!(out.rules_applied.len(), 1);
        assert_eq!(out.actions.len(), 1);
    }

    #[test]
    fn test_invalid_rewrite_pattern_rejected() {
        let yaml = "rules:\n  - id: bad\n    domain: x\n    rewrites:\n      \
                    - { pattern: '(', replacement: y }\n";
        assert!(matches!(Sanitizer::from_yaml(yaml), Err(CatalogError::InvalidPattern { .. })));
    }
}

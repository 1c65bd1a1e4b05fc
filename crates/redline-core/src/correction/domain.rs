//! Corrective-action domains.
//!
//! A domain ("consent", "disclosure", "absolute_claims" ...) groups gates
//! that are fixed the same way. Known gates are bound to a domain
//! explicitly; any other gate is classified from its id, module and
//! message so that new gates land in an existing domain without code
//! changes.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::CatalogError;
use crate::types::{GateRef, GateResult, Severity};

/// One domain of the taxonomy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Domain {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Classification only considers gates at least this severe.
    #[serde(default)]
    pub min_severity: Severity,
    /// Keyword prefixes. Each word of a keyword must start a word of the
    /// haystack, so `disclos` matches `disclosure`.
    pub keywords: Vec<String>,
}

/// Explicit gate-to-domain binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainBinding {
    pub module: String,
    pub gate: String,
    pub domain: String,
}

/// How a domain was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Bound,
    Classified { score: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainTaxonomy {
    #[serde(default)]
    pub version: String,
    pub domains: Vec<Domain>,
    #[serde(default)]
    pub bindings: Vec<DomainBinding>,
}

impl DomainTaxonomy {
    pub fn from_yaml(yaml: &str) -> Result<Self, CatalogError> {
        let taxonomy: DomainTaxonomy = serde_yaml::from_str(yaml)?;
        for binding in &taxonomy.bindings {
            if taxonomy.domain(&binding.domain).is_none() {
                return Err(CatalogError::UnknownDomain {
                    owner: format!("binding {}/{}", binding.module, binding.gate),
                    domain: binding.domain.clone(),
                });
            }
        }
        Ok(taxonomy)
    }

    pub fn domain(&self, id: &str) -> Option<&Domain> {
        self.domains.iter().find(|d| d.id == id)
    }

    /// Domain for a failing gate: explicit binding first, then classification.
    pub fn resolve(&self, gate: &GateRef, result: &GateResult) -> Option<(&Domain, Resolution)> {
        let bound = self
            .bindings
            .iter()
            .find(|b| b.module == gate.module_id && b.gate == gate.gate_id)
            .and_then(|b| self.domain(&b.domain));
        if let Some(domain) = bound {
            return Some((domain, Resolution::Bound));
        }

        let classified = self.classify(
            &gate.gate_id,
            &gate.module_id,
            &result.message,
            result.severity,
        );
        if let Some((domain, score)) = classified {
            debug!(gate = %gate, domain = %domain.id, score, "Classified unbound gate");
        }
        classified.map(|(d, score)| (d, Resolution::Classified { score }))
    }

    /// Score every eligible domain against the gate's id, module and message.
    ///
    /// Each keyword found adds its word count. Highest score wins, ties go
    /// to the domain declared first, and a zero score means no domain.
    pub fn classify(
        &self,
        gate_id: &str,
        module_id: &str,
        message: &str,
        severity: Severity,
    ) -> Option<(&Domain, usize)> {
        let haystack = words(&format!("{} {} {}", gate_id, module_id, message));

        let mut best: Option<(&Domain, usize)> = None;
        for domain in self.domains.iter().filter(|d| severity >= d.min_severity) {
            let score: usize = domain
                .keywords
                .iter()
                .map(|k| words(k))
                .filter(|k| !k.is_empty() && contains_sequence(&haystack, k))
                .map(|k| k.len())
                .sum();
            if score > best.map_or(0, |(_, s)| s) {
                best = Some((domain, score));
            }
        }
        best
    }
}

/// Lowercased alphanumeric words. Underscores and punctuation split words.
fn words(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn contains_sequence(haystack: &[String], keyword: &[String]) -> bool {
    haystack
        .windows(keyword.len())
        .any(|window| window.iter().zip(keyword).all(|(h, k)| h.starts_with(k.as_str())))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TAXONOMY: &str = r#"
version: "1.0"
domains:
  - id: protected_information
    min_severity: high
    keywords: ["protected information", "personal data", phi]
  - id: disclosure
    keywords: [disclos, transparen, "privacy notice"]
  - id: consent
    keywords: [consent, "opt in"]
bindings:
  - module: gdpr_uk
    gate: transparency
    domain: disclosure
"#;

    fn taxonomy() -> DomainTaxonomy {
        DomainTaxonomy::from_yaml(TAXONOMY).unwrap()
    }

    #[test]
    fn test_binding_wins() {
        let t = taxonomy();
        let (domain, how) = t
            .resolve(
                &GateRef::new("gdpr_uk", "transparency"),
                &GateResult::fail(Severity::Low, "consent"),
            )
            .unwrap();
        assert_eq!(domain.id, "disclosure");
        assert_eq!(how, Resolution::Bound);
    }

    #[test]
    fn test_unseen_gate_classified_by_message() {
        let t = taxonomy();
        let (domain, score) = t
            .classify(
                "synthetic_rule_42",
                "unknown_pack",
                "Protected information disclosure detected",
                Severity::Critical,
            )
            .unwrap();
        assert_eq!(domain.id, "protected_information");
        assert_eq!(score, 2);
    }

    #[test]
    fn test_min_severity_excludes_domain() {
        let t = taxonomy();
        let (domain, _) = t
            .classify("x", "y", "Protected information disclosure detected", Severity::Low)
            .unwrap();
        assert_eq!(domain.id, "disclosure");
    }

    #[test]
    fn test_gate_id_words_count() {
        let t = taxonomy();
        let (domain, _) = t.classify("explicit_opt_in", "m", "", Severity::None).unwrap();
        assert_eq!(domain.id, "consent");
    }

    #[test]
    fn test_no_match_is_none() {
        let t = taxonomy();
        assert!(t.classify("font_size", "layout", "Text too small", Severity::Critical).is_none());
    }

    #[test]
    fn test_unknown_binding_domain_rejected() {
        let yaml = "domains: []\nbindings:\n  - {module: m, gate: g, domain: nowhere}\n";
        assert!(matches!(
            DomainTaxonomy::from_yaml(yaml),
            Err(CatalogError::UnknownDomain { .. })
        ));
    }
}

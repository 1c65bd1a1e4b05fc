//! Cross-module validation.
//!
//! Individual gates only see their own rule. Some problems only show up
//! in combination: a consent gate passes, but the transparency gate that
//! would make that consent informed failed. The cross validator holds a
//! fixed table of such combinations and reports an [`Issue`] when every
//! precondition of a rule holds.
//!
//! Rules are independent. Output follows declaration order, and module
//! results are never modified.

use std::collections::BTreeMap;

use crate::types::{AnalyzerFinding, Issue, ModuleResult, Severity, Status};

/// A condition over the combined evaluation output.
#[derive(Debug, Clone, Copy)]
pub enum Precondition {
    /// A gate's status is one of `statuses`. Absent modules never match.
    Gate {
        module: &'static str,
        gate: &'static str,
        statuses: &'static [Status],
    },
    /// At least one gate in the module failed.
    ModuleFails { module: &'static str },
    /// An analyzer reported an entity at or above `min_severity`.
    AnalyzerEntity {
        analyzer: &'static str,
        min_severity: Severity,
    },
    /// The text mentions any of these word prefixes.
    Mentions(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct CombinationRule {
    pub id: &'static str,
    pub severity: Severity,
    pub message: &'static str,
    pub preconditions: &'static [Precondition],
}

const FAIL_OR_WARN: &[Status] = &[Status::Fail, Status::Warning];

/// The combination table, in reporting order.
pub const RULES: &[CombinationRule] = &[
    CombinationRule {
        id: "CV001",
        severity: Severity::High,
        message: "Consent passes but transparency fails: consent may not be informed",
        preconditions: &[
            Precondition::Gate { module: "gdpr_uk", gate: "consent", statuses: &[Status::Pass] },
            Precondition::Gate { module: "gdpr_uk", gate: "transparency", statuses: FAIL_OR_WARN },
        ],
    },
    CombinationRule {
        id: "CV002",
        severity: Severity::High,
        message: "Promotion reads as fair and clear only because the risk warning is missing",
        preconditions: &[
            Precondition::Gate {
                module: "fca_uk",
                gate: "fair_clear_not_misleading",
                statuses: &[Status::Pass],
            },
            Precondition::Gate { module: "fca_uk", gate: "risk_warning", statuses: FAIL_OR_WARN },
        ],
    },
    CombinationRule {
        id: "CV003",
        severity: Severity::Critical,
        message: "Severe personal data present without an established lawful basis",
        preconditions: &[
            Precondition::AnalyzerEntity { analyzer: "pii", min_severity: Severity::Critical },
            Precondition::Gate {
                module: "gdpr_uk",
                gate: "lawful_basis",
                statuses: &[Status::Fail, Status::Warning, Status::NotApplicable],
            },
        ],
    },
    CombinationRule {
        id: "CV004",
        severity: Severity::Critical,
        message: "Health information disclosure combined with data-protection failures",
        preconditions: &[
            Precondition::Gate {
                module: "hipaa_us",
                gate: "phi_disclosure",
                statuses: &[Status::Fail],
            },
            Precondition::ModuleFails { module: "gdpr_uk" },
        ],
    },
    CombinationRule {
        id: "CV005",
        severity: Severity::Critical,
        message: "Misleading claims combined with pressure-selling language",
        preconditions: &[
            Precondition::Gate {
                module: "fca_uk",
                gate: "fair_clear_not_misleading",
                statuses: &[Status::Fail],
            },
            Precondition::Gate {
                module: "fca_uk",
                gate: "pressure_selling",
                statuses: &[Status::Fail],
            },
        ],
    },
    CombinationRule {
        id: "CV006",
        severity: Severity::High,
        message: "Text concerns children but consent is not clearly obtained",
        preconditions: &[
            Precondition::Mentions(&["child", "minor", "under 13", "under 16", "pupil"]),
            Precondition::Gate { module: "gdpr_uk", gate: "consent", statuses: FAIL_OR_WARN },
        ],
    },
];

impl Precondition {
    fn holds(
        &self,
        words: &[String],
        modules: &[ModuleResult],
        findings: &BTreeMap<String, AnalyzerFinding>,
    ) -> bool {
        match *self {
            Precondition::Gate { module, gate, statuses } => modules
                .iter()
                .find(|m| m.module_id == module)
                .and_then(|m| m.gate(gate))
                .map_or(false, |r| statuses.contains(&r.status)),
            Precondition::ModuleFails { module } => modules
                .iter()
                .find(|m| m.module_id == module)
                .map_or(false, |m| m.summary.fail > 0),
            Precondition::AnalyzerEntity { analyzer, min_severity } => findings
                .get(analyzer)
                .map_or(false, |f| {
                    f.entities().iter().any(|e| {
                        e.get("severity")
                            .and_then(|s| serde_json::from_value::<Severity>(s.clone()).ok())
                            .map_or(false, |s| s >= min_severity)
                    })
                }),
            Precondition::Mentions(prefixes) => prefixes.iter().any(|p| mentions(words, p)),
        }
    }
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn mentions(words: &[String], phrase: &str) -> bool {
    let wanted: Vec<&str> = phrase.split_whitespace().collect();
    !wanted.is_empty()
        && words
            .windows(wanted.len())
            .any(|w| w.iter().zip(&wanted).all(|(word, p)| word.starts_with(p)))
}

/// Run the combination table.
pub fn run(
    text: &str,
    modules: &[ModuleResult],
    analyzer_findings: &BTreeMap<String, AnalyzerFinding>,
) -> Vec<Issue> {
    run_rules(RULES, text, modules, analyzer_findings)
}

/// Run an arbitrary rule table.
pub fn run_rules(
    rules: &[CombinationRule],
    text: &str,
    modules: &[ModuleResult],
    analyzer_findings: &BTreeMap<String, AnalyzerFinding>,
) -> Vec<Issue> {
    let words = tokenize(text);
    rules
        .iter()
        .filter(|rule| {
            rule.preconditions
                .iter()
                .all(|p| p.holds(&words, modules, analyzer_findings))
        })
        .map(|rule| Issue {
            id: rule.id.to_string(),
            severity: rule.severity,
            message: rule.message.to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GateEntry, GateResult};

    fn module(id: &str, gates: &[(&str, GateResult)]) -> ModuleResult {
        ModuleResult::new(
            id,
            "1.0.0",
            gates
                .iter()
                .map(|(g, r)| GateEntry { gate_id: g.to_string(), result: r.clone() })
                .collect(),
        )
    }

    fn pii(severity: &str) -> BTreeMap<String, AnalyzerFinding> {
        let mut findings = BTreeMap::new();
        findings.insert(
            "pii".to_string(),
            AnalyzerFinding {
                status: Status::Fail,
                severity: Severity::Critical,
                message: "pii".into(),
                details: Some(serde_json::json!({
                    "entities": [{"type": "ssn", "severity": severity}]
                })),
            },
        );
        findings
    }

    #[test]
    fn test_consent_without_transparency() {
        let modules = vec![module(
            "gdpr_uk",
            &[
                ("consent", GateResult::pass("ok")),
                ("transparency", GateResult::warning(Severity::Medium, "no notice")),
            ],
        )];
        let issues = run("text", &modules, &BTreeMap::new());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].id, "CV001");
    }

    #[test]
    fn test_missing_module_never_matches() {
        let issues = run("text", &[], &pii("critical"));
        assert!(issues.is_empty());
    }

    #[test]
    fn test_analyzer_entities_by_key() {
        let modules = vec![module(
            "gdpr_uk",
            &[("lawful_basis", GateResult::not_applicable("n/a"))],
        )];
        assert_eq!(run("t", &modules, &pii("critical"))[0].id, "CV003");
        assert!(run("t", &modules, &pii("medium")).is_empty());
    }

    #[test]
    fn test_output_in_declaration_order() {
        let modules = vec![
            module(
                "gdpr_uk",
                &[
                    ("consent", GateResult::fail(Severity::High, "implied")),
                    ("lawful_basis", GateResult::fail(Severity::High, "none")),
                ],
            ),
            module("hipaa_us", &[("phi_disclosure", GateResult::fail(Severity::Critical, "phi"))]),
        ];
        let ids: Vec<_> = run("Data about children", &modules, &pii("critical"))
            .into_iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec!["CV003", "CV004", "CV006"]);
    }

    #[test]
    fn test_mentions_phrase_prefix() {
        let words = tokenize("Services for users Under 16 years");
        assert!(mentions(&words, "under 16"));
        assert!(!mentions(&words, "child"));
    }
}

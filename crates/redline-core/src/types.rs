//! Core data model shared by the gate engine, cross validator and
//! correction engine.
//!
//! Every value here is created fresh per evaluation and never mutated
//! after the call that produced it returns.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Outcome of a single gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    #[serde(rename = "PASS")]
    Pass,
    #[serde(rename = "WARNING")]
    Warning,
    #[serde(rename = "FAIL")]
    Fail,
    /// The gate's relevance predicate rejected the document.
    #[serde(rename = "N/A")]
    NotApplicable,
    /// The gate faulted (error, panic or timeout).
    #[serde(rename = "ERROR")]
    Error,
}

impl Status {
    /// Position in the risk ordering `FAIL > WARNING > PASS`.
    ///
    /// `N/A` and `ERROR` are excluded from risk computation.
    pub fn risk_rank(self) -> Option<u8> {
        match self {
            Status::Pass => Some(0),
            Status::Warning => Some(1),
            Status::Fail => Some(2),
            Status::NotApplicable | Status::Error => None,
        }
    }

    /// Move toward `FAIL`, never away from it.
    ///
    /// Statuses outside the risk ordering are left untouched.
    pub fn escalate(self, target: Status) -> Status {
        match (self.risk_rank(), target.risk_rank()) {
            (Some(current), Some(wanted)) if wanted > current => target,
            _ => self,
        }
    }

    /// FAIL and WARNING results are candidates for correction.
    pub fn is_correctable(self) -> bool {
        matches!(self, Status::Fail | Status::Warning)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Pass => "PASS",
            Status::Warning => "WARNING",
            Status::Fail => "FAIL",
            Status::NotApplicable => "N/A",
            Status::Error => "ERROR",
        };
        f.write_str(label)
    }
}

/// Severity ordering: `critical > high > medium > low > none`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Severity::None => "none",
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Result of one gate against one document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateResult {
    pub status: Status,

    #[serde(default)]
    pub severity: Severity,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, JsonValue>,
}

impl GateResult {
    fn new(status: Status, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            status,
            severity,
            message: message.into(),
            suggestion: None,
            details: None,
            metadata: BTreeMap::new(),
        }
    }

    pub fn pass(message: impl Into<String>) -> Self {
        Self::new(Status::Pass, Severity::None, message)
    }

    pub fn warning(severity: Severity, message: impl Into<String>) -> Self {
        Self::new(Status::Warning, severity, message)
    }

    pub fn fail(severity: Severity, message: impl Into<String>) -> Self {
        Self::new(Status::Fail, severity, message)
    }

    pub fn not_applicable(message: impl Into<String>) -> Self {
        Self::new(Status::NotApplicable, Severity::None, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(Status::Error, Severity::None, message)
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_details(mut self, details: JsonValue) -> Self {
        self.details = Some(details);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: JsonValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether the semantic augmentor matched any rule on this result.
    pub fn has_semantic_hits(&self) -> bool {
        self.metadata
            .get(SEMANTIC_HITS_KEY)
            .and_then(JsonValue::as_array)
            .map(|hits| !hits.is_empty())
            .unwrap_or(false)
    }
}

/// Metadata key under which the augmentor records matched rule ids.
pub const SEMANTIC_HITS_KEY: &str = "semantic_hits";

/// A gate result tagged with its gate id, kept in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateEntry {
    pub gate_id: String,

    #[serde(flatten)]
    pub result: GateResult,
}

/// Counts of gate results by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSummary {
    pub pass: usize,
    pub warning: usize,
    pub fail: usize,
    pub not_applicable: usize,
    pub error: usize,
}

impl StatusSummary {
    pub fn record(&mut self, status: Status) {
        match status {
            Status::Pass => self.pass += 1,
            Status::Warning => self.warning += 1,
            Status::Fail => self.fail += 1,
            Status::NotApplicable => self.not_applicable += 1,
            Status::Error => self.error += 1,
        }
    }

    pub fn merge(&mut self, other: &StatusSummary) {
        self.pass += other.pass;
        self.warning += other.warning;
        self.fail += other.fail;
        self.not_applicable += other.not_applicable;
        self.error += other.error;
    }

    pub fn total(&self) -> usize {
        self.pass + self.warning + self.fail + self.not_applicable + self.error
    }
}

/// All gate results for one module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleResult {
    pub module_id: String,

    #[serde(default)]
    pub version: String,

    pub gates: Vec<GateEntry>,

    #[serde(default)]
    pub summary: StatusSummary,
}

impl ModuleResult {
    pub fn new(
        module_id: impl Into<String>,
        version: impl Into<String>,
        gates: Vec<GateEntry>,
    ) -> Self {
        let mut summary = StatusSummary::default();
        for entry in &gates {
            summary.record(entry.result.status);
        }
        Self {
            module_id: module_id.into(),
            version: version.into(),
            gates,
            summary,
        }
    }

    pub fn gate(&self, gate_id: &str) -> Option<&GateResult> {
        self.gates
            .iter()
            .find(|entry| entry.gate_id == gate_id)
            .map(|entry| &entry.result)
    }
}

/// Overall document risk derived from the worst status/severity pair.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    #[default]
    Minimal,
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Map the worst `(status, severity)` pair to a risk level.
    pub fn from_pair(status: Status, severity: Severity) -> Self {
        match status {
            Status::Fail => match severity {
                Severity::Critical => RiskLevel::Critical,
                Severity::High => RiskLevel::High,
                Severity::Medium => RiskLevel::Medium,
                Severity::Low | Severity::None => RiskLevel::Low,
            },
            Status::Warning => match severity {
                Severity::Critical | Severity::High => RiskLevel::Medium,
                _ => RiskLevel::Low,
            },
            _ => RiskLevel::Minimal,
        }
    }

    /// Ordinal used by candidate selection (minimal = 0 .. critical = 4).
    pub fn weight(self) -> u8 {
        self as u8
    }
}

/// Identifies one gate within one module.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GateRef {
    pub module_id: String,
    pub gate_id: String,
}

impl GateRef {
    pub fn new(module_id: impl Into<String>, gate_id: impl Into<String>) -> Self {
        Self {
            module_id: module_id.into(),
            gate_id: gate_id.into(),
        }
    }
}

impl fmt::Display for GateRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.module_id, self.gate_id)
    }
}

/// A cross-validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub id: String,
    pub severity: Severity,
    pub message: String,
}

/// Output of an auxiliary analyzer (PII, bias, harm ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyzerFinding {
    pub status: Status,

    #[serde(default)]
    pub severity: Severity,

    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<JsonValue>,
}

impl AnalyzerFinding {
    /// Entities reported under `details.entities` (or `details.spans`).
    pub fn entities(&self) -> Vec<&JsonValue> {
        let Some(details) = &self.details else {
            return Vec::new();
        };
        ["entities", "spans"]
            .iter()
            .filter_map(|key| details.get(*key).and_then(JsonValue::as_array))
            .flatten()
            .collect()
    }
}

/// A correctable gate failure, owned so it can outlive its report.
#[derive(Debug, Clone, PartialEq)]
pub struct Failure {
    pub gate: GateRef,
    pub result: GateResult,
}

/// The unit exchanged between the gate engine, the cross validator and
/// the correction engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub overall_risk: RiskLevel,

    /// Gate whose result determined `overall_risk`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk_driver: Option<GateRef>,

    #[serde(default)]
    pub document_type: String,

    pub modules: Vec<ModuleResult>,

    #[serde(default)]
    pub summary: StatusSummary,

    #[serde(default)]
    pub cross_validation_issues: Vec<Issue>,

    #[serde(default)]
    pub analyzer_findings: BTreeMap<String, AnalyzerFinding>,
}

impl ValidationReport {
    pub fn module(&self, module_id: &str) -> Option<&ModuleResult> {
        self.modules.iter().find(|m| m.module_id == module_id)
    }

    pub fn gate(&self, module_id: &str, gate_id: &str) -> Option<&GateResult> {
        self.module(module_id).and_then(|m| m.gate(gate_id))
    }

    pub fn module_ids(&self) -> Vec<String> {
        self.modules.iter().map(|m| m.module_id.clone()).collect()
    }

    /// FAIL/WARNING results in declaration order, optionally limited to
    /// a set of modules.
    pub fn correctable_failures(&self, scope: Option<&[String]>) -> Vec<Failure> {
        self.modules
            .iter()
            .filter(|m| scope.map_or(true, |ids| ids.iter().any(|id| id == &m.module_id)))
            .flat_map(|m| {
                m.gates
                    .iter()
                    .filter(|entry| entry.result.status.is_correctable())
                    .map(|entry| Failure {
                        gate: GateRef::new(&m.module_id, &entry.gate_id),
                        result: entry.result.clone(),
                    })
            })
            .collect()
    }

    fn count_where(&self, predicate: impl Fn(&GateResult) -> bool) -> usize {
        self.modules
            .iter()
            .flat_map(|m| m.gates.iter())
            .filter(|entry| predicate(&entry.result))
            .count()
    }

    pub fn failure_count(&self) -> usize {
        self.count_where(|r| r.status == Status::Fail)
    }

    pub fn critical_failure_count(&self) -> usize {
        self.count_where(|r| r.status == Status::Fail && r.severity == Severity::Critical)
    }

    pub fn warning_count(&self) -> usize {
        self.count_where(|r| r.status == Status::Warning)
    }

    pub fn semantic_hit_count(&self) -> usize {
        self.count_where(GateResult::has_semantic_hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_with_wire_names() {
        assert_eq!(serde_json::to_string(&Status::NotApplicable).unwrap(), "\"N/A\"");
        assert_eq!(serde_json::to_string(&Status::Fail).unwrap(), "\"FAIL\"");
        let parsed: Status = serde_json::from_str("\"WARNING\"").unwrap();
        assert_eq!(parsed, Status::Warning);
    }

    #[test]
    fn test_escalate_only_moves_toward_fail() {
        assert_eq!(Status::Pass.escalate(Status::Fail), Status::Fail);
        assert_eq!(Status::Fail.escalate(Status::Warning), Status::Fail);
        assert_eq!(Status::Warning.escalate(Status::Pass), Status::Warning);
        assert_eq!(Status::NotApplicable.escalate(Status::Fail), Status::NotApplicable);
        assert_eq!(Status::Error.escalate(Status::Fail), Status::Error);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Low > Severity::None);
    }

    #[test]
    fn test_risk_mapping() {
        assert_eq!(RiskLevel::from_pair(Status::Fail, Severity::Critical), RiskLevel::Critical);
        assert_eq!(RiskLevel::from_pair(Status::Warning, Severity::High), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_pair(Status::Warning, Severity::Low), RiskLevel::Low);
        assert_eq!(RiskLevel::from_pair(Status::Pass, Severity::None), RiskLevel::Minimal);
        assert_eq!(RiskLevel::Critical.weight(), 4);
    }

    #[test]
    fn test_gate_entry_flattens_result() {
        let entry = GateEntry {
            gate_id: "consent".to_string(),
            result: GateResult::fail(Severity::High, "Implied consent"),
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["gate_id"], "consent");
        assert_eq!(json["status"], "FAIL");
        assert_eq!(json["severity"], "high");

        let back: GateEntry = serde_json::from_value(json).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_module_summary_counts() {
        let module = ModuleResult::new(
            "gdpr_uk",
            "1.0.0",
            vec![
                GateEntry { gate_id: "a".into(), result: GateResult::pass("ok") },
                GateEntry { gate_id: "b".into(), result: GateResult::fail(Severity::High, "no") },
                GateEntry { gate_id: "c".into(), result: GateResult::not_applicable("skip") },
            ],
        );
        assert_eq!(module.summary.pass, 1);
        assert_eq!(module.summary.fail, 1);
        assert_eq!(module.summary.not_applicable, 1);
        assert_eq!(module.summary.total(), 3);
    }

    #[test]
    fn test_analyzer_entities_reads_documented_keys() {
        let finding = AnalyzerFinding {
            status: Status::Fail,
            severity: Severity::Critical,
            message: "PII".into(),
            details: Some(serde_json::json!({
                "entities": [{"type": "ssn", "severity": "critical"}],
                "spans": [{"type": "email", "severity": "medium"}]
            })),
        };
        assert_eq!(finding.entities().len(), 2);
    }
}

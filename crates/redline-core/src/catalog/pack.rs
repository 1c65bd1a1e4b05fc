//! Rule-pack parsing from YAML.
//!
//! A rule pack defines one module and its pattern gates. Packs are
//! validated against the rule-pack JSON Schema before they are
//! deserialised.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::schema::validate_rule_pack;
use super::CatalogError;
use crate::gate::PatternGate;
use crate::module::{Module, ModuleInfo};
use crate::types::Severity;

/// A labelled regex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternDefinition {
    pub pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Outcome when none of the `require_any` patterns is found.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingOutcome {
    #[default]
    Fail,
    Warning,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GateMessages {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub missing: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pass: Option<String>,
}

/// One gate as written in a rule pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDefinition {
    pub id: String,
    pub name: String,
    pub severity: Severity,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    /// Document types the gate applies to. Empty means all.
    #[serde(default)]
    pub document_types: Vec<String>,
    /// Topic patterns. Empty means every document is in scope.
    #[serde(default)]
    pub relevance: Vec<String>,
    #[serde(default)]
    pub fail_if_any: Vec<PatternDefinition>,
    #[serde(default)]
    pub require_any: Vec<String>,
    #[serde(default)]
    pub missing_outcome: MissingOutcome,
    #[serde(default)]
    pub messages: GateMessages,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suggestion: Option<String>,
}

/// A module definition with its gates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RulePack {
    pub module: ModuleInfo,
    pub gates: Vec<GateDefinition>,
}

impl RulePack {
    /// Parse and schema-validate a pack.
    pub fn from_yaml(yaml: &str) -> Result<Self, CatalogError> {
        let value: serde_json::Value = serde_yaml::from_str(yaml)?;
        validate_rule_pack(&value).map_err(|errors| CatalogError::Schema {
            source_name: value
                .pointer("/module/id")
                .and_then(|v| v.as_str())
                .unwrap_or("<unnamed pack>")
                .to_string(),
            errors,
        })?;
        Ok(serde_json::from_value(value)?)
    }

    /// Compile every gate and build the module.
    pub fn into_module(self) -> Result<Module, CatalogError> {
        let mut module = Module::new(self.module);
        for def in &self.gates {
            module.register(Arc::new(PatternGate::from_definition(def)?))?;
        }
        Ok(module)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Status;

    const PACK: &str = r#"
module:
  id: demo
  name: Demo rules
  version: "1.2.0"
  reviewed: 2025-01-31
gates:
  - id: no_guarantees
    name: No guarantees
    severity: critical
    relevance: ['\binvest']
    fail_if_any:
      - { pattern: '\bguaranteed\b', label: guarantee }
  - id: risk_warning
    name: Risk warning
    severity: high
    relevance: ['\binvest']
    require_any: ['capital at risk']
    missing_outcome: warning
"#;

    #[test]
    fn test_pack_builds_module() {
        let module = RulePack::from_yaml(PACK).unwrap().into_module().unwrap();
        assert_eq!(module.id(), "demo");
        assert_eq!(module.version(), "1.2.0");
        assert_eq!(module.gate_ids(), vec!["no_guarantees", "risk_warning"]);
        assert_eq!(
            module.info().reviewed,
            chrono::NaiveDate::from_ymd_opt(2025, 1, 31)
        );

        let result = module.evaluate("Invest today for guaranteed gains", "general");
        assert_eq!(result.gates[0].result.status, Status::Fail);
        assert_eq!(result.gates[1].result.status, Status::Warning);
    }

    #[test]
    fn test_schema_rejects_bad_severity() {
        let bad = PACK.replace("severity: critical", "severity: catastrophic");
        let err = RulePack::from_yaml(&bad).unwrap_err();
        assert!(matches!(err, CatalogError::Schema { .. }));
    }

    #[test]
    fn test_schema_rejects_unknown_field() {
        let bad = PACK.replace(
            "    name: No guarantees",
            "    name: No guarantees\n    colour: red",
        );
        assert!(matches!(RulePack::from_yaml(&bad), Err(CatalogError::Schema { .. })));
    }

    #[test]
    fn test_duplicate_gate_id_rejected() {
        let bad = PACK.replace("id: risk_warning", "id: no_guarantees");
        let err = RulePack::from_yaml(&bad).unwrap().into_module().unwrap_err();
        assert!(matches!(err, CatalogError::DuplicateGate { .. }));
    }
}

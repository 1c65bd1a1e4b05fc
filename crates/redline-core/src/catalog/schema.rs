//! JSON Schema validation for rule packs.
//!
//! Packs are validated against `schemas/rule-pack.schema.json`, embedded
//! at compile time and compiled once.

use std::sync::OnceLock;

use super::CatalogError;

const RULE_PACK_SCHEMA_JSON: &str = include_str!("../../schemas/rule-pack.schema.json");

static COMPILED_SCHEMA: OnceLock<Result<jsonschema::Validator, String>> = OnceLock::new();

fn get_validator() -> Result<&'static jsonschema::Validator, CatalogError> {
    let result = COMPILED_SCHEMA.get_or_init(|| {
        let schema_value: serde_json::Value = match serde_json::from_str(RULE_PACK_SCHEMA_JSON) {
            Ok(v) => v,
            Err(e) => return Err(format!("Invalid schema JSON: {}", e)),
        };

        jsonschema::options()
            .build(&schema_value)
            .map_err(|e| format!("Failed to compile schema: {}", e))
    });

    result
        .as_ref()
        .map_err(|e| CatalogError::SchemaLoad(e.clone()))
}

/// Validate a rule pack, returning every violation found.
pub fn validate_rule_pack(pack: &serde_json::Value) -> Result<(), Vec<String>> {
    let validator = get_validator().map_err(|e| vec![e.to_string()])?;

    let errors: Vec<String> = validator
        .iter_errors(pack)
        .map(|e| format!("{} at {}", e, e.instance_path))
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal() -> serde_json::Value {
        json!({
            "module": { "id": "demo", "name": "Demo", "version": "1.0" },
            "gates": [
                { "id": "g1", "name": "Gate", "severity": "low", "require_any": ["x"] }
            ]
        })
    }

    #[test]
    fn test_minimal_pack_passes() {
        assert!(validate_rule_pack(&minimal()).is_ok());
    }

    #[test]
    fn test_gate_without_patterns_fails() {
        let mut pack = minimal();
        pack["gates"][0] = json!({ "id": "g1", "name": "Gate", "severity": "low" });
        assert!(validate_rule_pack(&pack).is_err());
    }

    #[test]
    fn test_bad_identifier_fails() {
        let mut pack = minimal();
        pack["module"]["id"] = json!("Demo Pack");
        let errors = validate_rule_pack(&pack).unwrap_err();
        assert!(errors.iter().any(|e| e.contains("/module/id")));
    }

    #[test]
    fn test_empty_gate_list_fails() {
        let mut pack = minimal();
        pack["gates"] = json!([]);
        assert!(validate_rule_pack(&pack).is_err());
    }

    #[test]
    fn test_bad_version_fails() {
        let mut pack = minimal();
        pack["module"]["version"] = json!("v1");
        assert!(validate_rule_pack(&pack).is_err());
    }
}

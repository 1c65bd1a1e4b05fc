//! # redline-core
//!
//! Deterministic compliance rule evaluation and remediation.
//!
//! This crate answers two questions about a piece of text:
//! - Which regulatory rules does it break, and how badly?
//! - What is the smallest deterministic rewrite that fixes it?
//!
//! ## Key Guarantees
//!
//! 1. **Deterministic**: the same text, document type and catalog always
//!    produce the same report and the same correction
//! 2. **No model calls**: evaluation and correction are rule-based
//! 3. **Traceable**: every failure names its module, gate and evidence;
//!    every rewrite is recorded with its spans
//! 4. **Fault-isolated**: a broken gate yields `ERROR` for that gate only
//!
//! ## Example
//!
//! ```rust,ignore
//! use redline_core::{evaluate, correct, EvaluationRequest, CorrectionRequest};
//!
//! let report = evaluate(&EvaluationRequest::new("Guaranteed 15% returns!"))?;
//! println!("risk: {:?}, driver: {:?}", report.overall_risk, report.risk_driver);
//!
//! let fixed = correct(&CorrectionRequest::new("Guaranteed 15% returns!"))?;
//! println!("{}", fixed.corrected_text);
//! ```

pub mod analyzers;
pub mod api;
pub mod catalog;
pub mod correction;
pub mod cross_validation;
pub mod engine;
pub mod gate;
pub mod module;
pub mod selection;
pub mod semantic;
pub mod span;
pub mod types;

// Re-export main types at crate root
pub use analyzers::{Analyzer, PiiAnalyzer};
pub use api::{
    AdvancedOptions, CorrectionRequest, EvaluationRequest, InputError, MultiModelRequest,
    ProviderSpec, DEFAULT_DOCUMENT_TYPE, MAX_TEXT_BYTES,
};
pub use catalog::{Catalog, CatalogBuilder, CatalogError, RulePack};
pub use correction::{
    CorrectionConfig, CorrectionResult, SynthesisEngine, Termination, UnresolvedGate,
    UnresolvedReason,
};
pub use engine::{fold_risk, GateEngine, ModuleEvaluator};
pub use gate::{Gate, GateFault, GateMetadata, PatternGate};
pub use module::{Module, ModuleInfo, ModuleRegistry};
pub use selection::{select, CandidateScore, Selection};
pub use semantic::SemanticAugmentor;
pub use span::TextSpan;
pub use types::{
    AnalyzerFinding, Failure, GateEntry, GateRef, GateResult, Issue, ModuleResult, RiskLevel,
    Severity, Status, StatusSummary, ValidationReport,
};

use thiserror::Error;

/// Errors surfaced by the convenience entry points.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid request: {0}")]
    Input(#[from] InputError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// Evaluate a request against the built-in catalog.
pub fn evaluate(request: &EvaluationRequest) -> Result<ValidationReport, EngineError> {
    request.validate()?;
    let engine = GateEngine::builtin()?;
    Ok(engine.evaluate(&request.text, &request.document_type, request.modules.as_deref())?)
}

/// Correct a request against the built-in catalog with default limits.
pub fn correct(request: &CorrectionRequest) -> Result<CorrectionResult, EngineError> {
    let engine = GateEngine::builtin()?;
    Ok(correction::correct_request(&engine, request, CorrectionConfig::default())?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_evaluation() {
        let report = evaluate(&EvaluationRequest::new("Our bakery opens at nine.")).unwrap();
        assert_eq!(report.overall_risk, RiskLevel::Minimal);
        assert!(report.risk_driver.is_none());
        assert_eq!(report.module_ids(), vec!["fca_uk", "gdpr_uk", "hipaa_us"]);
    }

    #[test]
    fn test_empty_text_rejected() {
        let err = evaluate(&EvaluationRequest::new("")).unwrap_err();
        assert!(matches!(err, EngineError::Input(InputError::EmptyText)));
    }

    #[test]
    fn test_identifier_without_lawful_basis_cross_validates() {
        let report = evaluate(&EvaluationRequest::new("Contact 123-45-6789 for details.")).unwrap();
        assert_eq!(report.analyzer_findings["pii"].status, Status::Fail);
        assert!(report.cross_validation_issues.iter().any(|i| i.id == "CV003"));
    }

    #[test]
    fn test_guarantee_correction_end_to_end() {
        let mut request =
            CorrectionRequest::new("Guaranteed 15% returns with zero risk for everyone.");
        request.modules = Some(vec!["fca_uk".into()]);
        let result = correct(&request).unwrap();

        assert_eq!(result.validation.overall_risk, RiskLevel::Minimal);
        assert_eq!(result.termination, Termination::Converged);
        assert!(result.corrected_text.to_lowercase().contains("capital at risk"));
        assert!(result.determinism.repeatable);
    }

    #[test]
    fn test_multi_level_correction_covers_all_modules() {
        let mut request = CorrectionRequest::new(
            "Act now! By using this website, you automatically agree to our data collection.",
        );
        request.advanced_options.multi_level = true;
        let result = correct(&request).unwrap();

        let lower = result.corrected_text.to_lowercase();
        assert!(!lower.contains("act now"));
        assert!(!lower.contains("automatically agree"));
        let report = &result.validation;
        assert_eq!(report.gate("fca_uk", "pressure_selling").unwrap().status, Status::Pass);
        assert_eq!(report.gate("gdpr_uk", "consent").unwrap().status, Status::Pass);
    }
}

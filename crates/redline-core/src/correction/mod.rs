//! Deterministic remediation.
//!
//! Failing gates are fixed in two stages. The [`Sanitizer`] rewrites the
//! offending language in place; whatever still fails is mapped through the
//! [`DomainTaxonomy`] to a snippet from the [`SnippetRegistry`]. The
//! [`SynthesisEngine`] drives both inside a bounded re-evaluation loop.

mod domain;
mod sanitizer;
mod snippets;
mod synthesis;

pub use domain::{Domain, DomainBinding, DomainTaxonomy, Resolution};
pub use sanitizer::{
    RewriteDefinition, SanitizationAction, SanitizationResult, Sanitizer, SanitizerConfig,
    SanitizerRuleDefinition,
};
pub use snippets::{
    CorrectionPlan, SnippetAction, SnippetConfig, SnippetDefinition, SnippetRegistry,
};
pub use synthesis::{
    fingerprint, CorrectionConfig, CorrectionResult, Determinism, SynthesisEngine, Termination,
    UnresolvedGate, UnresolvedReason,
};

use crate::api::{CorrectionRequest, InputError};
use crate::engine::{GateEngine, ModuleEvaluator};

/// Validate a correction request and run it.
pub fn correct_request(
    engine: &GateEngine,
    request: &CorrectionRequest,
    config: CorrectionConfig,
) -> Result<CorrectionResult, InputError> {
    correct_request_with(engine, engine, request, config)
}

/// As [`correct_request`], re-evaluating through `evaluator`.
pub fn correct_request_with(
    engine: &GateEngine,
    evaluator: &dyn ModuleEvaluator,
    request: &CorrectionRequest,
    config: CorrectionConfig,
) -> Result<CorrectionResult, InputError> {
    request.validate()?;
    SynthesisEngine::with_evaluator(engine, evaluator, config).correct(
        &request.text,
        &request.document_type,
        request.modules.as_deref(),
        request.validation_results.as_ref(),
        request.advanced_options,
    )
}

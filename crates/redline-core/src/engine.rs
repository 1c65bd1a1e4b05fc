//! The Gate Engine.
//!
//! Runs the selected modules against one document, passes every raw
//! result through the semantic augmentor, runs the analyzers and the
//! cross validator, and folds everything into a [`ValidationReport`].
//!
//! ## Risk fold
//!
//! `overall_risk` comes from the single worst gate, compared by status
//! first (`FAIL > WARNING > PASS`) and severity second. `N/A` and `ERROR`
//! results take no part. Ties keep the gate that comes first in
//! (module, gate) declaration order, so the report does not depend on
//! scheduling.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::api::InputError;
use crate::catalog::{Catalog, CatalogError};
use crate::cross_validation;
use crate::gate::Gate;
use crate::module::{isolate, Module};
use crate::types::{
    GateRef, GateResult, ModuleResult, RiskLevel, Severity, Status, StatusSummary,
    ValidationReport,
};

/// Synchronous evaluation engine over a shared catalog.
#[derive(Debug, Clone)]
pub struct GateEngine {
    catalog: Arc<Catalog>,
}

impl GateEngine {
    pub fn new(catalog: Arc<Catalog>) -> Self {
        Self { catalog }
    }

    /// Engine over the built-in catalog.
    pub fn builtin() -> Result<Self, CatalogError> {
        Ok(Self::new(Catalog::builtin()?))
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn shared_catalog(&self) -> Arc<Catalog> {
        Arc::clone(&self.catalog)
    }

    /// Resolve requested module ids, in request order.
    pub fn resolve_modules(&self, modules: Option<&[String]>) -> Result<Vec<&Module>, InputError> {
        self.catalog.modules().resolve(modules)
    }

    /// Evaluate `text` against the requested modules (all when `None`).
    pub fn evaluate(
        &self,
        text: &str,
        document_type: &str,
        modules: Option<&[String]>,
    ) -> Result<ValidationReport, InputError> {
        let selected = self.resolve_modules(modules)?;
        Ok(self.evaluate_modules(text, document_type, &selected))
    }

    pub fn evaluate_module(
        &self,
        module: &Module,
        text: &str,
        document_type: &str,
    ) -> ModuleResult {
        module.evaluate_with(text, document_type, |gate, raw| {
            self.augment(module.id(), gate.id(), text, raw)
        })
    }

    /// Run one gate with fault isolation and augmentation.
    pub fn evaluate_gate(
        &self,
        module_id: &str,
        gate: &dyn Gate,
        text: &str,
        document_type: &str,
    ) -> GateResult {
        let raw = isolate(module_id, gate, text, document_type);
        self.augment(module_id, gate.id(), text, raw)
    }

    pub fn augment(
        &self,
        module_id: &str,
        gate_id: &str,
        text: &str,
        raw: GateResult,
    ) -> GateResult {
        self.catalog
            .augmentor()
            .postprocess(module_id, gate_id, text, raw)
    }

    /// Build the report from module results already in declaration order.
    pub fn assemble(
        &self,
        text: &str,
        document_type: &str,
        modules: Vec<ModuleResult>,
    ) -> ValidationReport {
        let (overall_risk, risk_driver) = fold_risk(&modules);

        let analyzer_findings: BTreeMap<_, _> = self
            .catalog
            .analyzers()
            .iter()
            .map(|a| (a.name().to_string(), a.analyze(text)))
            .collect();

        let cross_validation_issues = cross_validation::run(text, &modules, &analyzer_findings);

        let mut summary = StatusSummary::default();
        for module in &modules {
            summary.merge(&module.summary);
        }

        debug!(
            modules = modules.len(),
            issues = cross_validation_issues.len(),
            "Evaluation assembled"
        );
        info!(
            risk = ?overall_risk,
            fail = summary.fail,
            warning = summary.warning,
            error = summary.error,
            "Evaluation complete"
        );

        ValidationReport {
            overall_risk,
            risk_driver,
            document_type: document_type.to_string(),
            modules,
            summary,
            cross_validation_issues,
            analyzer_findings,
        }
    }
}

/// Produces reports for already-resolved modules.
///
/// [`GateEngine`] runs gates inline. Runtimes that bound gate time or
/// concurrency implement this so the correction loop re-evaluates under
/// the same limits.
pub trait ModuleEvaluator: Send + Sync {
    fn evaluate_modules(
        &self,
        text: &str,
        document_type: &str,
        modules: &[&Module],
    ) -> ValidationReport;
}

impl ModuleEvaluator for GateEngine {
    fn evaluate_modules(
        &self,
        text: &str,
        document_type: &str,
        modules: &[&Module],
    ) -> ValidationReport {
        let results = modules
            .iter()
            .map(|module| self.evaluate_module(module, text, document_type))
            .collect();
        self.assemble(text, document_type, results)
    }
}

/// Worst `(status, severity)` pair and the gate that produced it.
pub fn fold_risk(modules: &[ModuleResult]) -> (RiskLevel, Option<GateRef>) {
    let mut worst: Option<((u8, Severity), GateRef, Status)> = None;

    for module in modules {
        for entry in &module.gates {
            let Some(rank) = entry.result.status.risk_rank() else {
                continue;
            };
            let key = (rank, entry.result.severity);
            if worst.as_ref().map_or(true, |(k, _, _)| key > *k) {
                worst = Some((
                    key,
                    GateRef::new(&module.module_id, &entry.gate_id),
                    entry.result.status,
                ));
            }
        }
    }

    match worst {
        Some(((_, severity), gate, status)) if status != Status::Pass => {
            (RiskLevel::from_pair(status, severity), Some(gate))
        }
        _ => (RiskLevel::Minimal, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::CatalogBuilder;
    use crate::gate::GateMetadata;
    use crate::module::tests::{FixedGate, PanickingGate};
    use crate::module::ModuleInfo;
    use crate::types::GateEntry;
    use proptest::prelude::*;

    fn entry(id: &str, result: GateResult) -> GateEntry {
        GateEntry { gate_id: id.into(), result }
    }

    #[test]
    fn test_fold_status_before_severity() {
        let modules = vec![ModuleResult::new(
            "m",
            "1",
            vec![
                entry("warn", GateResult::warning(Severity::Critical, "w")),
                entry("fail", GateResult::fail(Severity::Low, "f")),
            ],
        )];
        let (risk, driver) = fold_risk(&modules);
        assert_eq!(risk, RiskLevel::Low);
        assert_eq!(driver, Some(GateRef::new("m", "fail")));
    }

    #[test]
    fn test_fold_ties_keep_first() {
        let modules = vec![
            ModuleResult::new("a", "1", vec![entry("g1", GateResult::fail(Severity::High, "x"))]),
            ModuleResult::new("b", "1", vec![entry("g2", GateResult::fail(Severity::High, "y"))]),
        ];
        assert_eq!(fold_risk(&modules).1, Some(GateRef::new("a", "g1")));
    }

    #[test]
    fn test_fold_ignores_na_and_error() {
        let modules = vec![ModuleResult::new(
            "m",
            "1",
            vec![
                entry("na", GateResult::not_applicable("n/a")),
                entry("err", GateResult::error("boom")),
                entry("ok", GateResult::pass("ok")),
            ],
        )];
        assert_eq!(fold_risk(&modules), (RiskLevel::Minimal, None));
    }

    fn faulty_engine() -> GateEngine {
        let broken = Module::new(ModuleInfo::new("broken", "Broken", "1.0.0"))
            .with_gate(Arc::new(PanickingGate(GateMetadata::new(
                "always_panics",
                "Panics",
                Severity::High,
            ))))
            .unwrap()
            .with_gate(FixedGate::new("sibling", GateResult::fail(Severity::Medium, "still runs")))
            .unwrap();
        let healthy = Module::new(ModuleInfo::new("healthy", "Healthy", "1.0.0"))
            .with_gate(FixedGate::new("ok", GateResult::pass("fine")))
            .unwrap();
        let catalog = CatalogBuilder::new()
            .module(broken)
            .unwrap()
            .module(healthy)
            .unwrap()
            .build()
            .unwrap();
        GateEngine::new(Arc::new(catalog))
    }

    #[test]
    fn test_fault_isolation_across_modules() {
        let report = faulty_engine().evaluate("text", "general", None).unwrap();
        assert_eq!(report.gate("broken", "always_panics").unwrap().status, Status::Error);
        assert_eq!(report.gate("broken", "sibling").unwrap().status, Status::Fail);
        assert_eq!(report.gate("healthy", "ok").unwrap().status, Status::Pass);
        assert_eq!(report.overall_risk, RiskLevel::Medium);
        assert_eq!(report.summary.error, 1);
    }

    #[test]
    fn test_unknown_module_rejected() {
        let engine = faulty_engine();
        let requested = vec!["missing".to_string()];
        assert!(matches!(
            engine.evaluate("text", "general", Some(&requested)),
            Err(InputError::UnknownModule(_))
        ));
    }

    #[test]
    fn test_builtin_scenario_guarantee_fails_critical() {
        let engine = GateEngine::builtin().unwrap();
        let modules = vec!["fca_uk".to_string()];
        let report = engine
            .evaluate(
                "Guaranteed 15% returns with zero risk for everyone.",
                "financial_promotion",
                Some(&modules),
            )
            .unwrap();
        let gate = report.gate("fca_uk", "fair_clear_not_misleading").unwrap();
        assert_eq!(gate.status, Status::Fail);
        assert_eq!(gate.severity, Severity::Critical);
        assert_eq!(report.overall_risk, RiskLevel::Critical);
        assert_eq!(
            report.risk_driver,
            Some(GateRef::new("fca_uk", "fair_clear_not_misleading"))
        );
    }

    #[test]
    fn test_irrelevant_gates_are_na() {
        let engine = GateEngine::builtin().unwrap();
        let modules = vec!["hipaa_us".to_string()];
        let report = engine
            .evaluate("Our bakery opens at nine.", "general", Some(&modules))
            .unwrap();
        assert!(report.modules[0]
            .gates
            .iter()
            .all(|g| g.result.status == Status::NotApplicable));
        assert_eq!(report.overall_risk, RiskLevel::Minimal);
    }

    proptest! {
        #[test]
        fn prop_evaluation_is_deterministic(text in "[A-Za-z0-9 %.,@-]{0,120}") {
            let engine = GateEngine::builtin().unwrap();
            let first = engine.evaluate(&text, "general", None).unwrap();
            let second = engine.evaluate(&text, "general", None).unwrap();
            prop_assert_eq!(
                serde_json::to_string(&first).unwrap(),
                serde_json::to_string(&second).unwrap()
            );
        }
    }
}

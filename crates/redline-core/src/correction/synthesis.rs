//! The correction loop.
//!
//! ```text
//! EVALUATE -> SANITIZE -> MAP_SNIPPETS -> APPLY -> RE-EVALUATE
//!                  ^                                   |
//!                  +------------- ITERATE -------------+
//!                                                      v
//!                         CONVERGED | STALLED | BUDGET_EXHAUSTED
//! ```
//!
//! Each iteration sanitizes the current failures, maps whatever is still
//! failing to snippets, applies them in failure order and re-evaluates.
//! The loop ends when the scope has no correctable failures, when an
//! iteration changes nothing or revisits an earlier text, or when the
//! iteration cap is reached. Every choice is a pure function of the text
//! and the ordered failure list, so identical input gives identical
//! output.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use super::sanitizer::SanitizationAction;
use super::snippets::CorrectionPlan;
use crate::api::{AdvancedOptions, InputError};
use crate::engine::{GateEngine, ModuleEvaluator};
use crate::gate::GateMetadata;
use crate::module::Module;
use crate::types::{Failure, GateRef, Severity, Status, ValidationReport};

/// Loop limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorrectionConfig {
    /// Iteration cap shared by every scope of one invocation.
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    /// Replay the correction and compare outputs.
    #[serde(default = "default_verify")]
    pub verify_determinism: bool,
}

fn default_max_iterations() -> usize {
    4
}

fn default_verify() -> bool {
    true
}

impl Default for CorrectionConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
            verify_determinism: default_verify(),
        }
    }
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Termination {
    /// No correctable failures remain.
    Converged,
    /// An iteration changed nothing or repeated an earlier text.
    Stalled,
    /// The iteration cap was reached with failures left.
    BudgetExhausted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Determinism {
    pub repeatable: bool,
    /// Hash of the corrected text.
    pub fingerprint: String,
    /// Whether `repeatable` was established by a replay.
    pub verified: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// No domain or snippet maps to the failure.
    NoPlan,
    /// Plans exist but the gate still fails.
    NotConverged,
    /// The failure came from a module that is not loaded and cannot be re-checked.
    Unverified,
}

/// A failure left for a human.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnresolvedGate {
    pub module_id: String,
    pub gate_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub status: Status,
    pub severity: Severity,
    pub reason: UnresolvedReason,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrectionResult {
    pub corrected_text: String,
    pub correction_count: usize,
    /// `sanitizer:<rule>` and `snippet:<id>` in first-use order.
    pub strategies_applied: Vec<String>,
    pub determinism: Determinism,
    /// Re-validation of `corrected_text`.
    pub validation: ValidationReport,
    pub iterations: usize,
    pub termination: Termination,
    pub unresolved: Vec<UnresolvedGate>,
    pub needs_human_review: bool,
    pub actions: Vec<SanitizationAction>,
    pub snippets_applied: Vec<CorrectionPlan>,
}

/// Hex fingerprint of a text: the first 8 bytes of its SHA-256 digest.
pub fn fingerprint(text: &str) -> String {
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..8])
}

/// Drives sanitization, snippet mapping and re-evaluation.
#[derive(Clone)]
pub struct SynthesisEngine<'a> {
    engine: &'a GateEngine,
    evaluator: &'a dyn ModuleEvaluator,
    config: CorrectionConfig,
}

impl std::fmt::Debug for SynthesisEngine<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisEngine")
            .field("engine", self.engine)
            .field("config", &self.config)
            .finish()
    }
}

/// Mutable state of one correction run.
struct Run<'m> {
    modules: Vec<&'m Module>,
    text: String,
    report: ValidationReport,
    report_text: String,
    iterations: usize,
    correction_count: usize,
    strategies: Vec<String>,
    actions: Vec<SanitizationAction>,
    snippets_applied: Vec<CorrectionPlan>,
    seen: HashSet<String>,
    unverified: Vec<Failure>,
}

impl Run<'_> {
    fn note_strategy(&mut self, strategy: String) {
        if !self.strategies.contains(&strategy) {
            self.strategies.push(strategy);
        }
    }

    fn metadata(&self, gate: &GateRef) -> Option<&GateMetadata> {
        self.modules
            .iter()
            .find(|m| m.id() == gate.module_id)
            .and_then(|m| m.gate(&gate.gate_id))
            .map(|g| g.metadata())
    }
}

impl<'a> SynthesisEngine<'a> {
    pub fn new(engine: &'a GateEngine, config: CorrectionConfig) -> Self {
        Self::with_evaluator(engine, engine, config)
    }

    /// Re-evaluate through `evaluator` instead of running gates inline.
    /// Modules are still resolved against `engine`'s catalog.
    pub fn with_evaluator(
        engine: &'a GateEngine,
        evaluator: &'a dyn ModuleEvaluator,
        config: CorrectionConfig,
    ) -> Self {
        Self {
            engine,
            evaluator,
            config,
        }
    }

    pub fn config(&self) -> &CorrectionConfig {
        &self.config
    }

    /// Correct `text` against the requested modules (all when `None`).
    ///
    /// `initial` seeds the first iteration with a prior report's failures.
    /// Only module resolution can fail; everything after that returns a
    /// result, possibly with the text unchanged.
    pub fn correct(
        &self,
        text: &str,
        document_type: &str,
        modules: Option<&[String]>,
        initial: Option<&ValidationReport>,
        options: AdvancedOptions,
    ) -> Result<CorrectionResult, InputError> {
        let selected = self.engine.resolve_modules(modules)?;

        let mut result = self.run(text, document_type, &selected, initial, options);
        if self.config.verify_determinism {
            let replay = self.run(text, document_type, &selected, initial, options);
            let repeatable = replay.corrected_text == result.corrected_text
                && replay.strategies_applied == result.strategies_applied;
            if !repeatable {
                warn!("Correction replay produced different output");
            }
            result.determinism.repeatable = repeatable;
            result.determinism.verified = true;
        }

        info!(
            iterations = result.iterations,
            corrections = result.correction_count,
            termination = ?result.termination,
            unresolved = result.unresolved.len(),
            "Correction complete"
        );
        Ok(result)
    }

    fn evaluate(&self, text: &str, document_type: &str, modules: &[&Module]) -> ValidationReport {
        self.evaluator.evaluate_modules(text, document_type, modules)
    }

    fn run(
        &self,
        text: &str,
        document_type: &str,
        modules: &[&Module],
        initial: Option<&ValidationReport>,
        options: AdvancedOptions,
    ) -> CorrectionResult {
        let module_ids: Vec<String> = modules.iter().map(|m| m.id().to_string()).collect();
        let scopes: Vec<Vec<String>> = if options.multi_level {
            vec![module_ids.clone()]
        } else {
            module_ids.iter().map(|id| vec![id.clone()]).collect()
        };

        let mut run = Run {
            modules: modules.to_vec(),
            text: text.to_string(),
            report: self.evaluate(text, document_type, modules),
            report_text: text.to_string(),
            iterations: 0,
            correction_count: 0,
            strategies: Vec::new(),
            actions: Vec::new(),
            snippets_applied: Vec::new(),
            seen: HashSet::from([text.to_string()]),
            unverified: Vec::new(),
        };
        let mut seed = initial.map(|r| r.correctable_failures(None));

        // A later scope can reintroduce failures in an earlier one, so passes
        // repeat until every scope converges on the same text. Each repeat
        // spends at least one iteration, which bounds the loop.
        let termination = loop {
            let mut pass = Termination::Converged;
            for scope in &scopes {
                let outcome =
                    self.run_scope(&mut run, document_type, scope, &module_ids, &mut seed);
                pass = pass.max(outcome);
            }
            if pass != Termination::Converged || run.report.correctable_failures(None).is_empty() {
                break pass;
            }
            debug!(
                iterations = run.iterations,
                "Later scope reopened failures, starting another pass"
            );
        };

        if run.report_text != run.text {
            run.report = self.evaluate(&run.text, document_type, modules);
        }
        let unresolved = self.unresolved(&run);
        if !unresolved.is_empty() {
            warn!(count = unresolved.len(), "Failures left for human review");
        }

        CorrectionResult {
            determinism: Determinism {
                repeatable: true,
                fingerprint: fingerprint(&run.text),
                verified: false,
            },
            needs_human_review: !unresolved.is_empty(),
            unresolved,
            corrected_text: run.text,
            correction_count: run.correction_count,
            strategies_applied: run.strategies,
            validation: run.report,
            iterations: run.iterations,
            termination,
            actions: run.actions,
            snippets_applied: run.snippets_applied,
        }
    }

    /// Failures for one scope. The first call may take seeded failures,
    /// which come first, followed by fresh ones not already listed.
    fn scope_failures(
        run: &mut Run<'_>,
        scope: &[String],
        module_ids: &[String],
        seed: &mut Option<Vec<Failure>>,
    ) -> Vec<Failure> {
        let fresh = run.report.correctable_failures(Some(scope));
        let Some(seeded) = seed.take() else {
            return fresh;
        };

        let mut failures: Vec<Failure> = Vec::new();
        for failure in seeded {
            let loaded = module_ids.contains(&failure.gate.module_id);
            if !loaded {
                run.unverified.push(failure.clone());
            }
            if !loaded || scope.contains(&failure.gate.module_id) {
                failures.push(failure);
            }
        }
        for failure in fresh {
            if !failures.iter().any(|f| f.gate == failure.gate) {
                failures.push(failure);
            }
        }
        failures
    }

    fn run_scope(
        &self,
        run: &mut Run<'_>,
        document_type: &str,
        scope: &[String],
        module_ids: &[String],
        seed: &mut Option<Vec<Failure>>,
    ) -> Termination {
        let catalog = self.engine.catalog();

        loop {
            let failures = Self::scope_failures(run, scope, module_ids, seed);
            if failures.is_empty() {
                return Termination::Converged;
            }
            if run.iterations >= self.config.max_iterations {
                warn!(
                    scope = ?scope,
                    remaining = failures.len(),
                    cap = self.config.max_iterations,
                    "Correction budget exhausted"
                );
                return Termination::BudgetExhausted;
            }
            run.iterations += 1;
            let before = run.text.clone();

            // SANITIZE
            let sanitized = catalog
                .sanitizer()
                .sanitize(&run.text, &failures, catalog.taxonomy());
            let remaining = if sanitized.changed() {
                for rule in &sanitized.rules_applied {
                    run.note_strategy(format!("sanitizer:{}", rule));
                }
                run.correction_count += sanitized.actions.len();
                run.actions.extend(sanitized.actions);
                run.text = sanitized.text;
                run.report = self.evaluate(&run.text, document_type, &run.modules);
                run.report_text = run.text.clone();
                run.report.correctable_failures(Some(scope))
            } else {
                failures
            };

            // MAP_SNIPPETS + APPLY, in failure order
            for failure in &remaining {
                let metadata = run.metadata(&failure.gate);
                let plan = catalog
                    .snippets()
                    .plan(failure, metadata, catalog.taxonomy());
                let Some(plan) = plan else {
                    debug!(gate = %failure.gate, "No correction plan");
                    continue;
                };
                if let Some(next) = catalog.snippets().apply(&run.text, &plan) {
                    debug!(gate = %failure.gate, snippet = %plan.snippet_id, "Snippet applied");
                    run.text = next;
                    run.correction_count += 1;
                    run.note_strategy(format!("snippet:{}", plan.snippet_id));
                    run.snippets_applied.push(plan);
                }
            }

            // RE-EVALUATE
            if run.text == before {
                debug!(iteration = run.iterations, "Iteration made no change");
                return Termination::Stalled;
            }
            if !run.seen.insert(run.text.clone()) {
                debug!(iteration = run.iterations, "Iteration revisited an earlier text");
                return Termination::Stalled;
            }
            if run.report_text != run.text {
                run.report = self.evaluate(&run.text, document_type, &run.modules);
                run.report_text = run.text.clone();
            }
            debug!(
                iteration = run.iterations,
                remaining = run.report.correctable_failures(Some(scope)).len(),
                "Iteration complete"
            );
        }
    }

    fn unresolved(&self, run: &Run<'_>) -> Vec<UnresolvedGate> {
        let catalog = self.engine.catalog();
        let remaining = run.report.correctable_failures(None);

        let mut unresolved: Vec<UnresolvedGate> = remaining
            .iter()
            .map(|failure| {
                let domain = catalog
                    .taxonomy()
                    .resolve(&failure.gate, &failure.result)
                    .map(|(d, _)| d.id.clone());
                let has_plan = catalog
                    .snippets()
                    .plan(failure, run.metadata(&failure.gate), catalog.taxonomy())
                    .is_some();
                unresolved_gate(
                    failure,
                    domain,
                    if has_plan {
                        UnresolvedReason::NotConverged
                    } else {
                        UnresolvedReason::NoPlan
                    },
                )
            })
            .collect();

        for failure in &run.unverified {
            let domain = catalog
                .taxonomy()
                .resolve(&failure.gate, &failure.result)
                .map(|(d, _)| d.id.clone());
            unresolved.push(unresolved_gate(failure, domain, UnresolvedReason::Unverified));
        }
        unresolved
    }
}

fn unresolved_gate(
    failure: &Failure,
    domain: Option<String>,
    reason: UnresolvedReason,
) -> UnresolvedGate {
    UnresolvedGate {
        module_id: failure.gate.module_id.clone(),
        gate_id: failure.gate.gate_id.clone(),
        domain,
        status: failure.result.status,
        severity: failure.result.severity,
        reason,
    }
}

//! Runtime orchestrator for parallel gate evaluation.
//!
//! The orchestrator runs the same evaluation as [`GateEngine`] but fans
//! gates out to the blocking pool:
//! - At most `workers` gates run at once
//! - Each gate has its own time limit; an overrun becomes `ERROR`
//! - Results are reassembled in declaration order before the risk fold,
//!   so reports match the synchronous engine exactly
//! - Reports are cached per input when the cache is enabled
//!
//! Correction re-evaluates through the same gate runner, so the worker
//! bound and time limit hold inside the correction loop too.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use redline_core::module::{fault_result, isolate};
use redline_core::{
    correction, Catalog, CorrectionRequest, CorrectionResult, EvaluationRequest, Gate, GateEngine,
    GateEntry, GateFault, GateResult, Module, ModuleEvaluator, ModuleResult, ValidationReport,
};

use crate::cache::{CacheKey, ReportCache};
use crate::config::RuntimeConfig;
use crate::RuntimeError;

/// Concurrent evaluation and correction over a shared catalog.
pub struct RuntimeOrchestrator {
    runner: GateRunner,
    config: RuntimeConfig,
    cache: Option<ReportCache>,
}

impl RuntimeOrchestrator {
    pub fn new(catalog: Arc<Catalog>, config: RuntimeConfig) -> Self {
        let cache = config
            .cache
            .enabled
            .then(|| ReportCache::new(config.cache.max_entries, config.cache.ttl));
        Self {
            runner: GateRunner {
                engine: GateEngine::new(catalog),
                permits: Arc::new(Semaphore::new(config.workers.max(1))),
                gate_timeout: config.gate_timeout,
            },
            config,
            cache,
        }
    }

    /// Orchestrator over the built-in catalog.
    pub fn builtin(config: RuntimeConfig) -> Result<Self, RuntimeError> {
        Ok(Self::new(Catalog::builtin()?, config))
    }

    pub fn engine(&self) -> &GateEngine {
        &self.runner.engine
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn cache(&self) -> Option<&ReportCache> {
        self.cache.as_ref()
    }

    pub async fn evaluate(
        &self,
        request: &EvaluationRequest,
    ) -> Result<ValidationReport, RuntimeError> {
        request.validate()?;
        let report = self
            .evaluate_text(&request.text, &request.document_type, request.modules.as_deref())
            .await?;
        Ok(Arc::unwrap_or_clone(report))
    }

    /// Evaluate without request validation. Unknown modules are still
    /// rejected.
    pub async fn evaluate_text(
        &self,
        text: &str,
        document_type: &str,
        modules: Option<&[String]>,
    ) -> Result<Arc<ValidationReport>, RuntimeError> {
        let engine = &self.runner.engine;
        let selected = engine.resolve_modules(modules)?;
        let ids: Vec<String> = selected.iter().map(|m| m.id().to_string()).collect();
        let key = CacheKey::new(text, document_type, &ids);

        if let Some(cache) = &self.cache {
            if let Some(hit) = cache.get(&key).await {
                debug!(modules = ?ids, "Report cache hit");
                return Ok(hit);
            }
        }

        let module_results = self.runner.run_modules(text, document_type, &selected).await;
        let report = Arc::new(engine.assemble(text, document_type, module_results));

        if let Some(cache) = &self.cache {
            cache.insert(key, Arc::clone(&report)).await;
        }
        Ok(report)
    }

    /// Run the correction loop on the blocking pool. Every re-evaluation
    /// inside the loop goes through the bounded gate runner.
    pub async fn correct(
        &self,
        request: &CorrectionRequest,
    ) -> Result<CorrectionResult, RuntimeError> {
        let evaluator = BlockingEvaluator {
            runner: self.runner.clone(),
            handle: Handle::current(),
        };
        let request = request.clone();
        let config = self.config.correction;

        let result = tokio::task::spawn_blocking(move || {
            correction::correct_request_with(&evaluator.runner.engine, &evaluator, &request, config)
        })
        .await
        .map_err(|e| RuntimeError::Task(e.to_string()))??;

        info!(
            termination = ?result.termination,
            iterations = result.iterations,
            corrections = result.correction_count,
            "Correction finished"
        );
        Ok(result)
    }
}

impl std::fmt::Debug for RuntimeOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RuntimeOrchestrator")
            .field("catalog", self.runner.engine.catalog())
            .field("workers", &self.config.workers)
            .field("gate_timeout", &self.config.gate_timeout)
            .field("cache", &self.cache)
            .finish()
    }
}

/// Gates on the blocking pool, bounded by worker permits and a per-gate
/// deadline.
#[derive(Clone)]
struct GateRunner {
    engine: GateEngine,
    permits: Arc<Semaphore>,
    gate_timeout: Duration,
}

impl GateRunner {
    async fn run_modules(
        &self,
        text: &str,
        document_type: &str,
        modules: &[&Module],
    ) -> Vec<ModuleResult> {
        let text: Arc<str> = Arc::from(text);
        let document_type: Arc<str> = Arc::from(document_type);

        let (shared_text, shared_type) = (&text, &document_type);
        let runs = modules.iter().flat_map(move |module| {
            module.gates().iter().map(move |gate| {
                self.run_gate(
                    module.id(),
                    Arc::clone(gate),
                    Arc::clone(shared_text),
                    Arc::clone(shared_type),
                )
            })
        });
        let mut results = join_all(runs).await.into_iter();

        // join_all preserves input order, so results line up with
        // modules and gates in declaration order.
        modules
            .iter()
            .map(|module| {
                let gates = module
                    .gates()
                    .iter()
                    .zip(results.by_ref())
                    .map(|(gate, result)| GateEntry {
                        gate_id: gate.id().to_string(),
                        result,
                    })
                    .collect();
                ModuleResult::new(module.id(), module.version(), gates)
            })
            .collect()
    }

    async fn run_gate(
        &self,
        module_id: &str,
        gate: Arc<dyn Gate>,
        text: Arc<str>,
        document_type: Arc<str>,
    ) -> GateResult {
        let gate_id = gate.id().to_string();
        let limit = self.gate_timeout;
        let permits = Arc::clone(&self.permits);
        let owner = module_id.to_string();
        let input = Arc::clone(&text);

        // The deadline covers waiting for a permit, so gates stuck past
        // their own deadline cannot stall later evaluations.
        let run = async move {
            let permit = match permits.acquire_owned().await {
                Ok(permit) => permit,
                Err(e) => return Err(GateFault::Check(e.to_string())),
            };
            tokio::task::spawn_blocking(move || {
                // A timed-out gate keeps its permit until it actually returns.
                let _permit = permit;
                isolate(&owner, gate.as_ref(), &input, &document_type)
            })
            .await
            .map_err(|join| GateFault::Panic(join.to_string()))
        };

        let raw = match tokio::time::timeout(limit, run).await {
            Ok(Ok(result)) => result,
            Ok(Err(fault)) => fault_result(module_id, &gate_id, &fault),
            Err(_) => {
                warn!(module = %module_id, gate = %gate_id, timeout = ?limit, "Gate timed out");
                fault_result(module_id, &gate_id, &GateFault::Timeout(limit))
            }
        };
        self.engine.augment(module_id, &gate_id, &text, raw)
    }
}

/// Lets the synchronous correction loop evaluate through [`GateRunner`].
/// Only used from blocking-pool threads.
struct BlockingEvaluator {
    runner: GateRunner,
    handle: Handle,
}

impl ModuleEvaluator for BlockingEvaluator {
    fn evaluate_modules(
        &self,
        text: &str,
        document_type: &str,
        modules: &[&Module],
    ) -> ValidationReport {
        let results = self
            .handle
            .block_on(self.runner.run_modules(text, document_type, modules));
        self.runner.engine.assemble(text, document_type, results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use redline_core::{
        CatalogBuilder, GateMetadata, Module, ModuleInfo, Severity, Status, Termination,
    };
    use std::time::Duration;

    struct SlowGate(GateMetadata);

    impl Gate for SlowGate {
        fn metadata(&self) -> &GateMetadata {
            &self.0
        }

        fn check(&self, _text: &str, _document_type: &str) -> Result<GateResult, GateFault> {
            std::thread::sleep(Duration::from_millis(400));
            Ok(GateResult::pass("eventually"))
        }
    }

    struct QuickGate(GateMetadata);

    impl Gate for QuickGate {
        fn metadata(&self) -> &GateMetadata {
            &self.0
        }

        fn check(&self, _text: &str, _document_type: &str) -> Result<GateResult, GateFault> {
            Ok(GateResult::fail(Severity::Medium, "always"))
        }
    }

    fn slow_catalog() -> Arc<Catalog> {
        let module = Module::new(ModuleInfo::new("timing", "Timing", "0.1.0"))
            .with_gate(Arc::new(SlowGate(GateMetadata::new("slow", "Slow", Severity::Critical))))
            .unwrap()
            .with_gate(Arc::new(QuickGate(GateMetadata::new("quick", "Quick", Severity::Medium))))
            .unwrap();
        Arc::new(CatalogBuilder::new().module(module).unwrap().build().unwrap())
    }

    fn orchestrator() -> RuntimeOrchestrator {
        RuntimeOrchestrator::builtin(RuntimeConfig::default()).unwrap()
    }

    #[tokio::test]
    async fn test_matches_synchronous_engine() {
        let runtime = orchestrator();
        for text in [
            "Our bakery opens at nine.",
            "Guaranteed 15% returns with zero risk! Act now.",
            "By using this website you agree to let us collect all data forever.",
            "We will share medical records of patient 123-45-6789.",
        ] {
            let parallel = runtime.evaluate(&EvaluationRequest::new(text)).await.unwrap();
            let sequential = runtime.engine().evaluate(text, "general", None).unwrap();
            assert_eq!(parallel, sequential, "mismatch for {text:?}");
        }
    }

    #[tokio::test]
    async fn test_slow_gate_times_out_as_error() {
        let config = RuntimeConfig {
            gate_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let runtime = RuntimeOrchestrator::new(slow_catalog(), config);
        let report = runtime
            .evaluate(&EvaluationRequest::new("anything"))
            .await
            .unwrap();

        let slow = report.gate("timing", "slow").unwrap();
        assert_eq!(slow.status, Status::Error);
        assert!(slow.message.contains("timed out"));

        let quick = report.gate("timing", "quick").unwrap();
        assert_eq!(quick.status, Status::Fail);

        // The errored gate does not drive risk.
        assert_eq!(report.risk_driver.as_ref().unwrap().gate_id, "quick");
        assert_eq!(report.module("timing").unwrap().gates[0].gate_id, "slow");
    }

    #[tokio::test]
    async fn test_reports_are_cached() {
        let runtime = orchestrator();
        let request = EvaluationRequest::new("Guaranteed returns.");
        let first = runtime.evaluate(&request).await.unwrap();

        let ids = runtime.engine().catalog().modules().ids();
        let key = CacheKey::new(&request.text, &request.document_type, &ids);
        let cached = runtime.cache().unwrap().get(&key).await.unwrap();
        assert_eq!(*cached, first);

        assert_eq!(runtime.evaluate(&request).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_cache_can_be_disabled() {
        let mut config = RuntimeConfig::default();
        config.cache.enabled = false;
        let runtime = RuntimeOrchestrator::builtin(config).unwrap();
        assert!(runtime.cache().is_none());
        assert!(runtime
            .evaluate(&EvaluationRequest::new("Plain text."))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_unknown_module_rejected() {
        let mut request = EvaluationRequest::new("text");
        request.modules = Some(vec!["sec_us".into()]);
        let err = orchestrator().evaluate(&request).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Input(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_correction_applies_gate_timeout() {
        let config = RuntimeConfig {
            gate_timeout: Duration::from_millis(50),
            ..Default::default()
        };
        let runtime = RuntimeOrchestrator::new(slow_catalog(), config);

        let started = std::time::Instant::now();
        let result = runtime
            .correct(&CorrectionRequest::new("anything"))
            .await
            .unwrap();
        let elapsed = started.elapsed();

        let slow = result.validation.gate("timing", "slow").unwrap();
        assert_eq!(slow.status, Status::Error);
        assert!(slow.message.contains("timed out"));
        assert_eq!(result.validation.gate("timing", "quick").unwrap().status, Status::Fail);
        // Each evaluation, replay included, gives up on the slow gate early.
        assert!(elapsed < Duration::from_millis(400), "correction waited {elapsed:?}");
    }

    #[tokio::test]
    async fn test_correct_on_blocking_pool() {
        let mut request =
            CorrectionRequest::new("Guaranteed 15% returns with zero risk for everyone.");
        request.modules = Some(vec!["fca_uk".into()]);
        let result = orchestrator().correct(&request).await.unwrap();
        assert_eq!(result.termination, Termination::Converged);
        assert!(result.determinism.repeatable);
    }
}

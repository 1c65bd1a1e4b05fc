//! Multi-model aggregation.
//!
//! Every provider spec yields one candidate. Candidates are generated
//! concurrently, each under the provider's circuit breaker, a per-call
//! timeout and bounded retries. Each non-empty candidate is evaluated
//! and the lowest-risk one is selected. Provider failures never fail the
//! request; they make that candidate non-viable.

use std::sync::Arc;
use std::time::{Duration, Instant};

use backon::{ExponentialBuilder, Retryable};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use redline_core::{
    select, CandidateScore, MultiModelRequest, ProviderSpec, RiskLevel, ValidationReport,
};

use crate::orchestrator::RuntimeOrchestrator;
use crate::providers::{
    CandidateProvider, Generation, GenerationConfig, ProviderError, ProviderRegistry,
};
use crate::resilience::CircuitBreaker;
use crate::RuntimeError;

/// One provider's contribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateResponse {
    pub provider: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Empty when generation failed.
    pub text: String,
    pub viable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub risk: Option<RiskLevel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<CandidateScore>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation: Option<ValidationReport>,
    pub attempts: usize,
    pub elapsed_ms: u64,
}

impl CandidateResponse {
    fn failed(provider: &str, error: impl ToString, attempts: usize, started: Instant) -> Self {
        Self {
            provider: provider.to_string(),
            model: None,
            text: String::new(),
            viable: false,
            error: Some(error.to_string()),
            risk: None,
            score: None,
            validation: None,
            attempts,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    /// In request order.
    pub responses: Vec<CandidateResponse>,
    pub selected: CandidateResponse,
    pub selected_index: usize,
    /// No candidate was viable; the first was chosen by default.
    pub fallback: bool,
    pub evaluated_at: DateTime<Utc>,
}

pub struct MultiModelAggregator {
    orchestrator: Arc<RuntimeOrchestrator>,
    registry: ProviderRegistry,
    breaker: CircuitBreaker,
}

impl MultiModelAggregator {
    pub fn new(orchestrator: Arc<RuntimeOrchestrator>, registry: ProviderRegistry) -> Self {
        let breaker = CircuitBreaker::new(orchestrator.config().circuit_breaker.clone());
        Self {
            orchestrator,
            registry,
            breaker,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub async fn aggregate(
        &self,
        request: &MultiModelRequest,
    ) -> Result<AggregationResult, RuntimeError> {
        request.validate()?;
        self.orchestrator
            .engine()
            .resolve_modules(request.modules.as_deref())?;

        let responses: Vec<CandidateResponse> = join_all(
            request
                .provider_specs
                .iter()
                .map(|spec| self.candidate(spec, request)),
        )
        .await;

        let scores: Vec<Option<CandidateScore>> = responses.iter().map(|r| r.score).collect();
        let selection = select(&scores).ok_or(redline_core::InputError::NoProviders)?;
        if selection.fallback {
            warn!(candidates = responses.len(), "No viable candidate, falling back to first");
        }
        info!(
            candidates = responses.len(),
            viable = scores.iter().filter(|s| s.is_some()).count(),
            selected = selection.index,
            "Aggregation complete"
        );

        Ok(AggregationResult {
            selected: responses[selection.index].clone(),
            selected_index: selection.index,
            fallback: selection.fallback,
            responses,
            evaluated_at: Utc::now(),
        })
    }

    async fn candidate(
        &self,
        spec: &ProviderSpec,
        request: &MultiModelRequest,
    ) -> CandidateResponse {
        let started = Instant::now();
        let (generation, attempts) = self.generate(spec, &request.prompt).await;

        let generation = match generation {
            Ok(generation) => generation,
            Err(e) => {
                warn!(provider = %spec.name, error = %e, "Candidate generation failed");
                return CandidateResponse::failed(&spec.name, e, attempts, started);
            }
        };
        if generation.text.trim().is_empty() {
            return CandidateResponse::failed(&spec.name, "empty response", attempts, started);
        }

        let report = match self
            .orchestrator
            .evaluate_text(
                &generation.text,
                &request.document_type,
                request.modules.as_deref(),
            )
            .await
        {
            Ok(report) => report,
            Err(e) => return CandidateResponse::failed(&spec.name, e, attempts, started),
        };

        let score = CandidateScore::from_report(&report);
        debug!(provider = %spec.name, ?score, "Candidate scored");

        CandidateResponse {
            provider: spec.name.clone(),
            model: Some(generation.model),
            text: generation.text,
            viable: true,
            error: None,
            risk: Some(report.overall_risk),
            score: Some(score),
            validation: Some(Arc::unwrap_or_clone(report)),
            attempts,
            elapsed_ms: started.elapsed().as_millis() as u64,
        }
    }

    /// Call the provider with timeout and retries. Returns the outcome
    /// and the number of attempts made.
    async fn generate(
        &self,
        spec: &ProviderSpec,
        prompt: &str,
    ) -> (Result<Generation, ProviderError>, usize) {
        if self.breaker.is_open(&spec.name) {
            return (Err(ProviderError::CircuitOpen(spec.name.clone())), 0);
        }
        let provider = match self.registry.create_for_spec(spec) {
            Ok(provider) => provider,
            Err(e) => return (Err(e), 0),
        };

        let settings = &self.orchestrator.config().providers;
        let config = GenerationConfig {
            max_tokens: spec.max_tokens.unwrap_or(settings.max_tokens),
            temperature: 0.0,
            timeout: settings.timeout,
        };
        let backoff = ExponentialBuilder::default()
            .with_min_delay(settings.min_backoff)
            .with_max_times(settings.max_retries);

        let attempts = std::sync::atomic::AtomicUsize::new(0);
        let (provider, config, attempts_ref) = (&provider, &config, &attempts);
        let outcome = (move || async move {
            attempts_ref.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            call_with_timeout(provider.as_ref(), prompt, config).await
        })
        .retry(backoff)
        .when(ProviderError::is_retryable)
        .notify(|e: &ProviderError, delay: Duration| {
            debug!(provider = %spec.name, error = %e, ?delay, "Retrying provider call");
        })
        .await;

        match &outcome {
            Ok(_) => self.breaker.record_success(&spec.name),
            Err(_) => self.breaker.record_failure(&spec.name),
        }
        (outcome, attempts.into_inner())
    }
}

async fn call_with_timeout(
    provider: &dyn CandidateProvider,
    prompt: &str,
    config: &GenerationConfig,
) -> Result<Generation, ProviderError> {
    tokio::time::timeout(config.timeout, provider.generate(prompt, config))
        .await
        .map_err(|_| ProviderError::Timeout(config.timeout))?
}

impl std::fmt::Debug for MultiModelAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiModelAggregator")
            .field("registry", &self.registry)
            .field("breaker", &self.breaker)
            .finish()
    }
}

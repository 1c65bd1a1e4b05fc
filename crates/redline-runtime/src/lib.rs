//! # redline-runtime
//!
//! Async execution for Redline.
//!
//! `redline-core` is synchronous and deterministic. This crate adds:
//! - Parallel gate evaluation with per-gate timeouts and a report cache
//! - Correction on the blocking pool
//! - Multi-model aggregation: generate candidates from several providers,
//!   evaluate each, and select the lowest-risk one
//!
//! Only aggregation talks to external providers. Evaluation and
//! correction never do.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use redline_runtime::{
//!     MultiModelAggregator, ProviderRegistry, RuntimeConfig, RuntimeOrchestrator,
//! };
//!
//! let runtime = Arc::new(RuntimeOrchestrator::builtin(RuntimeConfig::default())?);
//! let report = runtime.evaluate(&EvaluationRequest::new("Guaranteed returns!")).await?;
//!
//! let aggregator = MultiModelAggregator::new(runtime, ProviderRegistry::with_defaults());
//! let best = aggregator.aggregate(&request).await?;
//! ```

pub mod aggregator;
pub mod cache;
pub mod config;
pub mod orchestrator;
pub mod providers;
pub mod resilience;

pub use aggregator::{AggregationResult, CandidateResponse, MultiModelAggregator};
pub use cache::{CacheKey, ReportCache};
pub use config::{CacheConfig, ProviderSettings, RuntimeConfig};
pub use orchestrator::RuntimeOrchestrator;
pub use providers::{
    CandidateProvider, Generation, GenerationConfig, ProviderError, ProviderFactory,
    ProviderRegistry,
};
pub use resilience::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

use thiserror::Error;

use redline_core::{CatalogError, InputError};

/// Errors from the runtime.
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Invalid request: {0}")]
    Input(#[from] InputError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("Invalid runtime config: {0}")]
    Config(String),

    #[error("Failed to parse runtime config: {0}")]
    ConfigParse(#[from] serde_yaml::Error),

    #[error("Failed to read {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Background task failed: {0}")]
    Task(String),
}

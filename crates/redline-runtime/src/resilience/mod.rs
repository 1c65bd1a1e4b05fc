//! Resilience patterns for candidate providers.
//!
//! Retries with backoff live with the aggregator (`backon`); this module
//! holds the per-provider circuit breaker.

mod circuit_breaker;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};

//! Candidate providers for multi-model aggregation.
//!
//! A provider turns a prompt into one candidate text. Providers are built
//! from a [`ProviderSpec`](redline_core::ProviderSpec) by the
//! [`ProviderRegistry`]; the provider name has the form `type[:model]`.
//!
//! ## Available Providers
//!
//! - **simulated**: returns a fixed response (always available)
//! - **anthropic**: Messages API (requires `anthropic` feature)

#[cfg(feature = "anthropic")]
pub mod anthropic;
pub mod factory;
pub mod secrets;
pub mod simulated;

pub use factory::{ProviderFactory, ProviderRegistry};
pub use secrets::{ApiCredential, CredentialSource};
pub use simulated::{SimulatedProvider, SimulatedProviderFactory};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Errors from candidate providers.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    HttpError(String),

    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Option<Duration> },

    #[error("API error {status}: {message}")]
    ApiError { status: u16, message: String },

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("Authentication failed")]
    AuthError,

    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Unknown provider type: {0}")]
    UnknownProvider(String),

    #[error("Circuit open for provider {0}")]
    CircuitOpen(String),
}

impl ProviderError {
    /// Transient errors worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::HttpError(_)
            | ProviderError::RateLimited { .. }
            | ProviderError::Timeout(_) => true,
            ProviderError::ApiError { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Per-call generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub max_tokens: u32,
    pub temperature: f32,
    pub timeout: Duration,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 1024,
            temperature: 0.0,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Generation {
    pub text: String,
    pub model: String,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    pub fn total(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Source of one candidate text.
#[async_trait]
pub trait CandidateProvider: Send + Sync {
    async fn generate(&self, prompt: &str, config: &GenerationConfig)
        -> Result<Generation, ProviderError>;

    /// Provider type name.
    fn name(&self) -> &str;

    /// Rough token estimate (4 chars per token).
    fn estimate_tokens(&self, text: &str) -> u32 {
        (text.len() / 4) as u32
    }
}

//! Fixed-response provider.
//!
//! Used for offline runs and tests; a provider spec carrying `simulated_response`
//! always resolves here regardless of its declared type.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::sync::Arc;

use super::{
    CandidateProvider, Generation, GenerationConfig, ProviderError, ProviderFactory, TokenUsage,
};

#[derive(Debug, Clone)]
pub struct SimulatedProvider {
    response: String,
    model: String,
}

impl SimulatedProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
            model: "simulated".to_string(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }
}

#[async_trait]
impl CandidateProvider for SimulatedProvider {
    async fn generate(
        &self,
        prompt: &str,
        _config: &GenerationConfig,
    ) -> Result<Generation, ProviderError> {
        Ok(Generation {
            text: self.response.clone(),
            model: self.model.clone(),
            usage: TokenUsage {
                prompt_tokens: self.estimate_tokens(prompt),
                completion_tokens: self.estimate_tokens(&self.response),
            },
        })
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

/// ## Configuration Format
/// ```json
/// { "response": "fixed text", "model": "optional label" }
/// ```
pub struct SimulatedProviderFactory;

impl ProviderFactory for SimulatedProviderFactory {
    fn provider_type(&self) -> &'static str {
        "simulated"
    }

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn CandidateProvider>, ProviderError> {
        self.validate_config(config)?;
        let mut provider = SimulatedProvider::new(config["response"].as_str().unwrap_or_default());
        if let Some(model) = config["model"].as_str() {
            provider = provider.with_model(model);
        }
        Ok(Arc::new(provider))
    }

    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError> {
        if config["response"].is_string() {
            Ok(())
        } else {
            Err(ProviderError::NotConfigured(
                "simulated provider requires a response".to_string(),
            ))
        }
    }

    fn description(&self) -> &'static str {
        "Returns a fixed response"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_returns_fixed_response() {
        let provider = SimulatedProvider::new("Capital at risk.");
        let out = provider
            .generate("write a promotion", &GenerationConfig::default())
            .await
            .unwrap();
        assert_eq!(out.text, "Capital at risk.");
        assert_eq!(out.model, "simulated");
        assert_eq!(out.usage.completion_tokens, 4);
    }

    #[test]
    fn test_factory_requires_response() {
        let factory = SimulatedProviderFactory;
        assert!(factory.create(&serde_json::json!({})).is_err());
        let provider = factory
            .create(&serde_json::json!({"response": "", "model": "draft"}))
            .unwrap();
        assert_eq!(provider.name(), "simulated");
    }
}

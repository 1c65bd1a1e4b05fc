//! Provider factory pattern for candidate provider registration.
//!
//! Providers register factories that create instances from JSON
//! configuration. A [`ProviderSpec`] is turned into a `(type, config)`
//! pair by [`ProviderRegistry::create_for_spec`].
//!
//! ## Usage
//!
//! ```ignore
//! let registry = ProviderRegistry::with_defaults();
//! let provider = registry.create_for_spec(&ProviderSpec::simulated("draft", "text"))?;
//! ```

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value as JsonValue;

use redline_core::ProviderSpec;

use super::{CandidateProvider, ProviderError};

/// Factory for creating candidate providers from configuration.
pub trait ProviderFactory: Send + Sync {
    /// Unique identifier for this provider type, e.g. `"anthropic"`.
    fn provider_type(&self) -> &'static str;

    fn create(&self, config: &JsonValue) -> Result<Arc<dyn CandidateProvider>, ProviderError>;

    /// Validate configuration without creating a provider.
    fn validate_config(&self, config: &JsonValue) -> Result<(), ProviderError>;

    fn description(&self) -> &'static str {
        "Candidate provider"
    }
}

/// Split `type[:model]` into its parts.
pub fn parse_spec_name(name: &str) -> (&str, Option<&str>) {
    match name.split_once(':') {
        Some((kind, model)) if !model.trim().is_empty() => (kind.trim(), Some(model.trim())),
        Some((kind, _)) => (kind.trim(), None),
        None => (name.trim(), None),
    }
}

/// Provider type and JSON config for a provider spec.
///
/// A provider spec with `simulated_response` always maps to `simulated`.
pub fn spec_config(spec: &ProviderSpec) -> (String, JsonValue) {
    let (kind, model) = parse_spec_name(&spec.name);
    let mut config = serde_json::Map::new();
    if let Some(model) = model {
        config.insert("model".into(), model.into());
    }
    if let Some(max_tokens) = spec.max_tokens {
        config.insert("max_tokens".into(), max_tokens.into());
    }
    if let Some(api_key) = &spec.api_key {
        config.insert("api_key".into(), api_key.as_str().into());
    }
    let kind = match &spec.simulated_response {
        Some(response) => {
            config.insert("response".into(), response.as_str().into());
            "simulated"
        }
        None => kind,
    };
    (kind.to_string(), JsonValue::Object(config))
}

/// Registry of available provider factories.
#[derive(Default)]
pub struct ProviderRegistry {
    factories: BTreeMap<String, Arc<dyn ProviderFactory>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider factory, replacing any with the same type.
    pub fn register(&mut self, factory: Arc<dyn ProviderFactory>) {
        self.factories
            .insert(factory.provider_type().to_string(), factory);
    }

    pub fn create(
        &self,
        provider_type: &str,
        config: &JsonValue,
    ) -> Result<Arc<dyn CandidateProvider>, ProviderError> {
        let factory = self
            .factories
            .get(provider_type)
            .ok_or_else(|| ProviderError::UnknownProvider(provider_type.to_string()))?;
        factory.validate_config(config)?;
        factory.create(config)
    }

    pub fn create_for_spec(
        &self,
        spec: &ProviderSpec,
    ) -> Result<Arc<dyn CandidateProvider>, ProviderError> {
        let (kind, config) = spec_config(spec);
        self.create(&kind, &config)
    }

    pub fn available_types(&self) -> Vec<&str> {
        self.factories.keys().map(|s| s.as_str()).collect()
    }

    pub fn has_provider(&self, provider_type: &str) -> bool {
        self.factories.contains_key(provider_type)
    }

    /// `(type, description)` for every registered factory.
    pub fn describe(&self) -> Vec<(&str, &'static str)> {
        self.factories
            .iter()
            .map(|(k, f)| (k.as_str(), f.description()))
            .collect()
    }

    /// Registry with every built-in provider compiled in.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::SimulatedProviderFactory));
        #[cfg(feature = "anthropic")]
        registry.register(Arc::new(super::anthropic::AnthropicProviderFactory));
        registry
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.available_types())
            .finish()
    }
}

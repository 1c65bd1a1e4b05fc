//! Credential handling for hosted providers.
//!
//! Keys are wrapped in [`SecretString`] as soon as they are read, so they
//! never show up in `Debug` or `Display` output. The value is exposed only
//! where a request header is set.

use secrecy::{ExposeSecret, SecretString};
use serde_json::Value as JsonValue;
use std::fmt;

use super::ProviderError;

/// Where a credential was loaded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    /// Provider spec or JSON config
    Config,
    Environment,
    Programmatic,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CredentialSource::Config => write!(f, "config"),
            CredentialSource::Environment => write!(f, "environment"),
            CredentialSource::Programmatic => write!(f, "programmatic"),
        }
    }
}

pub struct ApiCredential {
    value: SecretString,
    source: CredentialSource,
    name: &'static str,
}

impl ApiCredential {
    pub fn new(value: impl Into<String>, source: CredentialSource, name: &'static str) -> Self {
        Self {
            value: SecretString::from(value.into()),
            source,
            name,
        }
    }

    /// Load from `config[config_key]`, falling back to `env_var`.
    pub fn from_config_or_env(
        config: &JsonValue,
        config_key: &str,
        env_var: &str,
        name: &'static str,
    ) -> Result<Self, ProviderError> {
        if let Some(value) = config[config_key].as_str() {
            return Ok(Self::new(value, CredentialSource::Config, name));
        }

        if let Ok(value) = std::env::var(env_var) {
            return Ok(Self::new(value, CredentialSource::Environment, name));
        }

        Err(ProviderError::NotConfigured(format!(
            "{} required: set '{}' in config or {} environment variable",
            name, config_key, env_var
        )))
    }

    /// Whether a credential could be loaded, without loading it.
    pub fn is_available(config: &JsonValue, config_key: &str, env_var: &str) -> bool {
        config[config_key].as_str().is_some() || std::env::var(env_var).is_ok()
    }

    /// The raw value. Call only at the point of use.
    pub fn expose(&self) -> &str {
        self.value.expose_secret()
    }

    pub fn is_empty(&self) -> bool {
        self.value.expose_secret().is_empty()
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl fmt::Debug for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiCredential")
            .field("value", &"[REDACTED]")
            .field("source", &self.source)
            .field("name", &self.name)
            .finish()
    }
}

impl fmt::Display for ApiCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {} [REDACTED]", self.name, self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "sk-super-secret-key-12345";

    #[test]
    fn test_credential_redacted_in_debug() {
        let cred = ApiCredential::new(SECRET, CredentialSource::Programmatic, "Test API key");
        let debug = format!("{:?}", cred);
        assert!(!debug.contains(SECRET), "Secret exposed in Debug!");
        assert!(debug.contains("[REDACTED]"));
    }

    #[test]
    fn test_credential_redacted_in_display() {
        let cred = ApiCredential::new(SECRET, CredentialSource::Config, "Test API key");
        let display = cred.to_string();
        assert!(!display.contains(SECRET), "Secret exposed in Display!");
        assert_eq!(display, "Test API key from config [REDACTED]");
    }

    #[test]
    fn test_credential_expose() {
        let cred = ApiCredential::new(SECRET, CredentialSource::Programmatic, "Test API key");
        assert_eq!(cred.expose(), SECRET);
        assert!(!cred.is_empty());
        assert_eq!(cred.name(), "Test API key");
    }

    #[test]
    fn test_from_config_or_env_prefers_config() {
        let config = serde_json::json!({ "api_key": "config-key" });
        let cred = ApiCredential::from_config_or_env(
            &config,
            "api_key",
            "REDLINE_TEST_NONEXISTENT_VAR",
            "Test",
        )
        .unwrap();
        assert_eq!(cred.expose(), "config-key");
        assert_eq!(cred.source(), CredentialSource::Config);
    }

    #[test]
    fn test_from_config_or_env_missing() {
        let config = serde_json::json!({});
        let result = ApiCredential::from_config_or_env(
            &config,
            "api_key",
            "REDLINE_TEST_NONEXISTENT_VAR_12345",
            "Test",
        );
        assert!(matches!(result, Err(ProviderError::NotConfigured(_))));
        assert!(!ApiCredential::is_available(
            &config,
            "api_key",
            "REDLINE_TEST_NONEXISTENT_VAR_12345"
        ));
    }
}

//! Runtime configuration.
//!
//! Loaded from YAML. Durations use human-readable strings (`500ms`,
//! `30s`, `1h`). Every section is optional.
//!
//! ```yaml
//! workers: 8
//! gate_timeout: 2s
//! cache: { enabled: true, max_entries: 10000, ttl: 1h }
//! providers: { timeout: 30s, max_retries: 2, min_backoff: 200ms }
//! circuit_breaker: { failure_threshold: 3, recovery_timeout: 30s, success_threshold: 2 }
//! correction: { max_iterations: 4, verify_determinism: true }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use redline_core::CorrectionConfig;

use crate::resilience::CircuitBreakerConfig;
use crate::RuntimeError;

/// Serde adapter for `humantime` durations.
pub(crate) mod human_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        humantime::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}

fn default_workers() -> usize {
    4
}

fn default_gate_timeout() -> Duration {
    Duration::from_secs(2)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Gates evaluated at once.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Per-gate time limit; an overrun is reported as `ERROR`.
    #[serde(default = "default_gate_timeout", with = "human_duration")]
    pub gate_timeout: Duration,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub providers: ProviderSettings,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub correction: CorrectionConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            gate_timeout: default_gate_timeout(),
            cache: CacheConfig::default(),
            providers: ProviderSettings::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            correction: CorrectionConfig::default(),
        }
    }
}

impl RuntimeConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self, RuntimeError> {
        let config: RuntimeConfig = serde_yaml::from_str(yaml)?;
        if config.workers == 0 {
            return Err(RuntimeError::Config("workers must be at least 1".into()));
        }
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, RuntimeError> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|source| RuntimeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&yaml)
    }
}

/// Report cache settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_entries")]
    pub max_entries: u64,
    #[serde(default = "default_ttl", with = "human_duration")]
    pub ttl: Duration,
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> u64 {
    10_000
}

fn default_ttl() -> Duration {
    Duration::from_secs(3600)
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: default_max_entries(),
            ttl: default_ttl(),
        }
    }
}

/// Candidate provider call settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSettings {
    /// Limit for one provider call.
    #[serde(default = "default_provider_timeout", with = "human_duration")]
    pub timeout: Duration,
    /// Retries after the first attempt, for retryable errors only.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,
    #[serde(default = "default_min_backoff", with = "human_duration")]
    pub min_backoff: Duration,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

fn default_provider_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_max_retries() -> usize {
    2
}

fn default_min_backoff() -> Duration {
    Duration::from_millis(200)
}

fn default_max_tokens() -> u32 {
    1024
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            timeout: default_provider_timeout(),
            max_retries: default_max_retries(),
            min_backoff: default_min_backoff(),
            max_tokens: default_max_tokens(),
        }
    }
}

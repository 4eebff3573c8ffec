//! Configuration types

use crate::*;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ============================================================================
// DEFAULTS
// ============================================================================

/// Default base URL of a local Ollama server.
pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://localhost:11434";

/// Default per-trial generation timeout.
pub const DEFAULT_GENERATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Default number of immediate retries for transient gateway failures.
pub const DEFAULT_MAX_RETRIES: u32 = 2;

/// Default first retry delay.
pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(250);

/// Default retry delay cap.
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_secs(2);

/// Default exponential backoff multiplier.
pub const DEFAULT_BACKOFF_MULTIPLIER: f32 = 2.0;

/// Default number of chunks requested from the retrieval gateway.
pub const DEFAULT_RETRIEVAL_TOP_K: usize = 4;

/// Default capacity of the in-process progress broadcast channel.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 1024;

// ============================================================================
// RETRY
// ============================================================================

/// Retry configuration for gateway calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct RetryConfig {
    pub max_retries: u32,
    /// Initial backoff duration
    #[cfg_attr(feature = "openapi", schema(value_type = u64))]
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    #[cfg_attr(feature = "openapi", schema(value_type = u64))]
    pub max_backoff: Duration,
    pub backoff_multiplier: f32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryConfig {
    /// A policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_backoff`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let factor = f64::from(self.backoff_multiplier).powi(exponent);
        let millis = self.initial_backoff.as_millis() as f64 * factor;
        let capped = millis.min(self.max_backoff.as_millis() as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }
}

// ============================================================================
// ENGINE CONFIG
// ============================================================================

/// Runtime configuration of the execution engine and its default adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct EngineConfig {
    /// Base URL of the Ollama generation server
    pub ollama_base_url: String,
    /// Per-trial generation timeout
    #[cfg_attr(feature = "openapi", schema(value_type = u64))]
    pub generation_timeout: Duration,
    pub retry: RetryConfig,
    /// Retrieval top-k used when an experiment does not set its own
    pub default_retrieval_top_k: usize,
    /// Capacity of the broadcast progress channel
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            ollama_base_url: DEFAULT_OLLAMA_BASE_URL.to_string(),
            generation_timeout: DEFAULT_GENERATION_TIMEOUT,
            retry: RetryConfig::default(),
            default_retrieval_top_k: DEFAULT_RETRIEVAL_TOP_K,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        }
    }
}

impl EngineConfig {
    /// Create from environment variables with fallback to defaults.
    ///
    /// Environment variables:
    /// - `CRUCIBLE_OLLAMA_URL`: Ollama base URL (default: http://localhost:11434)
    /// - `CRUCIBLE_GENERATION_TIMEOUT_SECS`: per-trial timeout (default: 300)
    /// - `CRUCIBLE_MAX_RETRIES`: retries for transient failures (default: 2)
    /// - `CRUCIBLE_INITIAL_BACKOFF_MS`: first retry delay (default: 250)
    /// - `CRUCIBLE_MAX_BACKOFF_MS`: retry delay cap (default: 2000)
    /// - `CRUCIBLE_BACKOFF_MULTIPLIER`: backoff growth factor (default: 2.0)
    /// - `CRUCIBLE_RETRIEVAL_TOP_K`: default retrieval top-k (default: 4)
    /// - `CRUCIBLE_EVENT_CHANNEL_CAPACITY`: broadcast capacity (default: 1024)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        Self {
            ollama_base_url: std::env::var("CRUCIBLE_OLLAMA_URL")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(defaults.ollama_base_url),
            generation_timeout: env_parse::<u64>("CRUCIBLE_GENERATION_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.generation_timeout),
            retry: RetryConfig {
                max_retries: env_parse("CRUCIBLE_MAX_RETRIES")
                    .unwrap_or(defaults.retry.max_retries),
                initial_backoff: env_parse::<u64>("CRUCIBLE_INITIAL_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.initial_backoff),
                max_backoff: env_parse::<u64>("CRUCIBLE_MAX_BACKOFF_MS")
                    .map(Duration::from_millis)
                    .unwrap_or(defaults.retry.max_backoff),
                backoff_multiplier: env_parse("CRUCIBLE_BACKOFF_MULTIPLIER")
                    .unwrap_or(defaults.retry.backoff_multiplier),
            },
            default_retrieval_top_k: env_parse("CRUCIBLE_RETRIEVAL_TOP_K")
                .unwrap_or(defaults.default_retrieval_top_k),
            event_channel_capacity: env_parse("CRUCIBLE_EVENT_CHANNEL_CAPACITY")
                .unwrap_or(defaults.event_channel_capacity),
        }
    }

    /// Validate the configuration.
    ///
    /// Validates:
    /// - ollama_base_url is an http(s) URL
    /// - generation_timeout is positive
    /// - backoff_multiplier >= 1.0 and initial_backoff <= max_backoff
    /// - default_retrieval_top_k and event_channel_capacity are positive
    pub fn validate(&self) -> CrucibleResult<()> {
        if !(self.ollama_base_url.starts_with("http://")
            || self.ollama_base_url.starts_with("https://"))
        {
            return Err(CrucibleError::Config(ConfigError::InvalidValue {
                field: "ollama_base_url".to_string(),
                value: self.ollama_base_url.clone(),
                reason: "must start with http:// or https://".to_string(),
            }));
        }

        if self.generation_timeout.is_zero() {
            return Err(CrucibleError::Config(ConfigError::InvalidValue {
                field: "generation_timeout".to_string(),
                value: format!("{:?}", self.generation_timeout),
                reason: "generation_timeout must be positive".to_string(),
            }));
        }

        if !self.retry.backoff_multiplier.is_finite() || self.retry.backoff_multiplier < 1.0 {
            return Err(CrucibleError::Config(ConfigError::InvalidValue {
                field: "retry.backoff_multiplier".to_string(),
                value: self.retry.backoff_multiplier.to_string(),
                reason: "backoff_multiplier must be at least 1.0".to_string(),
            }));
        }

        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(CrucibleError::Config(ConfigError::InvalidValue {
                field: "retry.initial_backoff".to_string(),
                value: format!("{:?}", self.retry.initial_backoff),
                reason: "initial_backoff must not exceed max_backoff".to_string(),
            }));
        }

        if self.default_retrieval_top_k == 0 {
            return Err(CrucibleError::Config(ConfigError::InvalidValue {
                field: "default_retrieval_top_k".to_string(),
                value: "0".to_string(),
                reason: "default_retrieval_top_k must be greater than 0".to_string(),
            }));
        }

        if self.event_channel_capacity == 0 {
            return Err(CrucibleError::Config(ConfigError::InvalidValue {
                field: "event_channel_capacity".to_string(),
                value: "0".to_string(),
                reason: "event_channel_capacity must be greater than 0".to_string(),
            }));
        }

        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(EngineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let config = EngineConfig {
            generation_timeout: Duration::ZERO,
            ..EngineConfig::default()
        };
        match config.validate() {
            Err(CrucibleError::Config(ConfigError::InvalidValue { field, .. })) => {
                assert_eq!(field, "generation_timeout");
            }
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_validate_rejects_non_http_url() {
        let config = EngineConfig {
            ollama_base_url: "localhost:11434".to_string(),
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_backoff_bounds() {
        let config = EngineConfig {
            retry: RetryConfig {
                initial_backoff: Duration::from_secs(5),
                max_backoff: Duration::from_secs(1),
                ..RetryConfig::default()
            },
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let retry = RetryConfig {
            max_retries: 5,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
            backoff_multiplier: 2.0,
        };
        assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(400));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(500));
        assert_eq!(retry.delay_for_attempt(40), Duration::from_millis(500));
    }

    #[test]
    fn test_disabled_retry_has_no_attempts() {
        assert_eq!(RetryConfig::disabled().max_retries, 0);
    }
}

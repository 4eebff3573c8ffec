//! Tracing subscriber setup for binaries embedding the engine.

use crucible_core::{ConfigError, CrucibleResult};
use std::str::FromStr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `CRUCIBLE_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "crucible_engine=info,crucible_llm=info,warn";

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Multi-line human readable output
    Pretty,
    #[default]
    Compact,
    /// One JSON object per line
    Json,
}

impl FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pretty" => Ok(LogFormat::Pretty),
            "compact" | "text" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(ConfigError::InvalidValue {
                field: "CRUCIBLE_LOG_FORMAT".to_string(),
                value: other.to_string(),
                reason: "expected one of pretty, compact, json".to_string(),
            }),
        }
    }
}

/// Logging configuration from environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// `EnvFilter` directives, e.g. `crucible_engine=debug,info`
    pub filter: String,
    pub format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
            format: LogFormat::default(),
        }
    }
}

impl TelemetryConfig {
    /// Read `CRUCIBLE_LOG` and `CRUCIBLE_LOG_FORMAT`.
    pub fn from_env() -> CrucibleResult<Self> {
        let filter = std::env::var("CRUCIBLE_LOG")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string());
        let format = match std::env::var("CRUCIBLE_LOG_FORMAT") {
            Ok(value) => value.parse()?,
            Err(_) => LogFormat::default(),
        };
        Ok(Self { filter, format })
    }

    /// Parse the filter directives.
    pub fn env_filter(&self) -> CrucibleResult<EnvFilter> {
        EnvFilter::try_new(&self.filter).map_err(|e| {
            ConfigError::InvalidValue {
                field: "CRUCIBLE_LOG".to_string(),
                value: self.filter.clone(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}

/// Install the global tracing subscriber. Call once at startup.
///
/// # Errors
/// `ConfigError::InvalidValue` for bad filter directives and
/// `ConfigError::InitFailed` if a subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> CrucibleResult<()> {
    let filter = config.env_filter()?;
    let registry = tracing_subscriber::registry().with(filter);

    let result = match config.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer().pretty()).try_init(),
        LogFormat::Compact => registry
            .with(tracing_subscriber::fmt::layer().compact().with_target(true))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init(),
    };
    result.map_err(|e| ConfigError::InitFailed {
        component: "tracing subscriber".to_string(),
        reason: e.to_string(),
    })?;

    tracing::debug!(filter = %config.filter, format = ?config.format, "Tracing initialized");
    Ok(())
}

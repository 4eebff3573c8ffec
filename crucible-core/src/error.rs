//! Error types for CRUCIBLE operations

use crate::{EntityType, ExperimentId, ExperimentStatus, LifecycleEvent, RunId, RunStatus};
use thiserror::Error;
use uuid::Uuid;

/// Lifecycle and orchestration errors surfaced to the caller.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    #[error("Invalid state transition: cannot {event} an experiment in state {from}")]
    InvalidStateTransition {
        from: ExperimentStatus,
        event: LifecycleEvent,
    },

    #[error("Experiment {experiment_id} already has an active execution")]
    AlreadyRunning { experiment_id: ExperimentId },

    #[error("Experiment {experiment_id} is not running (status {status})")]
    NotRunning {
        experiment_id: ExperimentId,
        status: ExperimentStatus,
    },

    #[error("Invalid run transition for {run_id}: {from} -> {to}")]
    InvalidRunTransition {
        run_id: RunId,
        from: RunStatus,
        to: RunStatus,
    },
}

impl EngineError {
    /// Shorthand for a missing experiment.
    pub fn experiment_not_found(id: ExperimentId) -> Self {
        EngineError::NotFound {
            entity_type: EntityType::Experiment,
            id: crate::EntityIdType::as_uuid(&id),
        }
    }

    /// Shorthand for a configuration failure.
    pub fn invalid_configuration(reason: impl Into<String>) -> Self {
        EngineError::InvalidConfiguration {
            reason: reason.into(),
        }
    }
}

/// Generation and retrieval gateway failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("Generation service {provider} unavailable: {message}")]
    Unavailable { provider: String, message: String },

    #[error("Request to {provider} timed out after {timeout_ms}ms")]
    Timeout { provider: String, timeout_ms: u64 },

    #[error("Model not found on {provider}: {model}")]
    ModelNotFound { provider: String, model: String },

    #[error("Request to {provider} failed with status {status}: {message}")]
    RequestFailed {
        provider: String,
        status: u16,
        message: String,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Retrieval unavailable: {reason}")]
    RetrievalUnavailable { reason: String },
}

impl GatewayError {
    /// Connectivity failures that may succeed on an immediate retry.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Unavailable { .. } => true,
            GatewayError::RequestFailed { status, .. } => *status == 502 || *status == 503,
            _ => false,
        }
    }

    /// Short machine-readable code used in error events.
    pub fn code(&self) -> &'static str {
        match self {
            GatewayError::Unavailable { .. } => "GATEWAY_UNAVAILABLE",
            GatewayError::Timeout { .. } => "GATEWAY_TIMEOUT",
            GatewayError::ModelNotFound { .. } => "MODEL_NOT_FOUND",
            GatewayError::RequestFailed { .. } => "REQUEST_FAILED",
            GatewayError::InvalidResponse { .. } => "INVALID_RESPONSE",
            GatewayError::RetrievalUnavailable { .. } => "RETRIEVAL_UNAVAILABLE",
        }
    }
}

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {entity_type:?} with id {id}")]
    NotFound { entity_type: EntityType, id: Uuid },

    #[error("Insert failed for {entity_type:?}: {reason}")]
    InsertFailed { entity_type: EntityType, reason: String },

    #[error("Update failed for {entity_type:?} with id {id}: {reason}")]
    UpdateFailed {
        entity_type: EntityType,
        id: Uuid,
        reason: String,
    },

    #[error("Delete refused for {entity_type:?} with id {id}: {reason}")]
    DeleteRefused {
        entity_type: EntityType,
        id: Uuid,
        reason: String,
    },

    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to parse {source_name}: {reason}")]
    ParseFailed { source_name: String, reason: String },

    #[error("Failed to initialize {component}: {reason}")]
    InitFailed { component: String, reason: String },
}

/// Master error type for all CRUCIBLE errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CrucibleError {
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for CRUCIBLE operations.
pub type CrucibleResult<T> = Result<T, CrucibleError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_transition_names_current_state() {
        let err = EngineError::InvalidStateTransition {
            from: ExperimentStatus::Completed,
            event: LifecycleEvent::Pause,
        };
        let msg = format!("{}", err);
        assert!(msg.contains("COMPLETED"));
        assert!(msg.contains("pause"));
    }

    #[test]
    fn test_not_found_display() {
        let err = EngineError::experiment_not_found(ExperimentId::nil());
        let msg = format!("{}", err);
        assert!(msg.contains("Experiment"));
        assert!(msg.contains("00000000-0000-0000-0000-000000000000"));
    }

    #[test]
    fn test_gateway_transient_classification() {
        let unavailable = GatewayError::Unavailable {
            provider: "ollama".to_string(),
            message: "connection refused".to_string(),
        };
        assert!(unavailable.is_transient());

        let timeout = GatewayError::Timeout {
            provider: "ollama".to_string(),
            timeout_ms: 1000,
        };
        assert!(!timeout.is_transient());

        let missing = GatewayError::ModelNotFound {
            provider: "ollama".to_string(),
            model: "llama3".to_string(),
        };
        assert!(!missing.is_transient());
        assert_eq!(missing.code(), "MODEL_NOT_FOUND");

        let bad_gateway = GatewayError::RequestFailed {
            provider: "ollama".to_string(),
            status: 503,
            message: "loading".to_string(),
        };
        assert!(bad_gateway.is_transient());
    }

    #[test]
    fn test_crucible_error_from_variants() {
        let storage = CrucibleError::from(StorageError::LockPoisoned);
        assert!(matches!(storage, CrucibleError::Storage(_)));

        let engine = CrucibleError::from(EngineError::invalid_configuration("no models"));
        assert!(matches!(engine, CrucibleError::Engine(_)));

        let gateway = CrucibleError::from(GatewayError::RetrievalUnavailable {
            reason: "not configured".to_string(),
        });
        assert!(matches!(gateway, CrucibleError::Gateway(_)));

        let config = CrucibleError::from(ConfigError::MissingRequired {
            field: "ollama_url".to_string(),
        });
        assert!(matches!(config, CrucibleError::Config(_)));
    }
}

//! Enum types for CRUCIBLE entities

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// EXPERIMENT STATUS
// ============================================================================

/// Lifecycle status of an experiment.
///
/// Transitions are governed by [`crate::lifecycle`]; FAILED and COMPLETED are
/// terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ExperimentStatus {
    /// Created by the management API, configuration still editable
    #[default]
    Draft,
    /// Execution loop is active (or about to observe a pause/cancel signal)
    Running,
    /// Loop stopped between trials; remaining runs stay PENDING
    Paused,
    /// Every run was processed
    Completed,
    /// Cancelled or aborted by an internal fault
    Failed,
}

impl ExperimentStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ExperimentStatus::Draft => "DRAFT",
            ExperimentStatus::Running => "RUNNING",
            ExperimentStatus::Paused => "PAUSED",
            ExperimentStatus::Completed => "COMPLETED",
            ExperimentStatus::Failed => "FAILED",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ExperimentStatusParseError> {
        match s.to_lowercase().as_str() {
            "draft" => Ok(ExperimentStatus::Draft),
            "running" => Ok(ExperimentStatus::Running),
            "paused" => Ok(ExperimentStatus::Paused),
            "completed" | "complete" => Ok(ExperimentStatus::Completed),
            "failed" => Ok(ExperimentStatus::Failed),
            _ => Err(ExperimentStatusParseError(s.to_string())),
        }
    }

    /// Whether no further lifecycle transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExperimentStatus::Completed | ExperimentStatus::Failed)
    }

    /// Whether the configuration may still be edited.
    pub fn is_config_mutable(&self) -> bool {
        matches!(self, ExperimentStatus::Draft)
    }
}

impl fmt::Display for ExperimentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ExperimentStatus {
    type Err = ExperimentStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid experiment status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentStatusParseError(pub String);

impl fmt::Display for ExperimentStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid experiment status: {}", self.0)
    }
}

impl std::error::Error for ExperimentStatusParseError {}

// ============================================================================
// RUN STATUS
// ============================================================================

/// Status of a single persisted run.
///
/// Cancelled runs are recorded as FAILED with the message "cancelled".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    Success,
    Failed,
}

impl RunStatus {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "PENDING",
            RunStatus::Running => "RUNNING",
            RunStatus::Success => "SUCCESS",
            RunStatus::Failed => "FAILED",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, RunStatusParseError> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "success" | "succeeded" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(RunStatusParseError(s.to_string())),
        }
    }

    /// Whether the run has reached its final outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Failed)
    }

    /// Whether moving to `next` follows PENDING -> RUNNING -> {SUCCESS|FAILED},
    /// or the bulk PENDING -> FAILED used on cancellation.
    pub fn can_transition_to(&self, next: RunStatus) -> bool {
        matches!(
            (self, next),
            (RunStatus::Pending, RunStatus::Running)
                | (RunStatus::Pending, RunStatus::Failed)
                | (RunStatus::Running, RunStatus::Success)
                | (RunStatus::Running, RunStatus::Failed)
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for RunStatus {
    type Err = RunStatusParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid run status string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunStatusParseError(pub String);

impl fmt::Display for RunStatusParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid run status: {}", self.0)
    }
}

impl std::error::Error for RunStatusParseError {}

// ============================================================================
// CONTEXT MODE
// ============================================================================

/// How auxiliary context is supplied to generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ContextMode {
    /// Prompt is sent as is
    #[default]
    None,
    /// Ranked chunks from the retrieval gateway are inlined
    Retrieval,
    /// The whole referenced document is inlined
    FullContext,
}

impl ContextMode {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ContextMode::None => "NONE",
            ContextMode::Retrieval => "RETRIEVAL",
            ContextMode::FullContext => "FULL_CONTEXT",
        }
    }

    /// Parse from database string representation.
    pub fn from_db_str(s: &str) -> Result<Self, ContextModeParseError> {
        match s.to_lowercase().as_str() {
            "none" => Ok(ContextMode::None),
            "retrieval" | "rag" => Ok(ContextMode::Retrieval),
            "full_context" | "fullcontext" | "full-context" => Ok(ContextMode::FullContext),
            _ => Err(ContextModeParseError(s.to_string())),
        }
    }

    /// Whether this mode needs a document reference.
    pub fn requires_document(&self) -> bool {
        !matches!(self, ContextMode::None)
    }
}

impl fmt::Display for ContextMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for ContextMode {
    type Err = ContextModeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid context mode string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextModeParseError(pub String);

impl fmt::Display for ContextModeParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid context mode: {}", self.0)
    }
}

impl std::error::Error for ContextModeParseError {}

// ============================================================================
// ENTITY TYPE
// ============================================================================

/// Entity type discriminator used in storage errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum EntityType {
    Experiment,
    Run,
    Document,
    SystemPrompt,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_experiment_status_db_roundtrip() {
        for status in [
            ExperimentStatus::Draft,
            ExperimentStatus::Running,
            ExperimentStatus::Paused,
            ExperimentStatus::Completed,
            ExperimentStatus::Failed,
        ] {
            assert_eq!(ExperimentStatus::from_db_str(status.as_db_str()), Ok(status));
        }
        assert!(ExperimentStatus::from_db_str("cancelled").is_err());
    }

    #[test]
    fn test_run_status_transitions_never_go_backward() {
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Running));
        assert!(RunStatus::Pending.can_transition_to(RunStatus::Failed));
        assert!(RunStatus::Running.can_transition_to(RunStatus::Success));
        assert!(!RunStatus::Pending.can_transition_to(RunStatus::Success));
        assert!(!RunStatus::Running.can_transition_to(RunStatus::Pending));
        assert!(!RunStatus::Success.can_transition_to(RunStatus::Failed));
        assert!(!RunStatus::Failed.can_transition_to(RunStatus::Running));
    }

    #[test]
    fn test_context_mode_aliases() {
        assert_eq!(ContextMode::from_db_str("RAG"), Ok(ContextMode::Retrieval));
        assert_eq!(
            ContextMode::from_db_str("full-context"),
            Ok(ContextMode::FullContext)
        );
        assert!(ContextMode::FullContext.requires_document());
        assert!(!ContextMode::None.requires_document());
    }

    #[test]
    fn test_status_serde_uses_screaming_case() {
        let json = serde_json::to_string(&ExperimentStatus::Paused).unwrap();
        assert_eq!(json, "\"PAUSED\"");
        let mode: ContextMode = serde_json::from_str("\"FULL_CONTEXT\"").unwrap();
        assert_eq!(mode, ContextMode::FullContext);
    }
}

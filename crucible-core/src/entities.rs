//! Core entity structures

use crate::{
    ContextMode, DocumentId, DurationMs, EngineError, ExperimentId, ExperimentStatus,
    GenerationOutput, RunId, RunStatus, SystemPromptId, Timestamp,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

// ============================================================================
// HYPERPARAMETERS
// ============================================================================

/// Sampling and decoding parameters applied to every trial of an experiment.
///
/// Unset values fall back to the inference server's model defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Hyperparameters {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,
    /// Maximum tokens to generate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repeat_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    /// Context window size in tokens
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_window: Option<u32>,
}

impl Hyperparameters {
    /// Check value ranges.
    pub fn validate(&self) -> Result<(), EngineError> {
        if let Some(temperature) = self.temperature {
            if !temperature.is_finite() || !(0.0..=2.0).contains(&temperature) {
                return Err(EngineError::invalid_configuration(format!(
                    "temperature must be between 0.0 and 2.0, got {}",
                    temperature
                )));
            }
        }
        if let Some(top_p) = self.top_p {
            if !top_p.is_finite() || !(0.0..=1.0).contains(&top_p) {
                return Err(EngineError::invalid_configuration(format!(
                    "top_p must be between 0.0 and 1.0, got {}",
                    top_p
                )));
            }
        }
        if self.max_tokens == Some(0) {
            return Err(EngineError::invalid_configuration(
                "max_tokens must be greater than 0",
            ));
        }
        if self.context_window == Some(0) {
            return Err(EngineError::invalid_configuration(
                "context_window must be greater than 0",
            ));
        }
        if let Some(penalty) = self.repeat_penalty {
            if !penalty.is_finite() || penalty <= 0.0 {
                return Err(EngineError::invalid_configuration(format!(
                    "repeat_penalty must be positive, got {}",
                    penalty
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// EXPERIMENT
// ============================================================================

fn default_iterations() -> u32 {
    1
}

/// The batch definition expanded by the run matrix builder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ExperimentConfig {
    /// Model identifiers, in the order their trials run
    pub models: Vec<String>,
    /// Embedding models; only consulted in RETRIEVAL mode
    #[serde(default)]
    pub embedding_models: Vec<String>,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    #[serde(default)]
    pub context_mode: ContextMode,
    /// User prompt sent to every trial
    pub prompt: String,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    #[serde(default)]
    pub document_id: Option<DocumentId>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    #[serde(default)]
    pub system_prompt_id: Option<SystemPromptId>,
    /// Chunks requested per retrieval; engine default when unset
    #[serde(default)]
    pub retrieval_top_k: Option<usize>,
    #[serde(default)]
    pub hyperparameters: Hyperparameters,
}

impl ExperimentConfig {
    /// Minimal configuration: the given models, one iteration, no context.
    pub fn new(models: Vec<String>, prompt: impl Into<String>) -> Self {
        Self {
            models,
            embedding_models: Vec::new(),
            iterations: 1,
            context_mode: ContextMode::None,
            prompt: prompt.into(),
            document_id: None,
            system_prompt_id: None,
            retrieval_top_k: None,
            hyperparameters: Hyperparameters::default(),
        }
    }

    /// Validate the configuration before it is expanded into trials.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.models.is_empty() {
            return Err(EngineError::invalid_configuration(
                "at least one model is required",
            ));
        }
        if self.models.iter().any(|m| m.trim().is_empty()) {
            return Err(EngineError::invalid_configuration(
                "model identifiers must not be blank",
            ));
        }
        if self.iterations < 1 {
            return Err(EngineError::invalid_configuration(
                "iterations must be at least 1",
            ));
        }
        if self.context_mode == ContextMode::Retrieval {
            if self.embedding_models.is_empty() {
                return Err(EngineError::invalid_configuration(
                    "RETRIEVAL mode requires at least one embedding model",
                ));
            }
            if self.embedding_models.iter().any(|m| m.trim().is_empty()) {
                return Err(EngineError::invalid_configuration(
                    "embedding model identifiers must not be blank",
                ));
            }
        }
        if self.context_mode.requires_document() && self.document_id.is_none() {
            return Err(EngineError::invalid_configuration(format!(
                "{} mode requires a document reference",
                self.context_mode
            )));
        }
        if self.retrieval_top_k == Some(0) {
            return Err(EngineError::invalid_configuration(
                "retrieval_top_k must be greater than 0",
            ));
        }
        if self.prompt.trim().is_empty() {
            return Err(EngineError::invalid_configuration("prompt must not be empty"));
        }
        self.hyperparameters.validate()
    }
}

/// An experiment and its lifecycle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Experiment {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub experiment_id: ExperimentId,
    pub name: String,
    pub status: ExperimentStatus,
    pub config: ExperimentConfig,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub updated_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub started_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub completed_at: Option<Timestamp>,
}

impl Experiment {
    /// Create a DRAFT experiment.
    pub fn new(name: impl Into<String>, config: ExperimentConfig) -> Self {
        let now = Utc::now();
        Self {
            experiment_id: ExperimentId::now_v7(),
            name: name.into(),
            status: ExperimentStatus::Draft,
            config,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }
}

// ============================================================================
// TRIAL SPECIFICATION
// ============================================================================

/// One cell of the run matrix. Never persisted on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialSpec {
    /// Position in the matrix, starting at 0
    pub sequence: u32,
    pub model: String,
    pub embedding_model: Option<String>,
    /// Repetition index, starting at 1
    pub iteration: u32,
    pub hyperparameters: Hyperparameters,
    pub context_mode: ContextMode,
    pub document_id: Option<DocumentId>,
    pub system_prompt_id: Option<SystemPromptId>,
    pub retrieval_top_k: Option<usize>,
}

// ============================================================================
// RUN
// ============================================================================

/// Persisted record of one trial.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Run {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub run_id: RunId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub experiment_id: ExperimentId,
    /// Position in the run matrix; execution order
    pub sequence: u32,
    pub model: String,
    pub embedding_model: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub system_prompt_id: Option<SystemPromptId>,
    pub iteration: u32,
    pub hyperparameters: Hyperparameters,
    pub status: RunStatus,
    pub output: Option<String>,
    pub duration_ms: Option<DurationMs>,
    pub tokens_per_second: Option<f64>,
    pub time_to_first_token_ms: Option<DurationMs>,
    /// Rendered context block sent with the prompt
    pub retrieved_context: Option<String>,
    pub error_message: Option<String>,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub started_at: Option<Timestamp>,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "date-time"))]
    pub completed_at: Option<Timestamp>,
}

/// Error message recorded on runs failed by cancellation.
pub const CANCELLED_MESSAGE: &str = "cancelled";

impl Run {
    /// A PENDING run for the given trial.
    pub fn pending(experiment_id: ExperimentId, trial: &TrialSpec) -> Self {
        Self {
            run_id: RunId::now_v7(),
            experiment_id,
            sequence: trial.sequence,
            model: trial.model.clone(),
            embedding_model: trial.embedding_model.clone(),
            system_prompt_id: trial.system_prompt_id,
            iteration: trial.iteration,
            hyperparameters: trial.hyperparameters.clone(),
            status: RunStatus::Pending,
            output: None,
            duration_ms: None,
            tokens_per_second: None,
            time_to_first_token_ms: None,
            retrieved_context: None,
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
        }
    }

    fn transition(&mut self, next: RunStatus) -> Result<(), EngineError> {
        if !self.status.can_transition_to(next) {
            return Err(EngineError::InvalidRunTransition {
                run_id: self.run_id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    pub fn mark_running(&mut self) -> Result<(), EngineError> {
        self.transition(RunStatus::Running)?;
        self.started_at = Some(Utc::now());
        Ok(())
    }

    /// Record a successful generation with its metrics.
    pub fn mark_succeeded(&mut self, output: GenerationOutput) -> Result<(), EngineError> {
        self.transition(RunStatus::Success)?;
        self.output = Some(output.text);
        self.duration_ms = Some(output.duration_ms);
        self.tokens_per_second = Some(output.tokens_per_second);
        self.time_to_first_token_ms = output.time_to_first_token_ms;
        self.error_message = None;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Record a failure. Valid from PENDING (cancellation, aborts) or RUNNING.
    pub fn mark_failed(
        &mut self,
        message: impl Into<String>,
        duration_ms: Option<DurationMs>,
    ) -> Result<(), EngineError> {
        self.transition(RunStatus::Failed)?;
        self.error_message = Some(message.into());
        self.duration_ms = duration_ms;
        self.completed_at = Some(Utc::now());
        Ok(())
    }
}

// ============================================================================
// PROMPT MATERIALS
// ============================================================================

/// A stored system prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct SystemPrompt {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub system_prompt_id: SystemPromptId,
    pub name: String,
    pub content: String,
}

/// A stored document used as generation context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct Document {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub document_id: DocumentId,
    pub title: String,
    pub content: String,
}

// ============================================================================
// PROGRESS
// ============================================================================

/// Point-in-time execution progress of an experiment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ExperimentProgress {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub experiment_id: ExperimentId,
    pub status: ExperimentStatus,
    pub total_runs: u32,
    /// Runs in a terminal state (SUCCESS or FAILED)
    pub completed_runs: u32,
    pub failed_runs: u32,
    pub percent_complete: f64,
    #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
    pub current_run_id: Option<RunId>,
    pub estimated_time_remaining_ms: Option<DurationMs>,
}

/// `100 * completed / total`, or 0 for an empty matrix.
pub fn percent_complete(completed: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    f64::from(completed) * 100.0 / f64::from(total)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trial() -> TrialSpec {
        TrialSpec {
            sequence: 0,
            model: "llama3".to_string(),
            embedding_model: None,
            iteration: 1,
            hyperparameters: Hyperparameters::default(),
            context_mode: ContextMode::None,
            document_id: None,
            system_prompt_id: None,
            retrieval_top_k: None,
        }
    }

    fn output() -> GenerationOutput {
        GenerationOutput {
            text: "hello".to_string(),
            duration_ms: 120,
            tokens_per_second: 42.5,
            time_to_first_token_ms: Some(15),
        }
    }

    #[test]
    fn test_config_requires_models() {
        let config = ExperimentConfig::new(vec![], "hi");
        assert!(matches!(
            config.validate(),
            Err(EngineError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_config_rejects_zero_iterations() {
        let mut config = ExperimentConfig::new(vec!["m".to_string()], "hi");
        config.iterations = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retrieval_requires_embeddings_and_document() {
        let mut config = ExperimentConfig::new(vec!["m".to_string()], "hi");
        config.context_mode = ContextMode::Retrieval;
        config.document_id = Some(DocumentId::nil());
        assert!(config.validate().is_err());

        config.embedding_models = vec!["nomic-embed-text".to_string()];
        assert!(config.validate().is_ok());

        config.document_id = None;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_hyperparameter_ranges() {
        let mut params = Hyperparameters {
            temperature: Some(0.7),
            top_p: Some(0.9),
            ..Default::default()
        };
        assert!(params.validate().is_ok());
        params.temperature = Some(3.5);
        assert!(params.validate().is_err());
        params.temperature = None;
        params.top_p = Some(1.5);
        assert!(params.validate().is_err());
    }

    #[test]
    fn test_new_experiment_is_draft() {
        let experiment = Experiment::new("baseline", ExperimentConfig::new(vec!["m".into()], "q"));
        assert_eq!(experiment.status, ExperimentStatus::Draft);
        assert!(experiment.started_at.is_none());
    }

    #[test]
    fn test_run_lifecycle_success() {
        let mut run = Run::pending(ExperimentId::nil(), &trial());
        assert_eq!(run.status, RunStatus::Pending);
        run.mark_running().unwrap();
        run.mark_succeeded(output()).unwrap();
        assert_eq!(run.status, RunStatus::Success);
        assert_eq!(run.output.as_deref(), Some("hello"));
        assert_eq!(run.duration_ms, Some(120));
        assert!(run.completed_at.is_some());
    }

    #[test]
    fn test_run_cannot_succeed_from_pending() {
        let mut run = Run::pending(ExperimentId::nil(), &trial());
        let err = run.mark_succeeded(output()).unwrap_err();
        assert!(matches!(err, EngineError::InvalidRunTransition { .. }));
        assert_eq!(run.status, RunStatus::Pending);
    }

    #[test]
    fn test_run_never_moves_backward() {
        let mut run = Run::pending(ExperimentId::nil(), &trial());
        run.mark_failed(CANCELLED_MESSAGE, None).unwrap();
        assert!(run.mark_running().is_err());
        assert!(run.mark_failed("again", None).is_err());
        assert_eq!(run.error_message.as_deref(), Some(CANCELLED_MESSAGE));
    }

    #[test]
    fn test_percent_complete() {
        assert_eq!(percent_complete(0, 0), 0.0);
        assert_eq!(percent_complete(3, 6), 50.0);
        assert_eq!(percent_complete(6, 6), 100.0);
    }
}

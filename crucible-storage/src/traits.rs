//! Async storage traits consumed by the execution engine.

use async_trait::async_trait;
use crucible_core::{
    CrucibleResult, Document, DocumentId, Experiment, ExperimentId, ExperimentStatus, Run, RunId,
    SystemPrompt, SystemPromptId, Timestamp,
};

/// Update payload for experiments.
///
/// Only lifecycle fields are updatable; configuration is fixed once the
/// experiment leaves DRAFT.
#[derive(Debug, Clone, Default)]
pub struct ExperimentUpdate {
    pub status: Option<ExperimentStatus>,
    pub started_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
}

impl ExperimentUpdate {
    pub fn status(status: ExperimentStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

/// Experiment persistence.
#[async_trait]
pub trait ExperimentStore: Send + Sync {
    /// Insert a new experiment.
    async fn experiment_insert(&self, experiment: &Experiment) -> CrucibleResult<()>;

    /// Get an experiment by ID.
    async fn experiment_get(&self, id: ExperimentId) -> CrucibleResult<Option<Experiment>>;

    /// Apply a lifecycle update.
    async fn experiment_update(
        &self,
        id: ExperimentId,
        update: ExperimentUpdate,
    ) -> CrucibleResult<()>;

    /// List experiments in a given status.
    async fn experiment_list_by_status(
        &self,
        status: ExperimentStatus,
    ) -> CrucibleResult<Vec<Experiment>>;

    /// Delete an experiment and its runs.
    ///
    /// # Errors
    /// `StorageError::DeleteRefused` while the experiment is RUNNING.
    async fn experiment_delete(&self, id: ExperimentId) -> CrucibleResult<()>;
}

/// Run persistence.
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Insert all runs of a matrix at once. Either every row is created or none.
    async fn run_create_many(&self, runs: &[Run]) -> CrucibleResult<()>;

    /// Replace a stored run.
    async fn run_update(&self, run: &Run) -> CrucibleResult<()>;

    /// Get a run by ID.
    async fn run_get(&self, id: RunId) -> CrucibleResult<Option<Run>>;

    /// All runs of an experiment ordered by matrix sequence.
    async fn run_list_by_experiment(&self, experiment_id: ExperimentId) -> CrucibleResult<Vec<Run>>;

    /// Remove every run of an experiment. Returns how many were removed.
    async fn run_delete_by_experiment(&self, experiment_id: ExperimentId) -> CrucibleResult<usize>;
}

/// Read access to the prompt materials referenced by experiments.
#[async_trait]
pub trait PromptSource: Send + Sync {
    async fn system_prompt_get(&self, id: SystemPromptId) -> CrucibleResult<Option<SystemPrompt>>;

    async fn document_get(&self, id: DocumentId) -> CrucibleResult<Option<Document>>;
}

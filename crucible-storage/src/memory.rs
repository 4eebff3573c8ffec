//! In-memory storage backed by `RwLock<HashMap>` tables.

use crate::{ExperimentStore, ExperimentUpdate, PromptSource, RunStore};
use async_trait::async_trait;
use crucible_core::{
    CrucibleError, CrucibleResult, Document, DocumentId, EntityIdType, EntityType, Experiment,
    ExperimentId, ExperimentStatus, Run, RunId, StorageError, SystemPrompt, SystemPromptId,
};
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

fn read<T>(lock: &RwLock<T>) -> CrucibleResult<RwLockReadGuard<'_, T>> {
    lock.read()
        .map_err(|_| CrucibleError::Storage(StorageError::LockPoisoned))
}

fn write<T>(lock: &RwLock<T>) -> CrucibleResult<RwLockWriteGuard<'_, T>> {
    lock.write()
        .map_err(|_| CrucibleError::Storage(StorageError::LockPoisoned))
}

/// In-memory storage for tests and the single-process runner.
///
/// Cloning shares the underlying tables.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStorage {
    experiments: Arc<RwLock<HashMap<ExperimentId, Experiment>>>,
    runs: Arc<RwLock<HashMap<RunId, Run>>>,
    system_prompts: Arc<RwLock<HashMap<SystemPromptId, SystemPrompt>>>,
    documents: Arc<RwLock<HashMap<DocumentId, Document>>>,
}

impl InMemoryStorage {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a system prompt, replacing any previous version.
    pub fn system_prompt_insert(&self, prompt: SystemPrompt) -> CrucibleResult<()> {
        write(&*self.system_prompts)?.insert(prompt.system_prompt_id, prompt);
        Ok(())
    }

    /// Store a document, replacing any previous version.
    pub fn document_insert(&self, document: Document) -> CrucibleResult<()> {
        write(&*self.documents)?.insert(document.document_id, document);
        Ok(())
    }

    /// Get count of stored experiments.
    pub fn experiment_count(&self) -> CrucibleResult<usize> {
        Ok(read(&*self.experiments)?.len())
    }

    /// Get count of stored runs across all experiments.
    pub fn run_count(&self) -> CrucibleResult<usize> {
        Ok(read(&*self.runs)?.len())
    }
}

#[async_trait]
impl ExperimentStore for InMemoryStorage {
    async fn experiment_insert(&self, experiment: &Experiment) -> CrucibleResult<()> {
        let mut experiments = write(&*self.experiments)?;
        if experiments.contains_key(&experiment.experiment_id) {
            return Err(CrucibleError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Experiment,
                reason: "already exists".to_string(),
            }));
        }
        experiments.insert(experiment.experiment_id, experiment.clone());
        Ok(())
    }

    async fn experiment_get(&self, id: ExperimentId) -> CrucibleResult<Option<Experiment>> {
        Ok(read(&*self.experiments)?.get(&id).cloned())
    }

    async fn experiment_update(
        &self,
        id: ExperimentId,
        update: ExperimentUpdate,
    ) -> CrucibleResult<()> {
        let mut experiments = write(&*self.experiments)?;
        let experiment = experiments.get_mut(&id).ok_or(CrucibleError::Storage(
            StorageError::NotFound {
                entity_type: EntityType::Experiment,
                id: id.as_uuid(),
            },
        ))?;

        if let Some(status) = update.status {
            experiment.status = status;
        }
        if let Some(started_at) = update.started_at {
            experiment.started_at = Some(started_at);
        }
        if let Some(completed_at) = update.completed_at {
            experiment.completed_at = Some(completed_at);
        }
        experiment.updated_at = chrono::Utc::now();

        Ok(())
    }

    async fn experiment_list_by_status(
        &self,
        status: ExperimentStatus,
    ) -> CrucibleResult<Vec<Experiment>> {
        let experiments = read(&*self.experiments)?;
        let mut matching: Vec<Experiment> = experiments
            .values()
            .filter(|e| e.status == status)
            .cloned()
            .collect();
        matching.sort_by_key(|e| e.experiment_id);
        Ok(matching)
    }

    async fn experiment_delete(&self, id: ExperimentId) -> CrucibleResult<()> {
        let mut experiments = write(&*self.experiments)?;
        let status = experiments
            .get(&id)
            .map(|e| e.status)
            .ok_or(CrucibleError::Storage(StorageError::NotFound {
                entity_type: EntityType::Experiment,
                id: id.as_uuid(),
            }))?;

        if status == ExperimentStatus::Running {
            tracing::debug!(experiment_id = %id, "Refusing to delete running experiment");
            return Err(CrucibleError::Storage(StorageError::DeleteRefused {
                entity_type: EntityType::Experiment,
                id: id.as_uuid(),
                reason: "experiment is RUNNING".to_string(),
            }));
        }

        experiments.remove(&id);
        write(&*self.runs)?.retain(|_, run| run.experiment_id != id);
        Ok(())
    }
}

#[async_trait]
impl RunStore for InMemoryStorage {
    async fn run_create_many(&self, new_runs: &[Run]) -> CrucibleResult<()> {
        let mut runs = write(&*self.runs)?;
        if let Some(dup) = new_runs.iter().find(|r| runs.contains_key(&r.run_id)) {
            return Err(CrucibleError::Storage(StorageError::InsertFailed {
                entity_type: EntityType::Run,
                reason: format!("run {} already exists", dup.run_id),
            }));
        }
        for run in new_runs {
            runs.insert(run.run_id, run.clone());
        }
        Ok(())
    }

    async fn run_update(&self, run: &Run) -> CrucibleResult<()> {
        let mut runs = write(&*self.runs)?;
        let stored = runs.get_mut(&run.run_id).ok_or(CrucibleError::Storage(
            StorageError::NotFound {
                entity_type: EntityType::Run,
                id: run.run_id.as_uuid(),
            },
        ))?;
        *stored = run.clone();
        Ok(())
    }

    async fn run_get(&self, id: RunId) -> CrucibleResult<Option<Run>> {
        Ok(read(&*self.runs)?.get(&id).cloned())
    }

    async fn run_list_by_experiment(&self, experiment_id: ExperimentId) -> CrucibleResult<Vec<Run>> {
        let runs = read(&*self.runs)?;
        let mut matching: Vec<Run> = runs
            .values()
            .filter(|r| r.experiment_id == experiment_id)
            .cloned()
            .collect();
        matching.sort_by_key(|r| r.sequence);
        Ok(matching)
    }

    async fn run_delete_by_experiment(&self, experiment_id: ExperimentId) -> CrucibleResult<usize> {
        let mut runs = write(&*self.runs)?;
        let before = runs.len();
        runs.retain(|_, run| run.experiment_id != experiment_id);
        Ok(before - runs.len())
    }
}

#[async_trait]
impl PromptSource for InMemoryStorage {
    async fn system_prompt_get(&self, id: SystemPromptId) -> CrucibleResult<Option<SystemPrompt>> {
        Ok(read(&*self.system_prompts)?.get(&id).cloned())
    }

    async fn document_get(&self, id: DocumentId) -> CrucibleResult<Option<Document>> {
        Ok(read(&*self.documents)?.get(&id).cloned())
    }
}

// ============================================================================
// TESTS
// ============================================================================

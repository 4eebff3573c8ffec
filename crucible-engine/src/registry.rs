//! Execution registry: experiment ID to execution handle.
//!
//! Constructed once and shared by every controller operation. A handle stays
//! registered while its experiment is RUNNING or PAUSED and is removed when
//! the experiment reaches a terminal state.

use crate::ExecutionHandle;
use crucible_core::{EngineError, ExperimentId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Default)]
pub struct ExecutionRegistry {
    handles: Mutex<HashMap<ExperimentId, Arc<ExecutionHandle>>>,
}

impl ExecutionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ExperimentId, Arc<ExecutionHandle>>> {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `handle`, replacing a parked (inactive) handle.
    ///
    /// # Errors
    /// `EngineError::AlreadyRunning` if an active handle is registered for the
    /// same experiment.
    pub fn register(&self, handle: Arc<ExecutionHandle>) -> Result<(), EngineError> {
        let mut handles = self.lock();
        let experiment_id = handle.experiment_id();
        if let Some(existing) = handles.get(&experiment_id) {
            if existing.is_active() && !Arc::ptr_eq(existing, &handle) {
                return Err(EngineError::AlreadyRunning { experiment_id });
            }
        }
        handles.insert(experiment_id, handle);
        Ok(())
    }

    /// The registered handle, or a new one created by `create` and registered.
    pub fn get_or_insert_with<F>(&self, experiment_id: ExperimentId, create: F) -> Arc<ExecutionHandle>
    where
        F: FnOnce() -> ExecutionHandle,
    {
        self.lock()
            .entry(experiment_id)
            .or_insert_with(|| Arc::new(create()))
            .clone()
    }

    pub fn get(&self, experiment_id: ExperimentId) -> Option<Arc<ExecutionHandle>> {
        self.lock().get(&experiment_id).cloned()
    }

    /// Whether a loop currently executes the experiment.
    pub fn is_active(&self, experiment_id: ExperimentId) -> bool {
        self.get(experiment_id)
            .map(|handle| handle.is_active())
            .unwrap_or(false)
    }

    /// Remove `handle` if it is still the registered one.
    pub fn deregister(&self, handle: &Arc<ExecutionHandle>) -> bool {
        let mut handles = self.lock();
        let experiment_id = handle.experiment_id();
        match handles.get(&experiment_id) {
            Some(existing) if Arc::ptr_eq(existing, handle) => {
                handles.remove(&experiment_id);
                true
            }
            _ => false,
        }
    }

    /// IDs of experiments with an executing loop, sorted.
    pub fn active_experiments(&self) -> Vec<ExperimentId> {
        let mut ids: Vec<ExperimentId> = self
            .lock()
            .values()
            .filter(|handle| handle.is_active())
            .map(|handle| handle.experiment_id())
            .collect();
        ids.sort();
        ids
    }

    /// Number of registered handles, parked ones included.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

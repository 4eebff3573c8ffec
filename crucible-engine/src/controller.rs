//! Execution controller.
//!
//! Owns the lifecycle operations callers invoke and the background loop that
//! executes an experiment's trials one at a time.

use crate::context::{ContextResolver, PromptMaterials};
use crate::progress::{self, RunTally};
use crate::{ExecutionHandle, ExecutionRegistry, RunMatrix};
use chrono::Utc;
use crucible_core::{
    transition, CrucibleResult, EngineConfig, EngineError, Experiment, ExperimentId,
    ExperimentProgress, ExperimentStatus, GenerationOutput, GenerationRequest, LifecycleEvent, Run,
    RunStatus, TrialSpec, CANCELLED_MESSAGE,
};
use crucible_events::{ProgressPublisher, ProgressSink};
use crucible_llm::{GenerationGateway, RetrievalGateway, RetryPolicy};
use crucible_storage::{ExperimentStore, ExperimentUpdate, PromptSource, RunStore};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::Instrument;

/// Error message recorded on runs left RUNNING by a loop that no longer exists.
pub const INTERRUPTED_MESSAGE: &str = "interrupted before completion";

/// Error event code for faults inside the execution loop.
pub const INTERNAL_FAULT_CODE: &str = "INTERNAL_FAULT";

/// How long `resume_experiment` waits for a parking loop to release its handle.
const PARK_GRACE: Duration = Duration::from_secs(1);

/// Everything the engine needs, wired by the caller.
pub struct EngineParts {
    pub experiments: Arc<dyn ExperimentStore>,
    pub runs: Arc<dyn RunStore>,
    pub prompts: Arc<dyn PromptSource>,
    pub generation: Arc<dyn GenerationGateway>,
    pub retrieval: Arc<dyn RetrievalGateway>,
    pub sink: Arc<dyn ProgressSink>,
    pub registry: Arc<ExecutionRegistry>,
    pub config: EngineConfig,
}

struct EngineInner {
    experiments: Arc<dyn ExperimentStore>,
    runs: Arc<dyn RunStore>,
    prompts: Arc<dyn PromptSource>,
    generation: Arc<dyn GenerationGateway>,
    retrieval: Arc<dyn RetrievalGateway>,
    publisher: ProgressPublisher,
    registry: Arc<ExecutionRegistry>,
    retry: RetryPolicy,
    config: EngineConfig,
}

/// Starts, pauses, resumes and cancels experiments.
///
/// Cloning is cheap; clones share the registry and stores.
#[derive(Clone)]
pub struct ExperimentEngine {
    inner: Arc<EngineInner>,
}

impl std::fmt::Debug for ExperimentEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExperimentEngine")
            .field("provider", &self.inner.generation.provider_name())
            .field("active", &self.inner.registry.active_experiments())
            .finish_non_exhaustive()
    }
}

impl ExperimentEngine {
    pub fn new(parts: EngineParts) -> Self {
        Self {
            inner: Arc::new(EngineInner {
                experiments: parts.experiments,
                runs: parts.runs,
                prompts: parts.prompts,
                generation: parts.generation,
                retrieval: parts.retrieval,
                publisher: ProgressPublisher::new(parts.sink),
                registry: parts.registry,
                retry: RetryPolicy::new(parts.config.retry.clone()),
                config: parts.config,
            }),
        }
    }

    /// Engine over a single storage backend and a fresh registry.
    pub fn with_storage<S>(
        storage: Arc<S>,
        generation: Arc<dyn GenerationGateway>,
        retrieval: Arc<dyn RetrievalGateway>,
        sink: Arc<dyn ProgressSink>,
        config: EngineConfig,
    ) -> Self
    where
        S: ExperimentStore + RunStore + PromptSource + 'static,
    {
        Self::new(EngineParts {
            experiments: storage.clone(),
            runs: storage.clone(),
            prompts: storage,
            generation,
            retrieval,
            sink,
            registry: Arc::new(ExecutionRegistry::new()),
            config,
        })
    }

    pub fn registry(&self) -> &Arc<ExecutionRegistry> {
        &self.inner.registry
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Whether a loop currently executes the experiment.
    pub fn is_executing(&self, experiment_id: ExperimentId) -> bool {
        self.inner.registry.is_active(experiment_id)
    }

    pub fn active_experiments(&self) -> Vec<ExperimentId> {
        self.inner.registry.active_experiments()
    }

    // ========================================================================
    // LIFECYCLE OPERATIONS
    // ========================================================================

    /// Create the experiment's runs, mark it RUNNING and start executing in
    /// the background. Returns the number of runs created.
    ///
    /// # Errors
    /// * `EngineError::NotFound` - unknown experiment
    /// * `EngineError::AlreadyRunning` - a loop already executes it
    /// * `EngineError::InvalidStateTransition` - the experiment is not DRAFT
    /// * `EngineError::InvalidConfiguration` - the run matrix cannot be built
    pub async fn start_experiment(&self, experiment_id: ExperimentId) -> CrucibleResult<u32> {
        let inner = &self.inner;
        let experiment = inner.load_experiment(experiment_id).await?;
        if inner.registry.is_active(experiment_id) {
            return Err(EngineError::AlreadyRunning { experiment_id }.into());
        }
        transition(experiment.status, LifecycleEvent::Start)?;
        let matrix = RunMatrix::build(&experiment.config)?;
        let total_runs = matrix.total_runs();

        let handle = Arc::new(ExecutionHandle::activated(experiment_id, total_runs));
        inner.registry.register(handle.clone())?;

        if let Err(e) = inner.begin(&experiment, matrix, &handle).await {
            inner.release(&handle);
            return Err(e);
        }

        tracing::info!(
            experiment_id = %experiment_id,
            name = %experiment.name,
            total_runs,
            "Experiment started"
        );
        self.spawn_execution(handle);
        Ok(total_runs)
    }

    /// Ask the loop to stop after the in-flight trial.
    ///
    /// # Errors
    /// `EngineError::NotRunning` unless the experiment is RUNNING with an
    /// executing loop.
    pub async fn pause_experiment(&self, experiment_id: ExperimentId) -> CrucibleResult<()> {
        let experiment = self.inner.load_experiment(experiment_id).await?;
        let handle = self
            .inner
            .registry
            .get(experiment_id)
            .filter(|handle| handle.is_active());
        match handle {
            Some(handle) if experiment.status == ExperimentStatus::Running => {
                handle.request_pause();
                tracing::info!(experiment_id = %experiment_id, "Pause requested");
                Ok(())
            }
            _ => Err(EngineError::NotRunning {
                experiment_id,
                status: experiment.status,
            }
            .into()),
        }
    }

    /// Continue a PAUSED experiment from its first PENDING run.
    ///
    /// # Errors
    /// * `EngineError::InvalidStateTransition` - the experiment is not PAUSED
    /// * `EngineError::AlreadyRunning` - the previous loop did not finish
    ///   parking within a short grace period
    pub async fn resume_experiment(&self, experiment_id: ExperimentId) -> CrucibleResult<()> {
        let inner = &self.inner;
        let experiment = inner.load_experiment(experiment_id).await?;
        transition(experiment.status, LifecycleEvent::Resume)?;

        let runs = inner.runs.run_list_by_experiment(experiment_id).await?;
        let total_runs = runs.len() as u32;
        let handle = inner
            .registry
            .get_or_insert_with(experiment_id, || ExecutionHandle::new(experiment_id, total_runs));
        // A parking loop persists PAUSED shortly before it lets go of the handle.
        let claimed = handle.try_activate()
            || (handle.wait_inactive(PARK_GRACE).await && handle.try_activate());
        if !claimed {
            return Err(EngineError::AlreadyRunning { experiment_id }.into());
        }

        handle.clear_pause();
        if let Err(e) = inner.mark_resumed(experiment_id).await {
            handle.deactivate();
            return Err(e);
        }

        let tally = RunTally::from_runs(&runs);
        tracing::info!(
            experiment_id = %experiment_id,
            next_index = handle.next_index(),
            remaining_runs = tally.remaining(),
            "Experiment resumed"
        );
        self.spawn_execution(handle);
        Ok(())
    }

    /// Stop the experiment and fail its remaining runs.
    ///
    /// A running loop honors the signal after its in-flight trial; a paused
    /// experiment is cancelled before this returns.
    ///
    /// # Errors
    /// `EngineError::InvalidStateTransition` unless RUNNING or PAUSED.
    pub async fn cancel_experiment(&self, experiment_id: ExperimentId) -> CrucibleResult<()> {
        let inner = &self.inner;
        let experiment = inner.load_experiment(experiment_id).await?;
        transition(experiment.status, LifecycleEvent::Cancel)?;

        let handle = inner
            .registry
            .get_or_insert_with(experiment_id, || ExecutionHandle::new(experiment_id, 0));
        handle.cancel();
        tracing::info!(experiment_id = %experiment_id, status = %experiment.status, "Cancel requested");

        if handle.try_activate() {
            if let Err(e) = inner.cancel_parked(&handle).await {
                handle.deactivate();
                return Err(e);
            }
        }
        Ok(())
    }

    /// Current counts, percentage, in-flight run and time estimate.
    pub async fn get_progress(&self, experiment_id: ExperimentId) -> CrucibleResult<ExperimentProgress> {
        let inner = &self.inner;
        let experiment = inner.load_experiment(experiment_id).await?;
        let runs = inner.runs.run_list_by_experiment(experiment_id).await?;
        let handle = inner.registry.get(experiment_id);
        Ok(progress::snapshot(
            experiment_id,
            experiment.status,
            &runs,
            handle.as_deref(),
        ))
    }

    // ========================================================================
    // BACKGROUND EXECUTION
    // ========================================================================

    fn spawn_execution(&self, handle: Arc<ExecutionHandle>) {
        let inner = self.inner.clone();
        let experiment_id = handle.experiment_id();
        let span = tracing::info_span!("experiment", experiment_id = %experiment_id);
        tokio::spawn(
            async move {
                let outcome = AssertUnwindSafe(inner.execute(&handle))
                    .catch_unwind()
                    .await;
                let message = match outcome {
                    Ok(Ok(())) => return,
                    Ok(Err(e)) => e.to_string(),
                    Err(payload) => panic_message(payload),
                };
                inner.contain_fault(&handle, &message).await;
            }
            .instrument(span),
        );
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    let detail = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    format!("execution loop panicked: {}", detail)
}

impl EngineInner {
    async fn load_experiment(&self, experiment_id: ExperimentId) -> CrucibleResult<Experiment> {
        self.experiments
            .experiment_get(experiment_id)
            .await?
            .ok_or_else(|| EngineError::experiment_not_found(experiment_id).into())
    }

    /// Persist the PENDING rows and the RUNNING status for a start.
    async fn begin(
        &self,
        experiment: &Experiment,
        matrix: RunMatrix,
        handle: &ExecutionHandle,
    ) -> CrucibleResult<()> {
        let experiment_id = experiment.experiment_id;
        // A start that lost a race against an earlier one sees a non-DRAFT row here.
        let current = self.load_experiment(experiment_id).await?;
        let next = transition(current.status, LifecycleEvent::Start)?;

        // Rows of a DRAFT experiment can only come from a start that failed
        // midway; the matrix is rebuilt from scratch.
        let stale = self.runs.run_delete_by_experiment(experiment_id).await?;
        if stale > 0 {
            tracing::warn!(
                experiment_id = %experiment_id,
                stale_runs = stale,
                "Discarded runs left by an earlier failed start"
            );
        }

        let runs: Vec<Run> = matrix
            .trials()
            .iter()
            .map(|trial| Run::pending(experiment_id, trial))
            .collect();
        self.runs.run_create_many(&runs).await?;
        handle.set_next_index(0);

        let marked = self
            .experiments
            .experiment_update(
                experiment_id,
                ExperimentUpdate {
                    status: Some(next),
                    started_at: Some(Utc::now()),
                    completed_at: None,
                },
            )
            .await;
        if marked.is_err() {
            if let Err(e) = self.runs.run_delete_by_experiment(experiment_id).await {
                tracing::error!(
                    experiment_id = %experiment_id,
                    error = %e,
                    "Failed to remove runs of an aborted start"
                );
            }
        }
        marked
    }

    /// Re-check PAUSED under the handle's activation and persist RUNNING.
    async fn mark_resumed(&self, experiment_id: ExperimentId) -> CrucibleResult<()> {
        let current = self.load_experiment(experiment_id).await?;
        let next = transition(current.status, LifecycleEvent::Resume)?;
        self.experiments
            .experiment_update(experiment_id, ExperimentUpdate::status(next))
            .await
    }

    fn release(&self, handle: &Arc<ExecutionHandle>) {
        self.registry.deregister(handle);
        handle.deactivate();
    }

    /// Execute PENDING runs in sequence order until none remain or a signal
    /// stops the loop.
    async fn execute(&self, handle: &Arc<ExecutionHandle>) -> CrucibleResult<()> {
        let experiment_id = handle.experiment_id();
        let experiment = self.load_experiment(experiment_id).await?;
        let matrix = RunMatrix::build(&experiment.config)?;
        let materials = PromptMaterials::resolve(self.prompts.as_ref(), &experiment.config).await?;
        let resolver = ContextResolver::new(
            self.retrieval.as_ref(),
            &self.retry,
            self.config.default_retrieval_top_k,
        );

        let mut runs = self.runs.run_list_by_experiment(experiment_id).await?;
        for run in runs.iter_mut().filter(|run| run.status == RunStatus::Running) {
            tracing::warn!(run_id = %run.run_id, "Failing run left RUNNING by a previous loop");
            run.mark_failed(INTERRUPTED_MESSAGE, None)?;
            self.runs.run_update(run).await?;
        }

        let mut cursor = 0;
        loop {
            if handle.is_cancelled() {
                return self
                    .apply_cancel(handle, &experiment, ExperimentStatus::Running, &mut runs)
                    .await;
            }
            while cursor < runs.len() && runs[cursor].status != RunStatus::Pending {
                cursor += 1;
            }
            if cursor == runs.len() {
                return self.complete(handle, &experiment, &runs).await;
            }
            if handle.is_pause_requested() {
                return self.park(handle, &experiment, &runs).await;
            }

            let sequence = runs[cursor].sequence;
            handle.set_next_index(sequence);
            let trial = matrix.trials().get(sequence as usize).ok_or_else(|| {
                EngineError::invalid_configuration(format!(
                    "run sequence {} is outside the run matrix of {} trials",
                    sequence,
                    matrix.total_runs()
                ))
            })?;

            let run = &mut runs[cursor];
            run.mark_running()?;
            self.runs.run_update(run).await?;
            self.publisher.run_started(run);
            tracing::debug!(
                run_id = %run.run_id,
                model = %run.model,
                iteration = run.iteration,
                sequence,
                "Run started"
            );

            let started = Instant::now();
            let outcome = self
                .generate(&resolver, trial, &experiment, &materials, run, handle)
                .await;
            let elapsed_ms = started.elapsed().as_millis() as i64;
            handle.record_duration(elapsed_ms);

            match outcome {
                Ok(output) => run.mark_succeeded(output)?,
                Err((code, message)) => {
                    tracing::warn!(
                        run_id = %run.run_id,
                        model = %run.model,
                        code,
                        error = %message,
                        "Run failed"
                    );
                    self.publisher.error(experiment_id, code, message.clone(), true);
                    run.mark_failed(message, Some(elapsed_ms))?;
                }
            }
            self.runs.run_update(run).await?;
            self.publisher.run_completed(run);
            handle.set_next_index(sequence + 1);

            let snapshot = progress::snapshot(
                experiment_id,
                ExperimentStatus::Running,
                &runs,
                Some(handle),
            );
            self.publisher.progress(&snapshot);
        }
    }

    /// Build the prompt and call the generation gateway. Failures come back
    /// as an event code and the message recorded on the run.
    async fn generate(
        &self,
        resolver: &ContextResolver<'_>,
        trial: &TrialSpec,
        experiment: &Experiment,
        materials: &PromptMaterials,
        run: &mut Run,
        handle: &ExecutionHandle,
    ) -> Result<GenerationOutput, (&'static str, String)> {
        let rendered = resolver
            .render(trial, &experiment.config.prompt, materials)
            .await
            .map_err(|e| (e.code(), e.to_string()))?;
        run.retrieved_context = rendered.context;

        let request = GenerationRequest::new(run.model.clone(), rendered.prompt)
            .with_system_prompt(rendered.system_prompt)
            .with_hyperparameters(run.hyperparameters.clone());
        self.retry
            .execute_cancellable("generate", handle.cancellation_token(), || {
                self.generation.generate(&request)
            })
            .await
            .map_err(|e| (e.code(), e.to_string()))
    }

    // ========================================================================
    // TERMINATION PATHS
    // ========================================================================

    async fn complete(
        &self,
        handle: &Arc<ExecutionHandle>,
        experiment: &Experiment,
        runs: &[Run],
    ) -> CrucibleResult<()> {
        let experiment_id = experiment.experiment_id;
        let status = transition(ExperimentStatus::Running, LifecycleEvent::Complete)?;
        self.experiments
            .experiment_update(experiment_id, finished(status))
            .await?;

        let snapshot = progress::snapshot(experiment_id, status, runs, Some(handle));
        let elapsed = progress::elapsed_since_start(experiment);
        tracing::info!(
            experiment_id = %experiment_id,
            total_runs = snapshot.total_runs,
            failed_runs = snapshot.failed_runs,
            duration_ms = elapsed,
            "Experiment completed"
        );
        self.publisher
            .experiment_completed(experiment_id, status, &snapshot, elapsed);
        self.release(handle);
        Ok(())
    }

    /// Stop without touching PENDING runs and leave the handle parked.
    async fn park(
        &self,
        handle: &Arc<ExecutionHandle>,
        experiment: &Experiment,
        runs: &[Run],
    ) -> CrucibleResult<()> {
        let experiment_id = experiment.experiment_id;
        let status = transition(ExperimentStatus::Running, LifecycleEvent::Pause)?;
        self.experiments
            .experiment_update(experiment_id, ExperimentUpdate::status(status))
            .await?;

        let tally = RunTally::from_runs(runs);
        tracing::info!(
            experiment_id = %experiment_id,
            completed_runs = tally.completed(),
            remaining_runs = tally.remaining(),
            next_index = handle.next_index(),
            "Experiment paused"
        );
        self.publisher
            .experiment_paused(experiment_id, tally.completed(), tally.remaining());
        handle.deactivate();

        // A cancel that arrived while parking could not claim the handle.
        if handle.is_cancelled() && handle.try_activate() {
            return self.cancel_parked(handle).await;
        }
        Ok(())
    }

    /// Cancel an experiment that has no executing loop. The caller holds the
    /// handle's activation. Already-terminal experiments are left untouched.
    async fn cancel_parked(&self, handle: &Arc<ExecutionHandle>) -> CrucibleResult<()> {
        let experiment = self.load_experiment(handle.experiment_id()).await?;
        if experiment.status.is_terminal() {
            self.release(handle);
            return Ok(());
        }
        let mut runs = self
            .runs
            .run_list_by_experiment(experiment.experiment_id)
            .await?;
        for run in runs.iter_mut().filter(|run| run.status == RunStatus::Running) {
            run.mark_failed(INTERRUPTED_MESSAGE, None)?;
            self.runs.run_update(run).await?;
        }
        let from = experiment.status;
        self.apply_cancel(handle, &experiment, from, &mut runs).await
    }

    async fn apply_cancel(
        &self,
        handle: &Arc<ExecutionHandle>,
        experiment: &Experiment,
        from: ExperimentStatus,
        runs: &mut [Run],
    ) -> CrucibleResult<()> {
        let experiment_id = experiment.experiment_id;
        let status = transition(from, LifecycleEvent::Cancel)?;

        let mut cancelled: u32 = 0;
        for run in runs.iter_mut().filter(|run| run.status == RunStatus::Pending) {
            run.mark_failed(CANCELLED_MESSAGE, None)?;
            self.runs.run_update(run).await?;
            cancelled += 1;
        }
        self.experiments
            .experiment_update(experiment_id, finished(status))
            .await?;

        let snapshot = progress::snapshot(experiment_id, status, runs, Some(handle));
        let elapsed = progress::elapsed_since_start(experiment);
        tracing::info!(
            experiment_id = %experiment_id,
            cancelled_runs = cancelled,
            "Experiment cancelled"
        );
        self.publisher
            .experiment_completed(experiment_id, status, &snapshot, elapsed);
        self.release(handle);
        Ok(())
    }

    /// Record an internal fault: FAILED experiment, failed unfinished runs,
    /// handle removed.
    async fn contain_fault(&self, handle: &Arc<ExecutionHandle>, message: &str) {
        let experiment_id = handle.experiment_id();
        tracing::error!(experiment_id = %experiment_id, error = %message, "Execution loop failed");
        self.publisher
            .error(experiment_id, INTERNAL_FAULT_CODE, message, false);

        if let Err(e) = self.fail_unfinished(experiment_id, handle, message).await {
            tracing::error!(
                experiment_id = %experiment_id,
                error = %e,
                "Failed to record internal fault"
            );
        }
        self.release(handle);
    }

    async fn fail_unfinished(
        &self,
        experiment_id: ExperimentId,
        handle: &ExecutionHandle,
        message: &str,
    ) -> CrucibleResult<()> {
        let experiment = self.load_experiment(experiment_id).await?;
        if experiment.status.is_terminal() {
            return Ok(());
        }
        let mut runs = self.runs.run_list_by_experiment(experiment_id).await?;
        for run in runs
            .iter_mut()
            .filter(|run| matches!(run.status, RunStatus::Pending | RunStatus::Running))
        {
            run.mark_failed(message, None)?;
            self.runs.run_update(run).await?;
        }
        let status = transition(experiment.status, LifecycleEvent::Abort)?;
        self.experiments
            .experiment_update(experiment_id, finished(status))
            .await?;

        let snapshot = progress::snapshot(experiment_id, status, &runs, Some(handle));
        self.publisher.experiment_completed(
            experiment_id,
            status,
            &snapshot,
            progress::elapsed_since_start(&experiment),
        );
        Ok(())
    }
}

fn finished(status: ExperimentStatus) -> ExperimentUpdate {
    ExperimentUpdate {
        status: Some(status),
        started_at: None,
        completed_at: Some(Utc::now()),
    }
}

//! Best-effort publisher used by the execution loop.

use crate::{EventPayload, ProgressEvent, ProgressSink};
use crucible_core::{
    DurationMs, ExperimentId, ExperimentProgress, ExperimentStatus, Run,
};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Wraps a sink so publishing can never fail or abort the caller.
///
/// Sink errors and sink panics are logged at warn and dropped.
#[derive(Clone)]
pub struct ProgressPublisher {
    sink: Arc<dyn ProgressSink>,
}

impl ProgressPublisher {
    pub fn new(sink: Arc<dyn ProgressSink>) -> Self {
        Self { sink }
    }

    /// Tag `payload` with the experiment and current time and forward it.
    pub fn emit(&self, experiment_id: ExperimentId, payload: EventPayload) {
        let event = ProgressEvent::new(experiment_id, payload);
        let kind = event.kind();
        match catch_unwind(AssertUnwindSafe(|| self.sink.publish(&event))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                tracing::warn!(
                    experiment_id = %experiment_id,
                    event_type = kind.as_str(),
                    error = %e,
                    "Failed to publish progress event"
                );
            }
            Err(_) => {
                tracing::warn!(
                    experiment_id = %experiment_id,
                    event_type = kind.as_str(),
                    "Progress sink panicked while publishing"
                );
            }
        }
    }

    pub fn progress(&self, progress: &ExperimentProgress) {
        self.emit(progress.experiment_id, EventPayload::progress(progress));
    }

    pub fn run_started(&self, run: &Run) {
        self.emit(run.experiment_id, EventPayload::run_started(run));
    }

    pub fn run_completed(&self, run: &Run) {
        self.emit(run.experiment_id, EventPayload::run_completed(run));
    }

    pub fn experiment_completed(
        &self,
        experiment_id: ExperimentId,
        final_status: ExperimentStatus,
        progress: &ExperimentProgress,
        total_duration_ms: DurationMs,
    ) {
        self.emit(
            experiment_id,
            EventPayload::ExperimentCompleted {
                final_status,
                total_runs: progress.total_runs,
                completed_runs: progress.completed_runs,
                failed_runs: progress.failed_runs,
                total_duration_ms,
            },
        );
    }

    pub fn experiment_paused(&self, experiment_id: ExperimentId, completed: u32, remaining: u32) {
        self.emit(
            experiment_id,
            EventPayload::ExperimentPaused {
                completed_runs: completed,
                remaining_runs: remaining,
            },
        );
    }

    pub fn error(
        &self,
        experiment_id: ExperimentId,
        code: impl Into<String>,
        message: impl Into<String>,
        recoverable: bool,
    ) {
        self.emit(
            experiment_id,
            EventPayload::Error {
                code: code.into(),
                message: message.into(),
                recoverable,
            },
        );
    }
}

impl std::fmt::Debug for ProgressPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressPublisher").finish_non_exhaustive()
    }
}

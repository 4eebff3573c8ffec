//! Progress event types
//!
//! Every event the execution loop emits is one of six kinds, tagged with the
//! experiment it belongs to and the time it was produced.

use crucible_core::{
    DurationMs, ExperimentId, ExperimentProgress, ExperimentStatus, Run, RunId, RunStatus,
    Timestamp,
};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Event type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum ProgressEventKind {
    Progress,
    RunStarted,
    RunCompleted,
    ExperimentCompleted,
    ExperimentPaused,
    Error,
}

impl ProgressEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressEventKind::Progress => "progress",
            ProgressEventKind::RunStarted => "run_started",
            ProgressEventKind::RunCompleted => "run_completed",
            ProgressEventKind::ExperimentCompleted => "experiment_completed",
            ProgressEventKind::ExperimentPaused => "experiment_paused",
            ProgressEventKind::Error => "error",
        }
    }
}

impl fmt::Display for ProgressEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event body, one variant per kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub enum EventPayload {
    // ========================================================================
    // PROGRESS
    // ========================================================================
    /// Snapshot emitted after every processed run.
    Progress {
        total_runs: u32,
        completed_runs: u32,
        failed_runs: u32,
        percent_complete: f64,
        #[cfg_attr(feature = "openapi", schema(value_type = Option<String>, format = "uuid"))]
        current_run_id: Option<RunId>,
        estimated_time_remaining_ms: Option<DurationMs>,
    },

    // ========================================================================
    // RUN EVENTS
    // ========================================================================
    RunStarted {
        #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
        run_id: RunId,
        model: String,
        iteration: u32,
        embedding_model: Option<String>,
    },

    RunCompleted {
        #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
        run_id: RunId,
        status: RunStatus,
        duration_ms: Option<DurationMs>,
        tokens_per_second: Option<f64>,
        error: Option<String>,
    },

    // ========================================================================
    // EXPERIMENT EVENTS
    // ========================================================================
    /// Terminal event. Nothing is published for the experiment afterwards.
    ExperimentCompleted {
        final_status: ExperimentStatus,
        total_runs: u32,
        completed_runs: u32,
        failed_runs: u32,
        total_duration_ms: DurationMs,
    },

    ExperimentPaused {
        completed_runs: u32,
        remaining_runs: u32,
    },

    Error {
        code: String,
        message: String,
        recoverable: bool,
    },
}

impl EventPayload {
    pub fn kind(&self) -> ProgressEventKind {
        match self {
            EventPayload::Progress { .. } => ProgressEventKind::Progress,
            EventPayload::RunStarted { .. } => ProgressEventKind::RunStarted,
            EventPayload::RunCompleted { .. } => ProgressEventKind::RunCompleted,
            EventPayload::ExperimentCompleted { .. } => ProgressEventKind::ExperimentCompleted,
            EventPayload::ExperimentPaused { .. } => ProgressEventKind::ExperimentPaused,
            EventPayload::Error { .. } => ProgressEventKind::Error,
        }
    }

    pub fn progress(progress: &ExperimentProgress) -> Self {
        EventPayload::Progress {
            total_runs: progress.total_runs,
            completed_runs: progress.completed_runs,
            failed_runs: progress.failed_runs,
            percent_complete: progress.percent_complete,
            current_run_id: progress.current_run_id,
            estimated_time_remaining_ms: progress.estimated_time_remaining_ms,
        }
    }

    pub fn run_started(run: &Run) -> Self {
        EventPayload::RunStarted {
            run_id: run.run_id,
            model: run.model.clone(),
            iteration: run.iteration,
            embedding_model: run.embedding_model.clone(),
        }
    }

    pub fn run_completed(run: &Run) -> Self {
        EventPayload::RunCompleted {
            run_id: run.run_id,
            status: run.status,
            duration_ms: run.duration_ms,
            tokens_per_second: run.tokens_per_second,
            error: run.error_message.clone(),
        }
    }

    /// Whether this is the last event of an execution.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventPayload::ExperimentCompleted { .. })
    }
}

/// An event tagged with its experiment and timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ProgressEvent {
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "uuid"))]
    pub experiment_id: ExperimentId,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub timestamp: Timestamp,
    pub payload: EventPayload,
}

impl ProgressEvent {
    pub fn new(experiment_id: ExperimentId, payload: EventPayload) -> Self {
        Self {
            experiment_id,
            timestamp: chrono::Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> ProgressEventKind {
        self.payload.kind()
    }

    /// Publish-to-topic name for transports that route by topic.
    pub fn topic(&self) -> String {
        topic_for(self.experiment_id)
    }
}

/// Topic carrying an experiment's events.
pub fn topic_for(experiment_id: ExperimentId) -> String {
    format!("experiment:{}", experiment_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_serializes_with_type_tag() {
        let event = ProgressEvent::new(
            ExperimentId::nil(),
            EventPayload::ExperimentPaused {
                completed_runs: 2,
                remaining_runs: 4,
            },
        );
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["payload"]["type"], "experiment_paused");
        assert_eq!(json["payload"]["remaining_runs"], 4);
        assert_eq!(event.kind(), ProgressEventKind::ExperimentPaused);
    }

    #[test]
    fn test_topic_names_experiment() {
        let id = ExperimentId::nil();
        let event = ProgressEvent::new(
            id,
            EventPayload::Error {
                code: "X".to_string(),
                message: "m".to_string(),
                recoverable: false,
            },
        );
        assert_eq!(event.topic(), format!("experiment:{}", id));
    }

    #[test]
    fn test_only_completion_is_terminal() {
        let completed = EventPayload::ExperimentCompleted {
            final_status: ExperimentStatus::Failed,
            total_runs: 3,
            completed_runs: 3,
            failed_runs: 3,
            total_duration_ms: 10,
        };
        assert!(completed.is_terminal());
        let paused = EventPayload::ExperimentPaused {
            completed_runs: 0,
            remaining_runs: 3,
        };
        assert!(!paused.is_terminal());
    }
}

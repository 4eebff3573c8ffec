//! Progress snapshots computed from stored runs.

use crate::ExecutionHandle;
use crucible_core::{
    percent_complete, Experiment, ExperimentId, ExperimentProgress, ExperimentStatus, Run, RunId,
    RunStatus,
};

/// Run counts by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunTally {
    pub total: u32,
    pub pending: u32,
    pub running: u32,
    pub succeeded: u32,
    pub failed: u32,
}

impl RunTally {
    pub fn from_runs(runs: &[Run]) -> Self {
        runs.iter().fold(Self::default(), |mut tally, run| {
            tally.record(run.status);
            tally
        })
    }

    fn record(&mut self, status: RunStatus) {
        self.total += 1;
        match status {
            RunStatus::Pending => self.pending += 1,
            RunStatus::Running => self.running += 1,
            RunStatus::Success => self.succeeded += 1,
            RunStatus::Failed => self.failed += 1,
        }
    }

    /// Runs in a terminal state.
    pub fn completed(&self) -> u32 {
        self.succeeded + self.failed
    }

    pub fn remaining(&self) -> u32 {
        self.total - self.completed()
    }
}

/// Snapshot used by `get_progress` and the per-trial progress event.
pub fn snapshot(
    experiment_id: ExperimentId,
    status: ExperimentStatus,
    runs: &[Run],
    handle: Option<&ExecutionHandle>,
) -> ExperimentProgress {
    let tally = RunTally::from_runs(runs);
    let current_run_id: Option<RunId> = runs
        .iter()
        .find(|run| run.status == RunStatus::Running)
        .map(|run| run.run_id);
    let estimated_time_remaining_ms = if status.is_terminal() {
        Some(0)
    } else {
        handle.and_then(|h| h.estimate_remaining_ms(tally.remaining()))
    };

    ExperimentProgress {
        experiment_id,
        status,
        total_runs: tally.total,
        completed_runs: tally.completed(),
        failed_runs: tally.failed,
        percent_complete: percent_complete(tally.completed(), tally.total),
        current_run_id,
        estimated_time_remaining_ms,
    }
}

/// Milliseconds between the experiment's start and now.
pub fn elapsed_since_start(experiment: &Experiment) -> i64 {
    experiment
        .started_at
        .map(|started| (chrono::Utc::now() - started).num_milliseconds().max(0))
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crucible_core::{Hyperparameters, ContextMode, TrialSpec};

    fn runs(statuses: &[RunStatus]) -> Vec<Run> {
        statuses
            .iter()
            .enumerate()
            .map(|(i, status)| {
                let trial = TrialSpec {
                    sequence: i as u32,
                    model: "m".to_string(),
                    embedding_model: None,
                    iteration: i as u32 + 1,
                    hyperparameters: Hyperparameters::default(),
                    context_mode: ContextMode::None,
                    document_id: None,
                    system_prompt_id: None,
                    retrieval_top_k: None,
                };
                let mut run = Run::pending(ExperimentId::nil(), &trial);
                run.status = *status;
                run
            })
            .collect()
    }

    #[test]
    fn test_tally_counts() {
        let tally = RunTally::from_runs(&runs(&[
            RunStatus::Success,
            RunStatus::Failed,
            RunStatus::Running,
            RunStatus::Pending,
        ]));
        assert_eq!(tally.total, 4);
        assert_eq!(tally.completed(), 2);
        assert_eq!(tally.remaining(), 2);
    }

    #[test]
    fn test_snapshot_reports_current_run_and_eta() {
        let runs = runs(&[RunStatus::Success, RunStatus::Running, RunStatus::Pending]);
        let handle = ExecutionHandle::new(ExperimentId::nil(), 3);
        handle.record_duration(50);

        let progress = snapshot(ExperimentId::nil(), ExperimentStatus::Running, &runs, Some(&handle));

        assert_eq!(progress.completed_runs, 1);
        assert_eq!(progress.current_run_id, Some(runs[1].run_id));
        assert_eq!(progress.estimated_time_remaining_ms, Some(100));
        assert!((progress.percent_complete - 100.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_without_handle_has_no_eta() {
        let runs = runs(&[RunStatus::Pending, RunStatus::Pending]);
        let progress = snapshot(ExperimentId::nil(), ExperimentStatus::Paused, &runs, None);
        assert_eq!(progress.estimated_time_remaining_ms, None);
        assert_eq!(progress.percent_complete, 0.0);
    }
}

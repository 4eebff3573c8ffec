//! In-memory control block of one experiment's execution.

use crucible_core::{DurationMs, ExperimentId};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default, Clone, Copy)]
struct TimingStats {
    observed_runs: u32,
    total_ms: DurationMs,
}

/// Signals and bookkeeping shared between the controller operations and the
/// execution loop of one experiment.
///
/// `active` is held by whoever is allowed to write the experiment's runs:
/// the loop while it executes, or a synchronous cancel when no loop runs.
#[derive(Debug)]
pub struct ExecutionHandle {
    experiment_id: ExperimentId,
    total_runs: u32,
    cancel: CancellationToken,
    pause_requested: AtomicBool,
    active: AtomicBool,
    released: Notify,
    next_index: AtomicU32,
    timing: Mutex<TimingStats>,
}

impl ExecutionHandle {
    pub fn new(experiment_id: ExperimentId, total_runs: u32) -> Self {
        Self {
            experiment_id,
            total_runs,
            cancel: CancellationToken::new(),
            pause_requested: AtomicBool::new(false),
            active: AtomicBool::new(false),
            released: Notify::new(),
            next_index: AtomicU32::new(0),
            timing: Mutex::new(TimingStats::default()),
        }
    }

    /// A handle whose activation is already held by the caller.
    pub fn activated(experiment_id: ExperimentId, total_runs: u32) -> Self {
        let handle = Self::new(experiment_id, total_runs);
        handle.active.store(true, Ordering::Release);
        handle
    }

    pub fn experiment_id(&self) -> ExperimentId {
        self.experiment_id
    }

    pub fn total_runs(&self) -> u32 {
        self.total_runs
    }

    // ========================================================================
    // OWNERSHIP
    // ========================================================================

    /// Claim the right to execute. Fails if someone already holds it.
    pub fn try_activate(&self) -> bool {
        self.active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn deactivate(&self) {
        self.active.store(false, Ordering::Release);
        self.released.notify_waiters();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Wait up to `limit` for the current holder to deactivate. Returns
    /// whether the handle was seen inactive.
    pub async fn wait_inactive(&self, limit: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            let released = self.released.notified();
            tokio::pin!(released);
            released.as_mut().enable();
            if !self.is_active() {
                return true;
            }
            if tokio::time::timeout_at(deadline, released).await.is_err() {
                return !self.is_active();
            }
        }
    }

    // ========================================================================
    // SIGNALS
    // ========================================================================

    /// Ask the loop to stop after the in-flight trial.
    pub fn request_pause(&self) {
        self.pause_requested.store(true, Ordering::Release);
    }

    pub fn clear_pause(&self) {
        self.pause_requested.store(false, Ordering::Release);
    }

    pub fn is_pause_requested(&self) -> bool {
        self.pause_requested.load(Ordering::Acquire)
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token fired by [`cancel`](Self::cancel); cuts retry backoffs short.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancel
    }

    // ========================================================================
    // POSITION AND TIMING
    // ========================================================================

    /// Sequence number of the next trial to execute.
    pub fn next_index(&self) -> u32 {
        self.next_index.load(Ordering::Acquire)
    }

    pub fn set_next_index(&self, index: u32) {
        self.next_index.store(index, Ordering::Release);
    }

    fn timing(&self) -> MutexGuard<'_, TimingStats> {
        self.timing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record the wall time of a finished trial.
    pub fn record_duration(&self, duration_ms: DurationMs) {
        let mut timing = self.timing();
        timing.observed_runs += 1;
        timing.total_ms += duration_ms.max(0);
    }

    pub fn average_duration_ms(&self) -> Option<DurationMs> {
        let timing = *self.timing();
        if timing.observed_runs == 0 {
            return None;
        }
        Some(timing.total_ms / DurationMs::from(timing.observed_runs))
    }

    /// Average observed duration times `remaining`.
    pub fn estimate_remaining_ms(&self, remaining: u32) -> Option<DurationMs> {
        self.average_duration_ms()
            .map(|avg| avg.saturating_mul(DurationMs::from(remaining)))
    }
}

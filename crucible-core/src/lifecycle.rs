//! Experiment lifecycle state machine.
//!
//! Pure: callers persist the returned status.
//!
//! | From             | Event    | To        |
//! |------------------|----------|-----------|
//! | DRAFT            | start    | RUNNING   |
//! | RUNNING          | pause    | PAUSED    |
//! | PAUSED           | resume   | RUNNING   |
//! | RUNNING, PAUSED  | cancel   | FAILED    |
//! | RUNNING          | complete | COMPLETED |
//! | RUNNING, PAUSED  | abort    | FAILED    |

use crate::{EngineError, ExperimentStatus};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Events that drive experiment status changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleEvent {
    Start,
    Pause,
    Resume,
    Cancel,
    /// Every run was processed
    Complete,
    /// Internal fault in the execution loop
    Abort,
}

impl LifecycleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleEvent::Start => "start",
            LifecycleEvent::Pause => "pause",
            LifecycleEvent::Resume => "resume",
            LifecycleEvent::Cancel => "cancel",
            LifecycleEvent::Complete => "complete",
            LifecycleEvent::Abort => "abort",
        }
    }
}

impl fmt::Display for LifecycleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Apply `event` to `from`, returning the next status.
pub fn transition(
    from: ExperimentStatus,
    event: LifecycleEvent,
) -> Result<ExperimentStatus, EngineError> {
    use ExperimentStatus::*;
    use LifecycleEvent::*;

    match (from, event) {
        (Draft, Start) => Ok(Running),
        (Running, Pause) => Ok(Paused),
        (Paused, Resume) => Ok(Running),
        (Running | Paused, Cancel) => Ok(Failed),
        (Running, Complete) => Ok(Completed),
        (Running | Paused, Abort) => Ok(Failed),
        _ => Err(EngineError::InvalidStateTransition { from, event }),
    }
}

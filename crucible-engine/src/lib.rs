//! CRUCIBLE Engine - Experiment Execution
//!
//! Expands experiments into trials, executes them one at a time in a
//! background task per experiment, and exposes start, pause, resume, cancel
//! and progress queries.
//!
//! # Key Types
//!
//! - `RunMatrix`: deterministic expansion of a configuration into trials
//! - `ExecutionHandle`: pause flag, cancellation token and timing of one execution
//! - `ExecutionRegistry`: experiment ID to handle map shared by the controller
//! - `ExperimentEngine`: lifecycle operations and the execution loop

pub mod context;
mod controller;
pub mod definition;
mod handle;
mod matrix;
pub mod progress;
mod registry;
pub mod telemetry;

pub use controller::{EngineParts, ExperimentEngine, INTERNAL_FAULT_CODE, INTERRUPTED_MESSAGE};
pub use definition::ExperimentDefinition;
pub use handle::ExecutionHandle;
pub use matrix::{effective_embeddings, expected_total_runs, RunMatrix, MAX_TOTAL_RUNS};
pub use registry::ExecutionRegistry;
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig};

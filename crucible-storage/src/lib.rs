//! CRUCIBLE Storage - Storage Traits and In-Memory Implementation
//!
//! Defines the repository abstraction the execution engine writes through.
//! Durable backends implement the same traits outside this workspace.

pub mod memory;
pub mod traits;

pub use memory::InMemoryStorage;
pub use traits::{ExperimentStore, ExperimentUpdate, PromptSource, RunStore};

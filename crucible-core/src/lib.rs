//! CRUCIBLE Core - Entity Types
//!
//! Identifiers, entities, the experiment lifecycle state machine, the error
//! taxonomy and engine configuration. Every other crate depends on this one.
//! No I/O happens here.

mod config;
mod entities;
mod enums;
mod error;
mod identity;
pub mod lifecycle;
mod llm;

pub use config::*;
pub use entities::*;
pub use enums::*;
pub use error::*;
pub use identity::*;
pub use lifecycle::{transition, LifecycleEvent};
pub use llm::*;

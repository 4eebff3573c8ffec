//! CRUCIBLE Events - Progress Streaming
//!
//! Typed progress events for executing experiments and the sinks they are
//! published to.
//!
//! # Key Types
//!
//! - `ProgressEvent`: an `EventPayload` tagged with experiment ID and timestamp
//! - `ProgressSink`: publish-to-topic transport
//! - `BroadcastSink`: in-process sink with per-experiment subscriptions
//! - `ProgressPublisher`: best-effort wrapper the execution loop calls

mod event;
mod publisher;
mod sink;

pub use event::{topic_for, EventPayload, ProgressEvent, ProgressEventKind};
pub use publisher::ProgressPublisher;
pub use sink::{BroadcastSink, ExperimentSubscription, ProgressSink, PublishError};

//! Polling runtime
//!
//! Per-device poll workers, their orchestration and hot reload, retry
//! backoff, and snapshot publication.

pub mod backoff;
pub mod orchestrator;
pub mod publisher;
pub mod worker;

// Re-export common types
pub use backoff::RetryBackoff;
pub use orchestrator::{PollerOrchestrator, ReconcileReport};
pub use publisher::SnapshotPublisher;
pub use worker::{PollOutcome, PollPhase, PollState, PollStates, PollWorker, NO_DATA_ERROR};

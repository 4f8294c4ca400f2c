//! Shared vocabulary for the drover control plane.
//!
//! Everything in here is consumed by at least two of the sibling crates:
//! the dispatch scheduler, the accounting poller, the durable store, and
//! the control surface all speak in these types.

pub mod campaign;
pub mod config;
pub mod domain;
pub mod job;
pub mod logging;

pub use campaign::{Campaign, CampaignId, SenderProfile};
pub use config::{Tuning, TuningOverlay, TuningResolver};
pub use domain::Domain;
pub use job::{Job, JobCounters, JobCountersSnapshot, JobId, JobStatus, JobView, OutcomeKind};

pub use tracing;

/// Coordination signal broadcast between long-running tasks.
#[derive(Debug, Clone, Copy)]
pub enum Signal {
    /// Begin a graceful shutdown.
    Shutdown,
    /// A task has finished winding down.
    Finalised,
}

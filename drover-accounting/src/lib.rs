//! The accounting ingestion pipeline.
//!
//! A resumable, at-least-once-safe poller that pulls delivery-outcome
//! records from the external accounting bridge over a cursor protocol,
//! deduplicates them by content hash, resolves each record to a job
//! through an ordered resolver chain, and applies idempotent counter
//! updates to the durable job rows.

mod bridge;
mod error;
mod poller;
mod record;
mod resolve;

pub use bridge::{
    BridgeClient, BridgeConfig, BridgeStatus, HttpBridgeClient, PullRequest, PullResponse,
    RawRecord,
};
pub use error::{BridgeError, PollerError};
pub use poller::{AccountingPoller, PollOutcome, PollerConfig};
pub use record::{AccountingEvent, content_hash, normalize_outcome};
pub use resolve::{
    ActiveJobs, CampaignFallbackResolver, ExplicitJobIdResolver, JobResolver, MessageIdResolver,
    ResolverChain,
};

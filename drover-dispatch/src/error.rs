//! Dispatch error types.
//!
//! The taxonomy mirrors how failures propagate: policy blocks and
//! admission refusals surface to the caller of the control surface;
//! store failures surface as job-level faults; everything transient
//! inside the dispatch loop is handled there and never becomes an
//! error.

use thiserror::Error;

use drover_common::CampaignId;

#[derive(Debug, Error)]
pub enum DispatchError {
    /// The campaign already has an active job and `force` was not set.
    #[error("campaign {0} already has an active job")]
    DuplicateActiveJob(CampaignId),

    /// Refused by the pre-start health gate.
    #[error("MTA busy: {0}")]
    Busy(String),

    /// Nothing to dispatch after sanitising the recipient list.
    #[error("campaign {0} has no dispatchable recipients")]
    NoRecipients(CampaignId),

    /// A job cannot run without at least one sender identity.
    #[error("campaign {0} has no sender profiles")]
    NoSenders(CampaignId),

    /// No active job to act on.
    #[error("campaign {0} has no active job")]
    NoActiveJob(CampaignId),

    /// Durable store failure during admission or lifecycle persistence.
    #[error("store failure: {0}")]
    Store(#[from] drover_store::StoreError),
}

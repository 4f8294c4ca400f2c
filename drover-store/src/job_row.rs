//! The durable projection of a job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use drover_common::{CampaignId, Job, JobCountersSnapshot, JobId, JobStatus};

/// One durable row per job. The dispatch engine writes the whole row on
/// lifecycle transitions; the accounting poller increments individual
/// outcome counters in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRow {
    pub job_id: JobId,
    pub campaign_id: CampaignId,
    pub status: JobStatus,
    pub counters: JobCountersSnapshot,
    pub total_recipients: u64,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRow {
    /// Snapshot the live job into its row form.
    #[must_use]
    pub fn of_job(job: &Job) -> Self {
        Self {
            job_id: job.id,
            campaign_id: job.campaign_id.clone(),
            status: job.status(),
            counters: job.counters.snapshot(),
            total_recipients: job.total_recipients(),
            started_at: job.started_at,
            updated_at: Utc::now(),
        }
    }
}

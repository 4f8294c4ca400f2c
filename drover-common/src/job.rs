//! Job identity, lifecycle status, and outcome counters.
//!
//! A job is one execution of a campaign. The dispatch engine owns its
//! bucket/cursor state; the counters here are also incremented by the
//! accounting poller as outcomes arrive, so they are atomics rather than
//! fields behind the status lock.

use std::{
    fmt::{self, Display},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
};

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::campaign::{Campaign, CampaignId, SenderProfile};

/// Job identifier (ULID: sortable by creation time, which the registry
/// relies on for "most recently started" ordering).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Ulid);

impl JobId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Parse a job identifier from its canonical 26-character form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        Ulid::from_string(s).ok().map(Self)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Job lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Paused,
    /// Dispatch is alive but fully throttled by pressure; resumes on its
    /// own when capacity returns.
    Backoff,
    Completed,
    Stopped,
    Failed,
}

impl JobStatus {
    /// Whether the job still occupies its campaign's active slot.
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(
            self,
            Self::Queued | Self::Running | Self::Paused | Self::Backoff
        )
    }

    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }
}

impl Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Backoff => "backoff",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Delivery outcome categories reported by the accounting subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Delivered,
    Bounced,
    Deferred,
    Complained,
    Unknown,
}

impl OutcomeKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::Bounced => "bounced",
            Self::Deferred => "deferred",
            Self::Complained => "complained",
            Self::Unknown => "unknown",
        }
    }
}

/// Per-job counters. Incremented by the dispatch engine (attempted,
/// abandoned, skipped) and by the accounting poller (outcomes).
#[derive(Debug, Default)]
pub struct JobCounters {
    attempted: AtomicU64,
    delivered: AtomicU64,
    bounced: AtomicU64,
    deferred: AtomicU64,
    complained: AtomicU64,
    unknown: AtomicU64,
    abandoned: AtomicU64,
    skipped: AtomicU64,
}

impl JobCounters {
    pub fn record_outcome(&self, kind: OutcomeKind, n: u64) {
        let counter = match kind {
            OutcomeKind::Delivered => &self.delivered,
            OutcomeKind::Bounced => &self.bounced,
            OutcomeKind::Deferred => &self.deferred,
            OutcomeKind::Complained => &self.complained,
            OutcomeKind::Unknown => &self.unknown,
        };
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_attempted(&self, n: u64) {
        self.attempted.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_abandoned(&self, n: u64) {
        self.abandoned.fetch_add(n, Ordering::Relaxed);
    }

    pub fn add_skipped(&self, n: u64) {
        self.skipped.fetch_add(n, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> JobCountersSnapshot {
        JobCountersSnapshot {
            attempted: self.attempted.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            bounced: self.bounced.load(Ordering::Relaxed),
            deferred: self.deferred.load(Ordering::Relaxed),
            complained: self.complained.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of a job's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCountersSnapshot {
    pub attempted: u64,
    pub delivered: u64,
    pub bounced: u64,
    pub deferred: u64,
    pub complained: u64,
    pub unknown: u64,
    pub abandoned: u64,
    pub skipped: u64,
}

impl JobCountersSnapshot {
    /// Sum of all accounted outcomes plus abandoned recipients.
    #[must_use]
    pub const fn accounted(&self) -> u64 {
        self.delivered + self.bounced + self.deferred + self.complained + self.unknown
            + self.abandoned
    }

    /// Increment the counter for one outcome kind (the store backends
    /// mutate rows through this).
    pub const fn record_outcome(&mut self, kind: OutcomeKind, n: u64) {
        match kind {
            OutcomeKind::Delivered => self.delivered += n,
            OutcomeKind::Bounced => self.bounced += n,
            OutcomeKind::Deferred => self.deferred += n,
            OutcomeKind::Complained => self.complained += n,
            OutcomeKind::Unknown => self.unknown += n,
        }
    }
}

/// One execution of a campaign.
#[derive(Debug)]
pub struct Job {
    pub id: JobId,
    pub campaign_id: CampaignId,
    status: RwLock<JobStatus>,
    pub counters: JobCounters,
    pub chunk_size: u32,
    pub worker_limit: u32,
    pub senders: Arc<Vec<SenderProfile>>,
    /// Content-variant labels carried over from the campaign; only the
    /// count matters to the dispatcher's variant rotation.
    pub subjects: Arc<Vec<String>>,
    pub started_at: DateTime<Utc>,
    health_warning: AtomicBool,
    total_recipients: AtomicU64,
    last_error: RwLock<Option<String>>,
}

impl Job {
    #[must_use]
    pub fn new(campaign: &Campaign, chunk_size: u32, worker_limit: u32) -> Self {
        Self {
            id: JobId::new(),
            campaign_id: campaign.id.clone(),
            status: RwLock::new(JobStatus::Queued),
            counters: JobCounters::default(),
            chunk_size: campaign.chunk_size.unwrap_or(chunk_size),
            worker_limit: campaign.worker_limit.unwrap_or(worker_limit),
            senders: Arc::new(campaign.senders.clone()),
            subjects: Arc::new(campaign.subjects.clone()),
            started_at: Utc::now(),
            health_warning: AtomicBool::new(false),
            total_recipients: AtomicU64::new(0),
            last_error: RwLock::new(None),
        }
    }

    #[must_use]
    pub fn status(&self) -> JobStatus {
        *self.status.read()
    }

    pub fn set_status(&self, status: JobStatus) {
        *self.status.write() = status;
    }

    /// Mark the job failed with an operator-visible reason. Terminal.
    pub fn fail(&self, reason: impl Into<String>) {
        *self.last_error.write() = Some(reason.into());
        self.set_status(JobStatus::Failed);
    }

    pub fn record_warning(&self, reason: impl Into<String>) {
        *self.last_error.write() = Some(reason.into());
        self.health_warning.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn health_warning(&self) -> bool {
        self.health_warning.load(Ordering::Relaxed)
    }

    pub fn set_total_recipients(&self, total: u64) {
        self.total_recipients.store(total, Ordering::Relaxed);
    }

    #[must_use]
    pub fn total_recipients(&self) -> u64 {
        self.total_recipients.load(Ordering::Relaxed)
    }

    /// Completed, but with recipients left behind by retry exhaustion.
    #[must_use]
    pub fn completed_partial(&self) -> bool {
        self.status() == JobStatus::Completed && self.counters.snapshot().abandoned > 0
    }

    /// Read-only projection for status queries.
    #[must_use]
    pub fn view(&self) -> JobView {
        JobView {
            id: self.id,
            campaign_id: self.campaign_id.clone(),
            status: self.status(),
            counters: self.counters.snapshot(),
            total_recipients: self.total_recipients(),
            started_at: self.started_at,
            health_warning: self.health_warning(),
            last_error: self.last_error.read().clone(),
        }
    }
}

/// Serializable job projection for the control surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: JobId,
    pub campaign_id: CampaignId,
    pub status: JobStatus,
    pub counters: JobCountersSnapshot,
    pub total_recipients: u64,
    pub started_at: DateTime<Utc>,
    pub health_warning: bool,
    pub last_error: Option<String>,
}

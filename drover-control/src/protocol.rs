//! Control protocol types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use drover_common::JobView;

/// Current protocol version.
pub const PROTOCOL_VERSION: u32 = 1;

/// Versioned request wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub version: u32,
    /// Plaintext bearer token; required when the server has auth
    /// enabled.
    #[serde(default)]
    pub token: Option<String>,
    pub command: RequestCommand,
}

impl Request {
    #[must_use]
    pub fn new(command: RequestCommand, token: Option<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            token,
            command,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RequestCommand {
    Job(JobCommand),
    Accounting(AccountingCommand),
    Pressure(PressureCommand),
    System(SystemCommand),
}

/// Job lifecycle commands, addressed per campaign.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobCommand {
    /// Start a job for the campaign. `force` admits a second active
    /// job alongside an existing one.
    Start { campaign_id: String, force: bool },
    Pause { campaign_id: String },
    Resume { campaign_id: String },
    Stop { campaign_id: String },
    /// Status of all jobs, or of one campaign's jobs.
    Status { campaign_id: Option<String> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AccountingCommand {
    /// Poll the bridge now instead of waiting out the interval.
    PullNow,
    /// Cursor row plus the bridge's own diagnostics.
    Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PressureCommand {
    /// Latest pressure snapshot and per-domain classifications.
    Status,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SystemCommand {
    Ping,
}

/// Versioned response wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub version: u32,
    pub payload: ResponsePayload,
}

impl Response {
    #[must_use]
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Ok(message.into()),
        }
    }

    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload: ResponsePayload::Error(message.into()),
        }
    }

    #[must_use]
    pub fn payload(payload: ResponsePayload) -> Self {
        Self {
            version: PROTOCOL_VERSION,
            payload,
        }
    }

    #[must_use]
    pub const fn is_version_compatible(&self) -> bool {
        self.version == PROTOCOL_VERSION
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ResponsePayload {
    Ok(String),
    Error(String),
    Jobs(Vec<JobView>),
    Accounting(AccountingView),
    Pressure(PressureView),
}

/// Cursor-row projection (the persisted seen-hash window stays server
/// side).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CursorView {
    pub source_kind: String,
    pub cursor_token: Option<String>,
    pub last_poll_time: Option<DateTime<Utc>>,
    pub events_received: u64,
    pub events_ingested: u64,
    pub duplicates_dropped: u64,
    pub job_not_found: u64,
    pub db_write_failures: u64,
    pub last_error: Option<String>,
}

/// Accounting status: the poller's cursor row and, when reachable, the
/// bridge's own diagnostic state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AccountingView {
    pub cursor: Option<CursorView>,
    pub bridge_last_source: Option<String>,
    pub bridge_parsed: u64,
    pub bridge_skipped: u64,
    pub bridge_unknown_outcome: u64,
    pub bridge_last_error: Option<String>,
    pub bridge_reachable: bool,
}

/// One destination domain's classification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainView {
    pub domain: String,
    pub class: String,
    pub deferrals: u64,
    pub errors: u64,
}

/// Pressure snapshot projection.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PressureView {
    pub level: u8,
    pub stale: bool,
    pub sampled_at: Option<DateTime<Utc>>,
    pub queued_recipients: u64,
    pub queued_messages: u64,
    pub spool_recipients: u64,
    pub spool_messages: u64,
    pub deferred_count: u64,
    pub domains: Vec<DomainView>,
}

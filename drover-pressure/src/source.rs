//! The MTA metrics boundary.
//!
//! The MTA is an opaque collaborator: all this crate knows is the shape
//! of its queue-summary and per-domain detail reports. Production uses
//! [`HttpMetricsSource`]; [`StaticMetricsSource`] serves deployments
//! without a metrics endpoint (everything reads as idle) and tests.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use drover_common::Domain;

use crate::error::MetricsError;

/// Aggregate queue/spool load reported by the MTA.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSummary {
    #[serde(default)]
    pub queued_recipients: u64,
    #[serde(default)]
    pub queued_messages: u64,
    #[serde(default)]
    pub spool_recipients: u64,
    #[serde(default)]
    pub spool_messages: u64,
    #[serde(default)]
    pub deferred_count: u64,
}

/// Per-destination-domain health detail reported by the MTA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainDetail {
    pub domain: Domain,
    #[serde(default)]
    pub deferrals: u64,
    #[serde(default)]
    pub errors: u64,
    #[serde(default)]
    pub queue_depth: u64,
}

/// Source of MTA load metrics.
///
/// A missing response is a distinct condition from a response reporting
/// zero load; implementations signal the former with [`MetricsError`].
#[async_trait]
pub trait MetricsSource: Send + Sync + std::fmt::Debug {
    async fn queue_summary(&self) -> Result<QueueSummary, MetricsError>;

    async fn domain_details(&self) -> Result<Vec<DomainDetail>, MetricsError>;
}

/// Configuration for the HTTP metrics client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSourceConfig {
    /// Base URL of the MTA status API.
    pub base_url: String,

    /// Credential sent with every request.
    #[serde(default)]
    pub api_key: String,

    /// Request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    5
}

/// HTTP client for the MTA status API.
///
/// Expects `GET {base}/status/queue` returning a [`QueueSummary`] and
/// `GET {base}/status/domains` returning a list of [`DomainDetail`].
#[derive(Debug)]
pub struct HttpMetricsSource {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
}

impl HttpMetricsSource {
    /// Build the client.
    ///
    /// # Errors
    /// Returns [`MetricsError::Unreachable`] if the underlying client
    /// cannot be constructed.
    pub fn new(config: &MetricsSourceConfig) -> Result<Self, MetricsError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| MetricsError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            timeout_secs: config.timeout_secs,
        })
    }

    async fn get<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, MetricsError> {
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .send()
            .await
            .map_err(|e| match MetricsError::from(e) {
                MetricsError::Timeout(_) => MetricsError::Timeout(self.timeout_secs),
                other => other,
            })?;

        if !response.status().is_success() {
            return Err(MetricsError::Status(response.status().as_u16()));
        }

        response
            .json()
            .await
            .map_err(|e| MetricsError::Decode(e.to_string()))
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn queue_summary(&self) -> Result<QueueSummary, MetricsError> {
        self.get("/status/queue").await
    }

    async fn domain_details(&self) -> Result<Vec<DomainDetail>, MetricsError> {
        self.get("/status/domains").await
    }
}

/// In-memory metrics source.
///
/// Used when no metrics endpoint is configured (the MTA always reads as
/// idle, so dispatch runs unthrottled) and by tests, which mutate the
/// reported values between samples.
#[derive(Debug, Default)]
pub struct StaticMetricsSource {
    summary: Mutex<QueueSummary>,
    domains: Mutex<Vec<DomainDetail>>,
    unreachable: Mutex<bool>,
}

impl StaticMetricsSource {
    /// A source that always reports zero load.
    #[must_use]
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn set_summary(&self, summary: QueueSummary) {
        *self.summary.lock() = summary;
    }

    pub fn set_domains(&self, domains: Vec<DomainDetail>) {
        *self.domains.lock() = domains;
    }

    /// Make subsequent calls fail, to exercise degraded paths.
    pub fn set_unreachable(&self, unreachable: bool) {
        *self.unreachable.lock() = unreachable;
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn queue_summary(&self) -> Result<QueueSummary, MetricsError> {
        if *self.unreachable.lock() {
            return Err(MetricsError::Unreachable("static source offline".into()));
        }
        Ok(*self.summary.lock())
    }

    async fn domain_details(&self) -> Result<Vec<DomainDetail>, MetricsError> {
        if *self.unreachable.lock() {
            return Err(MetricsError::Unreachable("static source offline".into()));
        }
        Ok(self.domains.lock().clone())
    }
}

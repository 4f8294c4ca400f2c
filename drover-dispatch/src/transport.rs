//! The MTA submission boundary.
//!
//! Dispatch pushes chunks into the MTA through this trait. Production
//! uses the MTA's HTTP injection endpoint; [`LogTransport`] is the
//! dry-run implementation that accepts everything and only logs.

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use drover_common::Job;

use crate::chunk::{Chunk, message_token};

/// Submission failure, categorised for the retry state machine.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Worth retrying: connection trouble, timeouts, 5xx responses.
    #[error("transient submission failure: {0}")]
    Transient(String),

    /// The MTA rejected the chunk outright; the next attempt goes out
    /// under a rotated sender/variant.
    #[error("submission rejected: {0}")]
    Permanent(String),
}

impl TransportError {
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Sink for built chunks.
#[async_trait]
pub trait ChunkTransport: Send + Sync + std::fmt::Debug {
    /// Submit one chunk attempt. Must not partially apply: either the
    /// whole chunk is accepted by the MTA or an error comes back.
    async fn submit(&self, job: &Job, chunk: &Chunk) -> Result<(), TransportError>;
}

/// Configuration for the HTTP injection client.
#[derive(Debug, Clone, serde::Deserialize, Serialize)]
pub struct InjectConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    20
}

#[derive(Debug, Serialize)]
struct InjectRecipient<'a> {
    address: &'a str,
    message_id: String,
}

#[derive(Debug, Serialize)]
struct InjectPayload<'a> {
    job_id: String,
    campaign_id: &'a str,
    domain: &'a str,
    sender: String,
    subject_variant: Option<&'a str>,
    recipients: Vec<InjectRecipient<'a>>,
}

/// Chunk submission over the MTA's HTTP injection endpoint.
#[derive(Debug)]
pub struct HttpInjectTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpInjectTransport {
    /// # Errors
    /// Returns [`TransportError::Transient`] if the client cannot be
    /// constructed.
    pub fn new(config: &InjectConfig) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    fn payload<'a>(job: &'a Job, chunk: &'a Chunk) -> InjectPayload<'a> {
        let sender = chunk
            .sender(&job.senders)
            .map(ToString::to_string)
            .unwrap_or_default();
        let sender_domain = chunk
            .sender(&job.senders)
            .map_or_else(|| "localhost".to_string(), |s| s.domain().to_string());

        let subject_variant = if job.subjects.is_empty() {
            None
        } else {
            job.subjects
                .get(chunk.variant_index % job.subjects.len())
                .map(String::as_str)
        };

        InjectPayload {
            job_id: chunk.job_id.to_string(),
            campaign_id: job.campaign_id.as_str(),
            domain: chunk.domain.as_str(),
            sender,
            subject_variant,
            recipients: chunk
                .recipients
                .iter()
                .map(|address| InjectRecipient {
                    address,
                    message_id: format!(
                        "<{}.{}@{}>",
                        message_token(chunk.job_id, address),
                        chunk.job_id,
                        sender_domain
                    ),
                })
                .collect(),
        }
    }
}

#[async_trait]
impl ChunkTransport for HttpInjectTransport {
    async fn submit(&self, job: &Job, chunk: &Chunk) -> Result<(), TransportError> {
        let response = self
            .client
            .post(format!("{}/inject", self.base_url))
            .header("X-Api-Key", &self.api_key)
            .json(&Self::payload(job, chunk))
            .send()
            .await
            .map_err(|e| TransportError::Transient(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_server_error()
            || status == reqwest::StatusCode::REQUEST_TIMEOUT
            || status == reqwest::StatusCode::TOO_MANY_REQUESTS
        {
            Err(TransportError::Transient(format!("status {status}")))
        } else {
            Err(TransportError::Permanent(format!("status {status}")))
        }
    }
}

/// Accepts every chunk and logs it. The default when no injection
/// endpoint is configured, and useful for rehearsing a campaign.
#[derive(Debug, Default)]
pub struct LogTransport;

#[async_trait]
impl ChunkTransport for LogTransport {
    async fn submit(&self, job: &Job, chunk: &Chunk) -> Result<(), TransportError> {
        info!(
            job = %job.id,
            domain = %chunk.domain,
            recipients = chunk.recipients.len(),
            sender = chunk.sender(&job.senders).map(|s| s.address.clone()).unwrap_or_default(),
            attempt = chunk.attempt,
            "dry-run submit"
        );
        Ok(())
    }
}

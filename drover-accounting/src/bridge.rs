//! The accounting bridge boundary.
//!
//! The bridge runs next to the MTA, tails its accounting logs, and
//! serves normalised records over a cursor-based pull protocol. Field
//! names in records vary with the MTA's log schema, so lookups fold
//! case and `_`/`-` and fall back to substring matches, exactly the
//! tolerance the bridge itself applies when parsing log headers.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// One raw delivery-outcome record as the bridge serves it: a flat
/// JSON object whose keys depend on the accounting log's header row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawRecord(pub serde_json::Map<String, serde_json::Value>);

impl RawRecord {
    /// Look up a field by any of the given aliases.
    ///
    /// Keys and aliases are compared lowercased with `_` folded to
    /// `-`. Exact matches win; otherwise the first key containing an
    /// alias as a substring is taken. Empty values never match.
    #[must_use]
    pub fn field(&self, aliases: &[&str]) -> Option<String> {
        let wanted: Vec<String> = aliases.iter().map(|a| fold_key(a)).collect();

        let non_empty = |value: &serde_json::Value| -> Option<String> {
            let s = match value {
                serde_json::Value::String(s) => s.trim().to_string(),
                serde_json::Value::Null => return None,
                other => other.to_string(),
            };
            (!s.is_empty()).then_some(s)
        };

        for (key, value) in &self.0 {
            if wanted.iter().any(|w| fold_key(key) == *w) {
                if let Some(s) = non_empty(value) {
                    return Some(s);
                }
            }
        }
        for (key, value) in &self.0 {
            let folded = fold_key(key);
            if wanted.iter().any(|w| folded.contains(w.as_str())) {
                if let Some(s) = non_empty(value) {
                    return Some(s);
                }
            }
        }
        None
    }

    /// The text the dedup hash is computed over: the original log line
    /// when the bridge kept it, else the record's canonical JSON form.
    #[must_use]
    pub fn raw_text(&self) -> String {
        self.field(&["raw"])
            .unwrap_or_else(|| serde_json::Value::Object(self.0.clone()).to_string())
    }
}

fn fold_key(key: &str) -> String {
    key.trim().to_ascii_lowercase().replace('_', "-")
}

/// Pull request: resume from `cursor_token`, up to `max_records`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PullRequest {
    pub source_kind: String,
    pub cursor_token: Option<String>,
    pub max_records: u32,
}

/// Pull response. Older bridges omit the cursor fields entirely; the
/// poller treats such a batch as fully consumed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PullResponse {
    #[serde(default = "default_ok")]
    pub ok: bool,
    #[serde(default)]
    pub records: Vec<RawRecord>,
    #[serde(default)]
    pub next_cursor: Option<String>,
    #[serde(default)]
    pub has_more: Option<bool>,
}

const fn default_ok() -> bool {
    true
}

/// Diagnostic projection of the bridge's own state; surfaced on the
/// control surface, never mutated here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BridgeStatus {
    #[serde(default)]
    pub last_source: Option<String>,
    #[serde(default)]
    pub last_cursor: Option<String>,
    #[serde(default)]
    pub parsed: u64,
    #[serde(default)]
    pub skipped: u64,
    #[serde(default)]
    pub unknown_outcome: u64,
    #[serde(default)]
    pub last_error: Option<String>,
}

/// The pull/status endpoints. Pull must be idempotent for identical
/// cursors: the same cursor yields the same (or a superset of the
/// same) records.
#[async_trait]
pub trait BridgeClient: Send + Sync + std::fmt::Debug {
    async fn pull(&self, request: &PullRequest) -> Result<PullResponse, BridgeError>;

    async fn status(&self) -> Result<BridgeStatus, BridgeError>;
}

/// Bridge client configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    pub base_url: String,

    /// Credential sent as `X-Webhook-Token` with every call.
    #[serde(default)]
    pub token: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

const fn default_timeout_secs() -> u64 {
    20
}

/// HTTP client for the bridge: `POST {base}/pull`, `GET {base}/status`.
#[derive(Debug)]
pub struct HttpBridgeClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

impl HttpBridgeClient {
    /// # Errors
    /// Returns [`BridgeError::Unreachable`] if the client cannot be
    /// constructed.
    pub fn new(config: &BridgeConfig) -> Result<Self, BridgeError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| BridgeError::Unreachable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }
}

#[async_trait]
impl BridgeClient for HttpBridgeClient {
    async fn pull(&self, request: &PullRequest) -> Result<PullResponse, BridgeError> {
        let response = self
            .client
            .post(format!("{}/pull", self.base_url))
            .header("X-Webhook-Token", &self.token)
            .json(request)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BridgeError::Status(response.status().as_u16()));
        }

        let pull: PullResponse = response
            .json()
            .await
            .map_err(|e| BridgeError::Decode(e.to_string()))?;
        if !pull.ok {
            return Err(BridgeError::Rejected("bridge flagged pull not ok".into()));
        }
        Ok(pull)
    }

    async fn status(&self) -> Result<BridgeStatus, BridgeError> {
        let response = self
            .client
            .get(format!("{}/status", self.base_url))
            .header("X-Webhook-Token", &self.token)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(BridgeError::Status(response.status().as_u16()));
        }
        response
            .json()
            .await
            .map_err(|e| BridgeError::Decode(e.to_string()))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> RawRecord {
        let mut map = serde_json::Map::new();
        for (k, v) in pairs {
            map.insert((*k).to_string(), serde_json::Value::String((*v).to_string()));
        }
        RawRecord(map)
    }

    #[test]
    fn test_field_exact_match_folds_case_and_separators() {
        let rec = record(&[("X_Campaign_ID", "camp-7")]);
        assert_eq!(rec.field(&["x-campaign-id"]).as_deref(), Some("camp-7"));
    }

    #[test]
    fn test_field_substring_fallback() {
        let rec = record(&[("header_x-job-id", "01JOB")]);
        assert_eq!(rec.field(&["x-job-id"]).as_deref(), Some("01JOB"));
    }

    #[test]
    fn test_field_exact_beats_substring() {
        let rec = record(&[("orig-rcpt", "fallback@example.com"), ("rcpt", "real@example.com")]);
        assert_eq!(rec.field(&["rcpt"]).as_deref(), Some("real@example.com"));
    }

    #[test]
    fn test_field_skips_empty_values() {
        let rec = record(&[("rcpt", "  "), ("recipient", "user@example.com")]);
        assert_eq!(
            rec.field(&["rcpt", "recipient"]).as_deref(),
            Some("user@example.com")
        );
    }

    #[test]
    fn test_raw_text_prefers_original_line() {
        let rec = record(&[("raw", "D,user@example.com"), ("type", "d")]);
        assert_eq!(rec.raw_text(), "D,user@example.com");

        let rec = record(&[("type", "d")]);
        assert_eq!(rec.raw_text(), r#"{"type":"d"}"#);
    }
}

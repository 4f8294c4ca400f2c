//! Per-destination-domain health classification.
//!
//! Classification is a pure function of two threshold pairs over the
//! MTA's per-domain deferral/error counts; the counts themselves sit in
//! a short-TTL cache so high chunk throughput cannot amplify into a
//! call storm against the metrics endpoint.

use std::{sync::Arc, time::Instant};

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use drover_common::Domain;

use crate::source::MetricsSource;

/// Delivery-health class of one destination domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DomainClass {
    Normal,
    /// Deliver, but with the slow-mode delay and worker cap applied.
    Slow,
    /// Do not deliver; chunks for this domain wait and retry.
    Backoff,
}

/// Classification plus the counts it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainStatus {
    pub domain: Domain,
    pub deferrals: u64,
    pub errors: u64,
    pub class: DomainClass,
}

/// Tracker configuration. Slow thresholds are clamped to the backoff
/// thresholds at construction so slow <= backoff always holds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DomainHealthConfig {
    #[serde(default = "defaults::slow_deferrals")]
    pub slow_deferrals: u64,
    #[serde(default = "defaults::slow_errors")]
    pub slow_errors: u64,
    #[serde(default = "defaults::backoff_deferrals")]
    pub backoff_deferrals: u64,
    #[serde(default = "defaults::backoff_errors")]
    pub backoff_errors: u64,

    /// How long one domain-detail sample stays authoritative.
    #[serde(default = "defaults::cache_ttl_secs")]
    pub cache_ttl_secs: u64,

    /// Upper bound on a refresh call; on expiry the last cached
    /// classification is used instead of blocking dispatch.
    #[serde(default = "defaults::refresh_timeout_secs")]
    pub refresh_timeout_secs: u64,

    /// Concurrent-chunk cap applied to a job while any of its active
    /// buckets is classified slow.
    #[serde(default = "defaults::slow_worker_cap")]
    pub slow_worker_cap: u32,

    /// Delay before each submission to a slow domain, milliseconds.
    #[serde(default = "defaults::slow_delay_ms")]
    pub slow_delay_ms: u64,
}

impl Default for DomainHealthConfig {
    fn default() -> Self {
        Self {
            slow_deferrals: defaults::slow_deferrals(),
            slow_errors: defaults::slow_errors(),
            backoff_deferrals: defaults::backoff_deferrals(),
            backoff_errors: defaults::backoff_errors(),
            cache_ttl_secs: defaults::cache_ttl_secs(),
            refresh_timeout_secs: defaults::refresh_timeout_secs(),
            slow_worker_cap: defaults::slow_worker_cap(),
            slow_delay_ms: defaults::slow_delay_ms(),
        }
    }
}

impl DomainHealthConfig {
    /// Clamp slow thresholds to backoff thresholds.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.slow_deferrals = self.slow_deferrals.min(self.backoff_deferrals);
        self.slow_errors = self.slow_errors.min(self.backoff_errors);
        self
    }
}

mod defaults {
    pub const fn slow_deferrals() -> u64 {
        25
    }

    pub const fn slow_errors() -> u64 {
        3
    }

    pub const fn backoff_deferrals() -> u64 {
        80
    }

    pub const fn backoff_errors() -> u64 {
        6
    }

    pub const fn cache_ttl_secs() -> u64 {
        10
    }

    pub const fn refresh_timeout_secs() -> u64 {
        3
    }

    pub const fn slow_worker_cap() -> u32 {
        2
    }

    pub const fn slow_delay_ms() -> u64 {
        1_000
    }
}

#[derive(Debug)]
struct CachedSample {
    taken_at: Instant,
    counts: AHashMap<Domain, (u64, u64)>,
}

/// TTL-cached classifier over the MTA's per-domain detail report.
#[derive(Debug)]
pub struct DomainHealthTracker {
    source: Arc<dyn MetricsSource>,
    config: DomainHealthConfig,
    // Async mutex: a refresh holds the lock across the metrics call so
    // concurrent misses collapse into one upstream request.
    cache: Mutex<Option<CachedSample>>,
}

impl DomainHealthTracker {
    #[must_use]
    pub fn new(source: Arc<dyn MetricsSource>, config: DomainHealthConfig) -> Self {
        Self {
            source,
            config: config.clamped(),
            cache: Mutex::new(None),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &DomainHealthConfig {
        &self.config
    }

    /// Classify one destination domain from the cached sample,
    /// refreshing it first when the TTL has lapsed.
    pub async fn classify(&self, domain: &Domain) -> DomainStatus {
        let mut cache = self.cache.lock().await;
        self.refresh_if_stale(&mut cache).await;

        let (deferrals, errors) = cache
            .as_ref()
            .and_then(|sample| sample.counts.get(domain).copied())
            .unwrap_or((0, 0));

        DomainStatus {
            domain: domain.clone(),
            deferrals,
            errors,
            class: self.class_for(deferrals, errors),
        }
    }

    /// Classification snapshot of every domain in the current sample,
    /// for status queries. Does not force a refresh.
    pub async fn snapshot(&self) -> Vec<DomainStatus> {
        let cache = self.cache.lock().await;
        cache
            .as_ref()
            .map(|sample| {
                sample
                    .counts
                    .iter()
                    .map(|(domain, (deferrals, errors))| DomainStatus {
                        domain: domain.clone(),
                        deferrals: *deferrals,
                        errors: *errors,
                        class: self.class_for(*deferrals, *errors),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    async fn refresh_if_stale(&self, cache: &mut Option<CachedSample>) {
        let ttl = std::time::Duration::from_secs(self.config.cache_ttl_secs);
        if let Some(sample) = cache.as_ref()
            && sample.taken_at.elapsed() < ttl
        {
            return;
        }

        let timeout = std::time::Duration::from_secs(self.config.refresh_timeout_secs);
        match tokio::time::timeout(timeout, self.source.domain_details()).await {
            Ok(Ok(details)) => {
                let counts = details
                    .into_iter()
                    .map(|d| (d.domain, (d.deferrals, d.errors)))
                    .collect();
                *cache = Some(CachedSample {
                    taken_at: Instant::now(),
                    counts,
                });
                debug!("domain health sample refreshed");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "domain detail refresh failed, keeping cached sample");
            }
            Err(_) => {
                warn!(
                    timeout_secs = self.config.refresh_timeout_secs,
                    "domain detail refresh timed out, keeping cached sample"
                );
            }
        }
    }

    const fn class_for(&self, deferrals: u64, errors: u64) -> DomainClass {
        if deferrals >= self.config.backoff_deferrals || errors >= self.config.backoff_errors {
            DomainClass::Backoff
        } else if deferrals >= self.config.slow_deferrals || errors >= self.config.slow_errors {
            DomainClass::Slow
        } else {
            DomainClass::Normal
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::source::{DomainDetail, StaticMetricsSource};

    fn detail(domain: &str, deferrals: u64, errors: u64) -> DomainDetail {
        DomainDetail {
            domain: Domain::new(domain),
            deferrals,
            errors,
            queue_depth: 0,
        }
    }

    fn tracker(source: Arc<StaticMetricsSource>) -> DomainHealthTracker {
        let config = DomainHealthConfig {
            slow_deferrals: 25,
            slow_errors: 3,
            backoff_deferrals: 80,
            backoff_errors: 6,
            ..Default::default()
        };
        DomainHealthTracker::new(source, config)
    }

    #[tokio::test]
    async fn test_deferrals_between_thresholds_is_slow() {
        let source = Arc::new(StaticMetricsSource::idle());
        source.set_domains(vec![detail("example.com", 30, 0)]);

        let tracker = tracker(source);
        let status = tracker.classify(&Domain::new("example.com")).await;
        assert_eq!(status.class, DomainClass::Slow);
        assert_eq!(status.deferrals, 30);
    }

    #[tokio::test]
    async fn test_errors_alone_force_backoff() {
        let source = Arc::new(StaticMetricsSource::idle());
        source.set_domains(vec![detail("example.com", 0, 7)]);

        let tracker = tracker(source);
        let status = tracker.classify(&Domain::new("example.com")).await;
        assert_eq!(status.class, DomainClass::Backoff);
    }

    #[tokio::test]
    async fn test_unknown_domain_is_normal() {
        let source = Arc::new(StaticMetricsSource::idle());
        let tracker = tracker(source);
        let status = tracker.classify(&Domain::new("quiet.example")).await;
        assert_eq!(status.class, DomainClass::Normal);
    }

    #[tokio::test]
    async fn test_classification_stable_within_ttl() {
        let source = Arc::new(StaticMetricsSource::idle());
        source.set_domains(vec![detail("example.com", 30, 0)]);
        let tracker = tracker(Arc::clone(&source));

        let first = tracker.classify(&Domain::new("example.com")).await;

        // Upstream changes, but the cached sample is still fresh.
        source.set_domains(vec![detail("example.com", 90, 0)]);
        let second = tracker.classify(&Domain::new("example.com")).await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_cached_classification() {
        let source = Arc::new(StaticMetricsSource::idle());
        source.set_domains(vec![detail("example.com", 90, 0)]);

        let config = DomainHealthConfig {
            cache_ttl_secs: 0,
            ..Default::default()
        };
        let tracker = DomainHealthTracker::new(source.clone(), config);
        assert_eq!(
            tracker.classify(&Domain::new("example.com")).await.class,
            DomainClass::Backoff
        );

        source.set_unreachable(true);
        assert_eq!(
            tracker.classify(&Domain::new("example.com")).await.class,
            DomainClass::Backoff,
            "cached sample survives an unreachable refresh"
        );
    }

    #[test]
    fn test_slow_thresholds_clamped_to_backoff() {
        let config = DomainHealthConfig {
            slow_deferrals: 100,
            backoff_deferrals: 80,
            ..Default::default()
        }
        .clamped();
        assert_eq!(config.slow_deferrals, 80);
    }
}

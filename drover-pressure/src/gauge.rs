//! Global pressure sampling.
//!
//! Five metric series (queued recipients/messages, spool
//! recipients/messages, deferred count) each carry an ordered threshold
//! triple. A series' level is how many of its thresholds the current
//! value exceeds; the snapshot level is the max across series, so one
//! overloaded resource dominates. Each nonzero level maps to a bundle of
//! dispatch restrictions.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use drover_common::Signal;

use crate::source::{MetricsSource, QueueSummary};

/// Ordered threshold triples per metric series.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PressureThresholds {
    #[serde(default = "defaults::queued_recipients")]
    pub queued_recipients: [u64; 3],
    #[serde(default = "defaults::queued_messages")]
    pub queued_messages: [u64; 3],
    #[serde(default = "defaults::spool_recipients")]
    pub spool_recipients: [u64; 3],
    #[serde(default = "defaults::spool_messages")]
    pub spool_messages: [u64; 3],
    #[serde(default = "defaults::deferred")]
    pub deferred: [u64; 3],
}

impl Default for PressureThresholds {
    fn default() -> Self {
        Self {
            queued_recipients: defaults::queued_recipients(),
            queued_messages: defaults::queued_messages(),
            spool_recipients: defaults::spool_recipients(),
            spool_messages: defaults::spool_messages(),
            deferred: defaults::deferred(),
        }
    }
}

mod defaults {
    pub const fn queued_recipients() -> [u64; 3] {
        [60_000, 120_000, 250_000]
    }

    pub const fn queued_messages() -> [u64; 3] {
        [60_000, 120_000, 250_000]
    }

    pub const fn spool_recipients() -> [u64; 3] {
        [30_000, 80_000, 150_000]
    }

    pub const fn spool_messages() -> [u64; 3] {
        [30_000, 80_000, 150_000]
    }

    pub const fn deferred() -> [u64; 3] {
        [5_000, 20_000, 50_000]
    }

    pub const fn sample_interval_secs() -> u64 {
        15
    }
}

/// Dispatch restrictions applied at one pressure level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelParams {
    /// Delay floor before each chunk submission, milliseconds.
    pub delay_ms: u64,
    /// Concurrent-chunk cap per job. Zero halts dispatch entirely.
    pub worker_cap: u32,
    /// Recipients-per-chunk cap.
    pub chunk_cap: u32,
    /// Minimum sleep between dispatch cycles, milliseconds.
    pub min_sleep_ms: u64,
}

const fn level1_params() -> LevelParams {
    LevelParams {
        delay_ms: 500,
        worker_cap: 6,
        chunk_cap: 40,
        min_sleep_ms: 500,
    }
}

const fn level2_params() -> LevelParams {
    LevelParams {
        delay_ms: 2_000,
        worker_cap: 3,
        chunk_cap: 20,
        min_sleep_ms: 2_000,
    }
}

const fn level3_params() -> LevelParams {
    LevelParams {
        delay_ms: 15_000,
        worker_cap: 0,
        chunk_cap: 10,
        min_sleep_ms: 15_000,
    }
}

/// Gauge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PressureConfig {
    #[serde(default = "defaults::sample_interval_secs")]
    pub sample_interval_secs: u64,

    /// Fail closed: treat an unreachable metrics source as level 3
    /// instead of retaining the last snapshot.
    #[serde(default)]
    pub strict: bool,

    #[serde(default)]
    pub thresholds: PressureThresholds,

    #[serde(default = "level1_params")]
    pub level1: LevelParams,
    #[serde(default = "level2_params")]
    pub level2: LevelParams,
    #[serde(default = "level3_params")]
    pub level3: LevelParams,
}

impl Default for PressureConfig {
    fn default() -> Self {
        Self {
            sample_interval_secs: defaults::sample_interval_secs(),
            strict: false,
            thresholds: PressureThresholds::default(),
            level1: level1_params(),
            level2: level2_params(),
            level3: level3_params(),
        }
    }
}

/// Restrictions in effect for the current snapshot. Level 0 imposes
/// nothing beyond job-configured defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveParams {
    pub delay_ms: u64,
    pub worker_cap: Option<u32>,
    pub chunk_cap: Option<u32>,
    pub min_sleep_ms: u64,
}

/// One sampled view of overall MTA load. Replaced wholesale every
/// sample; never merged with its predecessor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PressureSnapshot {
    pub summary: QueueSummary,
    pub level: u8,
    pub params: EffectiveParams,
    /// The sample behind this snapshot could not be refreshed; the
    /// values are the last known ones and still authoritative.
    pub stale: bool,
    pub sampled_at: DateTime<Utc>,
}

impl PressureSnapshot {
    fn idle() -> Self {
        Self {
            summary: QueueSummary::default(),
            level: 0,
            params: EffectiveParams::default(),
            stale: true,
            sampled_at: Utc::now(),
        }
    }
}

/// Pre-start busy gate thresholds. Separate from the pressure triples:
/// this is a single yes/no "too busy to admit new work" check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct HealthGateConfig {
    /// Refuse to start when busy; otherwise start with a warning
    /// recorded on the job.
    #[serde(default)]
    pub required: bool,

    #[serde(default = "gate_defaults::queued_recipients")]
    pub max_queued_recipients: u64,
    #[serde(default = "gate_defaults::queued_messages")]
    pub max_queued_messages: u64,
    #[serde(default = "gate_defaults::spool_recipients")]
    pub max_spool_recipients: u64,
    #[serde(default = "gate_defaults::spool_messages")]
    pub max_spool_messages: u64,
}

impl Default for HealthGateConfig {
    fn default() -> Self {
        Self {
            required: false,
            max_queued_recipients: gate_defaults::queued_recipients(),
            max_queued_messages: gate_defaults::queued_messages(),
            max_spool_recipients: gate_defaults::spool_recipients(),
            max_spool_messages: gate_defaults::spool_messages(),
        }
    }
}

mod gate_defaults {
    pub const fn queued_recipients() -> u64 {
        200_000
    }

    pub const fn queued_messages() -> u64 {
        200_000
    }

    pub const fn spool_recipients() -> u64 {
        120_000
    }

    pub const fn spool_messages() -> u64 {
        120_000
    }
}

/// Periodic sampler producing [`PressureSnapshot`]s for all running
/// jobs to read.
#[derive(Debug)]
pub struct PressureGauge {
    source: Arc<dyn MetricsSource>,
    config: PressureConfig,
    current: RwLock<Arc<PressureSnapshot>>,
}

impl PressureGauge {
    #[must_use]
    pub fn new(source: Arc<dyn MetricsSource>, config: PressureConfig) -> Self {
        Self {
            source,
            config,
            current: RwLock::new(Arc::new(PressureSnapshot::idle())),
        }
    }

    /// The latest snapshot. Cheap; taken by every dispatch cycle.
    #[must_use]
    pub fn current(&self) -> Arc<PressureSnapshot> {
        self.current.read().clone()
    }

    /// Take one sample and publish the resulting snapshot.
    pub async fn sample(&self) -> Arc<PressureSnapshot> {
        let snapshot = match self.source.queue_summary().await {
            Ok(summary) => {
                let level = self.level_for(summary);
                debug!(level, queued = summary.queued_recipients, "pressure sampled");
                Arc::new(PressureSnapshot {
                    summary,
                    level,
                    params: self.params_for(level),
                    stale: false,
                    sampled_at: Utc::now(),
                })
            }
            Err(e) if self.config.strict => {
                warn!(error = %e, "metrics unreachable in strict mode, failing closed");
                let summary = self.current().summary;
                Arc::new(PressureSnapshot {
                    summary,
                    level: 3,
                    params: self.params_for(3),
                    stale: true,
                    sampled_at: Utc::now(),
                })
            }
            Err(e) => {
                warn!(error = %e, "metrics unreachable, retaining last snapshot");
                let mut retained = (*self.current()).clone();
                retained.stale = true;
                Arc::new(retained)
            }
        };

        *self.current.write() = snapshot.clone();
        snapshot
    }

    /// Sample on the configured interval until shutdown.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<Signal>) {
        let interval = std::time::Duration::from_secs(self.config.sample_interval_secs.max(1));
        loop {
            self.sample().await;
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                _ = shutdown.recv() => {
                    debug!("pressure sampler shutting down");
                    break;
                }
            }
        }
    }

    /// Pre-start busy check: the first exceeded gate threshold, if any.
    #[must_use]
    pub fn gate_violation(&self, gate: &HealthGateConfig) -> Option<String> {
        let summary = self.current().summary;
        let checks = [
            ("queued recipients", summary.queued_recipients, gate.max_queued_recipients),
            ("queued messages", summary.queued_messages, gate.max_queued_messages),
            ("spool recipients", summary.spool_recipients, gate.max_spool_recipients),
            ("spool messages", summary.spool_messages, gate.max_spool_messages),
        ];

        checks
            .iter()
            .find(|(_, value, max)| value > max)
            .map(|(what, value, max)| format!("{what} {value} over busy threshold {max}"))
    }

    fn level_for(&self, summary: QueueSummary) -> u8 {
        let t = &self.config.thresholds;
        [
            series_level(summary.queued_recipients, t.queued_recipients),
            series_level(summary.queued_messages, t.queued_messages),
            series_level(summary.spool_recipients, t.spool_recipients),
            series_level(summary.spool_messages, t.spool_messages),
            series_level(summary.deferred_count, t.deferred),
        ]
        .into_iter()
        .max()
        .unwrap_or(0)
    }

    fn params_for(&self, level: u8) -> EffectiveParams {
        let params = match level {
            0 => return EffectiveParams::default(),
            1 => self.config.level1,
            2 => self.config.level2,
            _ => self.config.level3,
        };
        EffectiveParams {
            delay_ms: params.delay_ms,
            worker_cap: Some(params.worker_cap),
            chunk_cap: Some(params.chunk_cap),
            min_sleep_ms: params.min_sleep_ms,
        }
    }
}

/// How many of the ordered thresholds the value strictly exceeds.
fn series_level(value: u64, thresholds: [u64; 3]) -> u8 {
    let exceeded = thresholds.into_iter().filter(|t| value > *t).count();
    u8::try_from(exceeded).unwrap_or(3)
}

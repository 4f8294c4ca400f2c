//! Per-job dispatch engine.
//!
//! Owns the job's buckets and rotation state exclusively. Spawns a
//! bounded pool of workers that pull chunks off the rotation, run them
//! through the scheduler, and advance cursors on terminal state. The
//! sender index belongs to the rotation, not to individual chunks: it
//! advances once per completed rotation pass.

use std::{collections::VecDeque, sync::Arc, time::Duration};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::{sync::Notify, task::JoinSet};
use tracing::{debug, error, info, warn};

use drover_common::{Domain, Job, JobCountersSnapshot, JobStatus, dispatch};
use drover_pressure::{DomainClass, DomainHealthTracker, PressureGauge, PressureSnapshot};
use drover_store::{JobRow, Store};

use crate::{
    bucket::{DestinationBucket, PartitionOutcome},
    chunk::Chunk,
    scheduler::{ChunkDisposition, ChunkScheduler},
};

/// Automatic pause on runaway bounce/complaint rates, checked once per
/// dispatch cycle against the job's own counters.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct KillSwitchConfig {
    #[serde(default = "kill_defaults::enabled")]
    pub enabled: bool,

    /// Attempted-count floor below which rates are not judged.
    #[serde(default = "kill_defaults::min_sample")]
    pub min_sample: u64,

    #[serde(default = "kill_defaults::max_bounce_rate")]
    pub max_bounce_rate: f64,

    #[serde(default = "kill_defaults::max_complaint_rate")]
    pub max_complaint_rate: f64,
}

impl Default for KillSwitchConfig {
    fn default() -> Self {
        Self {
            enabled: kill_defaults::enabled(),
            min_sample: kill_defaults::min_sample(),
            max_bounce_rate: kill_defaults::max_bounce_rate(),
            max_complaint_rate: kill_defaults::max_complaint_rate(),
        }
    }
}

mod kill_defaults {
    pub const fn enabled() -> bool {
        true
    }

    pub const fn min_sample() -> u64 {
        500
    }

    pub const fn max_bounce_rate() -> f64 {
        0.05
    }

    pub const fn max_complaint_rate() -> f64 {
        0.001
    }
}

impl KillSwitchConfig {
    #[allow(clippy::cast_precision_loss)]
    #[must_use]
    pub fn tripped(&self, counters: &JobCountersSnapshot) -> bool {
        if !self.enabled || counters.attempted < self.min_sample.max(1) {
            return false;
        }
        let attempted = counters.attempted as f64;
        counters.bounced as f64 / attempted >= self.max_bounce_rate
            || counters.complained as f64 / attempted >= self.max_complaint_rate
    }
}

/// Engine configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Worker poll tick while blocked (no buildable chunk, saturated
    /// cap, or paused), milliseconds.
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    #[serde(default)]
    pub kill_switch: KillSwitchConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_ms: default_tick_ms(),
            kill_switch: KillSwitchConfig::default(),
        }
    }
}

const fn default_tick_ms() -> u64 {
    200
}

/// Bucket rotation and concurrency bookkeeping, guarded by one mutex
/// per job. Lock scopes are short and never held across awaits.
#[derive(Debug)]
struct RotationState {
    buckets: Vec<DestinationBucket>,
    /// Bucket indices still owed a chunk in the current pass.
    pass: VecDeque<usize>,
    sender_index: usize,
    served_in_pass: usize,
    in_flight: usize,
}

impl RotationState {
    fn all_done(&self) -> bool {
        self.in_flight == 0 && self.buckets.iter().all(|b| b.remaining() == 0)
    }
}

/// One running job's dispatcher.
#[derive(Debug)]
pub struct DispatchEngine {
    job: Arc<Job>,
    scheduler: Arc<ChunkScheduler>,
    gauge: Arc<PressureGauge>,
    health: Arc<DomainHealthTracker>,
    store: Arc<dyn Store>,
    config: EngineConfig,
    state: Mutex<RotationState>,
    /// Woken on chunk completion and resume, so blocked workers re-check.
    wake: Notify,
    /// Woken on stop/pause, so retry waits cut short.
    halt: Notify,
}

impl DispatchEngine {
    #[must_use]
    pub fn new(
        job: Arc<Job>,
        partition: PartitionOutcome,
        scheduler: Arc<ChunkScheduler>,
        gauge: Arc<PressureGauge>,
        health: Arc<DomainHealthTracker>,
        store: Arc<dyn Store>,
        config: EngineConfig,
    ) -> Self {
        Self {
            job,
            scheduler,
            gauge,
            health,
            store,
            config,
            state: Mutex::new(RotationState {
                buckets: partition.buckets,
                pass: VecDeque::new(),
                sender_index: 0,
                served_in_pass: 0,
                in_flight: 0,
            }),
            wake: Notify::new(),
            halt: Notify::new(),
        }
    }

    #[must_use]
    pub fn job(&self) -> Arc<Job> {
        Arc::clone(&self.job)
    }

    /// Run the job to a terminal state.
    pub async fn run(self: Arc<Self>) {
        // A pause can land before the first poll; don't clobber it.
        if self.job.status() == JobStatus::Queued {
            self.job.set_status(JobStatus::Running);
        }
        if let Err(e) = self.persist().await {
            self.job.fail(format!("store unavailable at start: {e}"));
            return;
        }

        dispatch!(
            level = INFO,
            "job {} for campaign {} started: {} recipients, {} workers",
            self.job.id,
            self.job.campaign_id,
            self.job.total_recipients(),
            self.job.worker_limit
        );

        let workers = self.job.worker_limit.max(1) as usize;
        let mut pool: JoinSet<()> = JoinSet::new();
        for worker in 0..workers {
            let engine = Arc::clone(&self);
            pool.spawn(async move { engine.worker_loop(worker).await });
        }
        while pool.join_next().await.is_some() {}

        if let Err(e) = self.persist().await {
            warn!(job = %self.job.id, error = %e, "final job row write failed");
        }

        dispatch!(
            level = INFO,
            "job {} finished as {}: {:?}",
            self.job.id,
            self.job.status(),
            self.job.counters.snapshot()
        );
    }

    /// Stop further chunk creation; in-flight chunks finish their
    /// current attempt and halt.
    pub fn stop(&self) {
        if !self.job.status().is_terminal() {
            self.job.set_status(JobStatus::Stopped);
            self.halt.notify_waiters();
            self.wake.notify_waiters();
        }
    }

    pub fn pause(&self) {
        if matches!(
            self.job.status(),
            JobStatus::Queued | JobStatus::Running | JobStatus::Backoff
        ) {
            self.job.set_status(JobStatus::Paused);
            self.halt.notify_waiters();
        }
    }

    pub fn resume(&self) {
        if self.job.status() == JobStatus::Paused {
            self.job.set_status(JobStatus::Running);
            self.wake.notify_waiters();
        }
    }

    async fn worker_loop(self: Arc<Self>, worker: usize) {
        let tick = Duration::from_millis(self.config.tick_ms.max(10));
        loop {
            match self.job.status() {
                JobStatus::Stopped | JobStatus::Failed | JobStatus::Completed => break,
                JobStatus::Paused => {
                    let _ = tokio::time::timeout(tick, self.wake.notified()).await;
                    continue;
                }
                JobStatus::Queued | JobStatus::Running | JobStatus::Backoff => {}
            }

            let counters = self.job.counters.snapshot();
            if self.config.kill_switch.tripped(&counters) {
                warn!(
                    job = %self.job.id,
                    attempted = counters.attempted,
                    bounced = counters.bounced,
                    complained = counters.complained,
                    "kill switch tripped, pausing job"
                );
                self.job
                    .record_warning("kill switch: bounce/complaint rate over threshold");
                self.job.set_status(JobStatus::Paused);
                self.halt.notify_waiters();
                continue;
            }

            let pressure = self.gauge.current();
            let cap = self.effective_worker_cap(&pressure).await;
            if cap == 0 {
                if self.job.status() == JobStatus::Running {
                    debug!(job = %self.job.id, level = pressure.level, "pressure halt, entering backoff");
                    self.job.set_status(JobStatus::Backoff);
                }
                let sleep = Duration::from_millis(pressure.params.min_sleep_ms.max(self.config.tick_ms));
                tokio::time::sleep(sleep).await;
                continue;
            }
            if self.job.status() == JobStatus::Backoff {
                debug!(job = %self.job.id, "pressure eased, resuming dispatch");
                self.job.set_status(JobStatus::Running);
            }

            let next = {
                let mut state = self.state.lock();
                if state.in_flight >= cap as usize {
                    None
                } else {
                    self.next_chunk(&mut state, &pressure)
                }
            };

            let Some((bucket_idx, mut chunk)) = next else {
                if self.try_complete() {
                    break;
                }
                let _ = tokio::time::timeout(tick, self.wake.notified()).await;
                continue;
            };

            debug!(
                job = %self.job.id,
                worker,
                domain = %chunk.domain,
                recipients = chunk.recipients.len(),
                sender = chunk.sender_index,
                "chunk built"
            );

            let disposition = self
                .scheduler
                .run_chunk(&self.job, &mut chunk, &self.halt)
                .await;

            {
                let mut state = self.state.lock();
                state.in_flight -= 1;
                let bucket = &mut state.buckets[bucket_idx];
                match disposition {
                    ChunkDisposition::Sent | ChunkDisposition::Abandoned => {
                        bucket.finish_chunk(chunk.recipients.len());
                    }
                    ChunkDisposition::Halted => bucket.release_chunk(),
                }
            }
            self.wake.notify_waiters();

            if matches!(
                disposition,
                ChunkDisposition::Sent | ChunkDisposition::Abandoned
            ) {
                if let Err(e) = self.persist().await {
                    error!(job = %self.job.id, error = %e, "job row write failed, failing job");
                    self.job.fail(format!("store unavailable: {e}"));
                    self.halt.notify_waiters();
                    self.wake.notify_waiters();
                    break;
                }
            }

            if self.try_complete() {
                break;
            }

            // Minimum inter-cycle sleep under elevated pressure.
            if pressure.params.min_sleep_ms > 0 {
                tokio::time::sleep(Duration::from_millis(pressure.params.min_sleep_ms)).await;
            }
        }
    }

    /// `min(job worker limit, pressure cap, slow cap when any active
    /// bucket is slow)`.
    async fn effective_worker_cap(&self, pressure: &PressureSnapshot) -> u32 {
        let mut cap = self.job.worker_limit.max(1);
        if let Some(worker_cap) = pressure.params.worker_cap {
            cap = cap.min(worker_cap);
        }

        let active_domains: Vec<Domain> = {
            let state = self.state.lock();
            state
                .buckets
                .iter()
                .filter(|b| b.remaining() > 0 || b.is_in_flight())
                .map(|b| b.domain.clone())
                .collect()
        };
        for domain in active_domains {
            if self.health.classify(&domain).await.class == DomainClass::Slow {
                cap = cap.min(self.health.config().slow_worker_cap);
                break;
            }
        }
        cap
    }

    /// Pull the next buildable chunk off the rotation. The sender for
    /// a chunk is the rotation's current sender at build time.
    fn next_chunk(
        &self,
        state: &mut RotationState,
        pressure: &PressureSnapshot,
    ) -> Option<(usize, Chunk)> {
        if state.pass.is_empty() {
            Self::refill_pass(state, self.job.senders.len());
        }

        let chunk_cap = pressure
            .params
            .chunk_cap
            .map_or(self.job.chunk_size, |cap| cap.min(self.job.chunk_size))
            .max(1) as usize;

        while let Some(idx) = state.pass.pop_front() {
            let sender_index = state.sender_index;
            let bucket = &mut state.buckets[idx];
            if bucket.is_in_flight() || bucket.remaining() == 0 {
                continue;
            }
            let recipients = bucket.begin_chunk(chunk_cap);
            if recipients.is_empty() {
                continue;
            }
            let domain = bucket.domain.clone();
            state.served_in_pass += 1;
            state.in_flight += 1;
            return Some((
                idx,
                Chunk::new(self.job.id, domain, recipients, sender_index),
            ));
        }
        None
    }

    /// Start a fresh pass over every serviceable bucket. Completing a
    /// pass (having served every bucket in it) advances the job's
    /// sender index by one, wrapping around the sender list.
    fn refill_pass(state: &mut RotationState, sender_count: usize) {
        if state.served_in_pass > 0 {
            state.sender_index = (state.sender_index + 1) % sender_count.max(1);
            state.served_in_pass = 0;
        }
        state.pass = state
            .buckets
            .iter()
            .enumerate()
            .filter(|(_, b)| b.remaining() > 0 && !b.is_in_flight())
            .map(|(i, _)| i)
            .collect();
    }

    /// Completion: every bucket fully progressed and nothing in flight.
    fn try_complete(&self) -> bool {
        let done = {
            let state = self.state.lock();
            state.all_done()
        };
        // A job paused at the very moment its last chunk resolved is
        // still complete.
        if done
            && matches!(
                self.job.status(),
                JobStatus::Running | JobStatus::Backoff | JobStatus::Paused
            )
        {
            self.job.set_status(JobStatus::Completed);
            self.wake.notify_waiters();
            info!(
                job = %self.job.id,
                abandoned = self.job.counters.snapshot().abandoned,
                "job completed"
            );
        }
        done || self.job.status().is_terminal()
    }

    async fn persist(&self) -> Result<(), drover_store::StoreError> {
        // Bounded retry: row writes contend with the accounting poller.
        let row = JobRow::of_job(&self.job);
        let mut last = None;
        for _ in 0..3 {
            match self.store.save_job(&row).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last = Some(e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
        Err(last.unwrap_or(drover_store::StoreError::WritesUnavailable))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kill_switch_needs_minimum_sample() {
        let config = KillSwitchConfig {
            min_sample: 500,
            ..Default::default()
        };
        let counters = JobCountersSnapshot {
            attempted: 100,
            bounced: 100,
            ..Default::default()
        };
        assert!(!config.tripped(&counters), "below sample floor");
    }

    #[test]
    fn test_kill_switch_trips_on_bounce_rate() {
        let config = KillSwitchConfig::default();
        let counters = JobCountersSnapshot {
            attempted: 1_000,
            bounced: 60,
            ..Default::default()
        };
        assert!(config.tripped(&counters));
    }

    #[test]
    fn test_kill_switch_trips_on_complaint_rate() {
        let config = KillSwitchConfig::default();
        let counters = JobCountersSnapshot {
            attempted: 10_000,
            complained: 12,
            ..Default::default()
        };
        assert!(config.tripped(&counters));
    }

    #[test]
    fn test_kill_switch_quiet_on_healthy_rates() {
        let config = KillSwitchConfig::default();
        let counters = JobCountersSnapshot {
            attempted: 10_000,
            bounced: 100,
            complained: 2,
            ..Default::default()
        };
        assert!(!config.tripped(&counters));
    }

    #[test]
    fn test_kill_switch_disabled() {
        let config = KillSwitchConfig {
            enabled: false,
            ..Default::default()
        };
        let counters = JobCountersSnapshot {
            attempted: 10_000,
            bounced: 10_000,
            ..Default::default()
        };
        assert!(!config.tripped(&counters));
    }
}

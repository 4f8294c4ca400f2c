//! The per-chunk decision state machine.
//!
//! `pending -> attempting -> {sent | retry_wait -> attempting | abandoned}`
//!
//! The scheduler reads the pressure snapshot and the domain class on
//! every attempt, waits out backoff-classified domains with exponential
//! backoff, applies slow-mode delays, and hands accepted chunks to the
//! transport. It owns nothing: pressure and domain health are injected
//! read-only views, and the engine applies the worker/chunk caps.

use std::{sync::Arc, time::Duration};

use tokio::sync::Notify;
use tracing::{debug, warn};

use drover_common::{Job, JobStatus};
use drover_pressure::{DomainClass, DomainHealthTracker, PressureGauge};

use crate::{
    chunk::{Chunk, ChunkState},
    clock::Clock,
    retry::RetryPolicy,
    transport::ChunkTransport,
};

/// Terminal result of driving one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkDisposition {
    /// Accepted by the MTA; the bucket cursor advances.
    Sent,
    /// Retries exhausted; the cursor advances and the recipients are
    /// counted abandoned.
    Abandoned,
    /// The job stopped or paused between attempts; the cursor does not
    /// move and the bucket is released.
    Halted,
}

/// Drives chunks through their state machine. One scheduler is shared
/// by every engine; all per-chunk state lives on the chunk itself.
#[derive(Debug)]
pub struct ChunkScheduler {
    gauge: Arc<PressureGauge>,
    health: Arc<DomainHealthTracker>,
    retry: RetryPolicy,
    transport: Arc<dyn ChunkTransport>,
    clock: Arc<dyn Clock>,
}

impl ChunkScheduler {
    #[must_use]
    pub fn new(
        gauge: Arc<PressureGauge>,
        health: Arc<DomainHealthTracker>,
        retry: RetryPolicy,
        transport: Arc<dyn ChunkTransport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            gauge,
            health,
            retry,
            transport,
            clock,
        }
    }

    #[must_use]
    pub const fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Drive one chunk to a terminal state.
    ///
    /// `halt` is notified by the engine on stop/pause so a chunk deep
    /// in a retry wait reacts promptly; the current attempt itself is
    /// never interrupted mid-submission.
    pub async fn run_chunk(&self, job: &Job, chunk: &mut Chunk, halt: &Notify) -> ChunkDisposition {
        loop {
            match job.status() {
                JobStatus::Running | JobStatus::Backoff => {}
                _ => return ChunkDisposition::Halted,
            }

            if self.retry.should_abandon(chunk.attempt) {
                chunk.state = ChunkState::Abandoned;
                job.counters.add_abandoned(chunk.len());
                warn!(
                    job = %job.id,
                    domain = %chunk.domain,
                    recipients = chunk.recipients.len(),
                    attempts = chunk.attempt,
                    "chunk abandoned after retry exhaustion"
                );
                return ChunkDisposition::Abandoned;
            }

            chunk.state = ChunkState::Attempting;
            let pressure = self.gauge.current();
            let status = self.health.classify(&chunk.domain).await;

            if status.class == DomainClass::Backoff {
                debug!(
                    job = %job.id,
                    domain = %chunk.domain,
                    deferrals = status.deferrals,
                    errors = status.errors,
                    attempt = chunk.attempt,
                    "domain in backoff, waiting"
                );
                self.wait_retry(chunk, halt).await;
                continue;
            }

            // Slow domains and elevated pressure both impose a delay
            // floor before the attempt; the larger one wins.
            let mut delay_ms = pressure.params.delay_ms;
            if status.class == DomainClass::Slow {
                delay_ms = delay_ms.max(self.health.config().slow_delay_ms);
            }
            if delay_ms > 0 {
                self.clock.sleep(Duration::from_millis(delay_ms)).await;
            }

            match self.transport.submit(job, chunk).await {
                Ok(()) => {
                    chunk.state = ChunkState::Sent;
                    job.counters.add_attempted(chunk.len());
                    return ChunkDisposition::Sent;
                }
                Err(e) => {
                    debug!(
                        job = %job.id,
                        domain = %chunk.domain,
                        attempt = chunk.attempt,
                        transient = e.is_transient(),
                        error = %e,
                        "chunk submission failed"
                    );
                    self.wait_retry(chunk, halt).await;
                }
            }
        }
    }

    /// `retry_wait`: sleep out the backoff, then advance the attempt
    /// counter and rotate the sender/variant pairing.
    async fn wait_retry(&self, chunk: &mut Chunk, halt: &Notify) {
        let wait = self.retry.next_wait(chunk.attempt);
        chunk.state = ChunkState::RetryWait;
        tokio::select! {
            () = self.clock.sleep(wait) => {}
            () = halt.notified() => {}
        }
        chunk.attempt += 1;
        chunk.rotate_variant();
    }
}

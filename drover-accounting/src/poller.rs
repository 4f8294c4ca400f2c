//! The accounting poller.
//!
//! Each cycle: load the persisted cursor row, pull a batch from the
//! bridge, walk the records in bridge order (dedup, resolve, apply),
//! then advance and persist the cursor only if every resolved record's
//! durable write landed. A failed write leaves the cursor behind so the
//! next cycle replays the batch; the hash window keeps the replay from
//! double-counting the records that did land.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::sync::{Notify, broadcast};
use tracing::{debug, warn};

use drover_common::{Signal, TuningResolver, accounting};
use drover_store::{BridgeCursorState, Store};

use crate::{
    bridge::{BridgeClient, BridgeStatus, PullRequest},
    error::{BridgeError, PollerError},
    record::AccountingEvent,
    resolve::{ActiveJobs, ResolverChain},
};

/// Poller configuration. Interval and batch size resolve through the
/// layered tuning, not here.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PollerConfig {
    /// Ingestion source kind, the cursor row key.
    #[serde(default = "defaults::source_kind")]
    pub source_kind: String,

    /// Bounded retries for one durable counter write.
    #[serde(default = "defaults::write_retries")]
    pub write_retries: u32,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            source_kind: defaults::source_kind(),
            write_retries: defaults::write_retries(),
        }
    }
}

mod defaults {
    pub fn source_kind() -> String {
        "acct".to_string()
    }

    pub const fn write_retries() -> u32 {
        3
    }
}

/// What one poll cycle did, for logs and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollOutcome {
    pub received: u64,
    pub ingested: u64,
    pub duplicates: u64,
    pub not_found: u64,
    pub write_failures: u64,
    pub cursor_advanced: bool,
    pub has_more: bool,
}

/// Pulls outcome batches from the bridge and reconciles them into job
/// counters.
#[derive(Debug)]
pub struct AccountingPoller {
    bridge: Arc<dyn BridgeClient>,
    store: Arc<dyn Store>,
    jobs: Arc<dyn ActiveJobs>,
    tuning: Arc<TuningResolver>,
    chain: ResolverChain,
    config: PollerConfig,
    pull_now: Notify,
}

impl AccountingPoller {
    #[must_use]
    pub fn new(
        bridge: Arc<dyn BridgeClient>,
        store: Arc<dyn Store>,
        jobs: Arc<dyn ActiveJobs>,
        tuning: Arc<TuningResolver>,
        config: PollerConfig,
    ) -> Self {
        Self {
            bridge,
            store,
            jobs,
            tuning,
            chain: ResolverChain::default(),
            config,
            pull_now: Notify::new(),
        }
    }

    /// Ask the run loop to poll immediately instead of waiting out the
    /// interval (the control surface's "pull now").
    pub fn trigger(&self) {
        self.pull_now.notify_one();
    }

    /// The persisted cursor row, for status queries.
    pub async fn cursor_row(&self) -> Option<BridgeCursorState> {
        self.store
            .load_cursor(&self.config.source_kind)
            .await
            .ok()
            .flatten()
    }

    /// The bridge's own diagnostic state, passed through untouched.
    pub async fn bridge_status(&self) -> Result<BridgeStatus, BridgeError> {
        self.bridge.status().await
    }

    /// One poll cycle.
    ///
    /// # Errors
    ///
    /// Bridge and cursor-row failures; both leave the persisted cursor
    /// untouched so nothing is lost.
    pub async fn poll_once(&self) -> Result<PollOutcome, PollerError> {
        let mut state = self
            .store
            .load_cursor(&self.config.source_kind)
            .await?
            .unwrap_or_else(|| BridgeCursorState::new(self.config.source_kind.clone()));

        let tuning = self.tuning.effective();
        let request = PullRequest {
            source_kind: self.config.source_kind.clone(),
            cursor_token: state.cursor_token.clone(),
            max_records: tuning.accounting_max_records,
        };

        let response = match self.bridge.pull(&request).await {
            Ok(response) => response,
            Err(e) => {
                state.last_error = Some(e.to_string());
                state.last_poll_time = Some(Utc::now());
                if let Err(save) = self.store.save_cursor(&state).await {
                    warn!(error = %save, "cursor row write failed after bridge error");
                }
                return Err(e.into());
            }
        };

        let mut outcome = PollOutcome {
            received: response.records.len() as u64,
            has_more: response.has_more.unwrap_or(false),
            ..Default::default()
        };
        state.events_received += outcome.received;

        let mut batch_clean = true;
        for record in &response.records {
            let event = AccountingEvent::from_record(record);

            if state.seen.contains(&event.hash) {
                outcome.duplicates += 1;
                state.duplicates_dropped += 1;
                continue;
            }

            let Some(job) = self.chain.resolve(&event, self.jobs.as_ref()) else {
                // Recorded as seen anyway: an unresolvable record will
                // not resolve better on replay.
                outcome.not_found += 1;
                state.job_not_found += 1;
                state.seen.insert(event.hash);
                continue;
            };

            match self.apply_outcome(&event, &job).await {
                Ok(()) => {
                    outcome.ingested += 1;
                    state.events_ingested += 1;
                    state.seen.insert(event.hash);
                }
                Err(e) => {
                    outcome.write_failures += 1;
                    state.db_write_failures += 1;
                    state.last_error = Some(e.to_string());
                    batch_clean = false;
                    warn!(job = %job.id, error = %e, "outcome write failed, batch will replay");
                }
            }
        }

        if batch_clean {
            match response.next_cursor {
                Some(next) => {
                    outcome.cursor_advanced = state.cursor_token.as_deref() != Some(next.as_str());
                    state.cursor_token = Some(next);
                    state.last_error = None;
                }
                None => {
                    if !response.records.is_empty() {
                        warn!(
                            source_kind = %self.config.source_kind,
                            "bridge response carried no cursor; treating batch as consumed"
                        );
                    }
                }
            }
        }

        state.last_poll_time = Some(Utc::now());
        self.store.save_cursor(&state).await?;

        debug!(
            source_kind = %self.config.source_kind,
            received = outcome.received,
            ingested = outcome.ingested,
            duplicates = outcome.duplicates,
            not_found = outcome.not_found,
            write_failures = outcome.write_failures,
            has_more = outcome.has_more,
            "poll cycle finished"
        );
        Ok(outcome)
    }

    /// Durable counter write with bounded retry, then the in-memory
    /// mirror. The mirror moves only after the row is safe, so a crash
    /// between the two can only under-report in memory, never in the
    /// store.
    async fn apply_outcome(
        &self,
        event: &AccountingEvent,
        job: &drover_common::Job,
    ) -> Result<(), drover_store::StoreError> {
        let mut last = None;
        for attempt in 0..self.config.write_retries.max(1) {
            match self.store.record_outcome(job.id, event.outcome, 1).await {
                Ok(()) => {
                    job.counters.record_outcome(event.outcome, 1);
                    return Ok(());
                }
                Err(e) => {
                    debug!(job = %job.id, attempt, error = %e, "outcome write retry");
                    last = Some(e);
                    tokio::time::sleep(Duration::from_millis(25)).await;
                }
            }
        }
        Err(last.unwrap_or(drover_store::StoreError::WritesUnavailable))
    }

    /// Poll on the tuned interval until shutdown. A backlog
    /// (`has_more`) short-circuits the wait; so does `trigger`.
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<Signal>) {
        accounting!(
            level = INFO,
            "poller started for source {}",
            self.config.source_kind
        );
        loop {
            let drain_immediately = match self.poll_once().await {
                Ok(outcome) => outcome.has_more,
                Err(e) => {
                    warn!(error = %e, "poll cycle failed");
                    false
                }
            };

            if drain_immediately {
                // Backlog: go straight back for the next batch, only
                // checking for shutdown.
                if shutdown.try_recv().is_ok() {
                    break;
                }
                continue;
            }

            let interval =
                Duration::from_secs(self.tuning.effective().accounting_interval_secs.max(1));
            tokio::select! {
                () = tokio::time::sleep(interval) => {}
                () = self.pull_now.notified() => {
                    debug!("manual pull requested");
                }
                _ = shutdown.recv() => {
                    accounting!(level = INFO, "poller shutting down");
                    break;
                }
            }
        }
    }
}

//! Poller behaviour against a scripted bridge and stores.

use std::{collections::HashMap, sync::Arc, time::Duration};

use async_trait::async_trait;
use parking_lot::Mutex;

use drover_accounting::{
    AccountingPoller, ActiveJobs, BridgeClient, BridgeError, BridgeStatus, PollerConfig,
    PullRequest, PullResponse, RawRecord,
};
use drover_common::{Campaign, CampaignId, Job, JobId, JobStatus, Signal, TuningResolver};
use drover_store::{JobRow, JobStore, MemoryStore, Store};

/// Serves a fixed response per cursor value and records every request.
#[derive(Debug, Default)]
struct ScriptedBridge {
    routes: Mutex<HashMap<Option<String>, PullResponse>>,
    requests: Mutex<Vec<Option<String>>>,
}

impl ScriptedBridge {
    fn route(&self, cursor: Option<&str>, response: PullResponse) {
        self.routes
            .lock()
            .insert(cursor.map(ToString::to_string), response);
    }
}

#[async_trait]
impl BridgeClient for ScriptedBridge {
    async fn pull(&self, request: &PullRequest) -> Result<PullResponse, BridgeError> {
        self.requests.lock().push(request.cursor_token.clone());
        Ok(self
            .routes
            .lock()
            .get(&request.cursor_token)
            .cloned()
            .unwrap_or_default())
    }

    async fn status(&self) -> Result<BridgeStatus, BridgeError> {
        Ok(BridgeStatus::default())
    }
}

/// Minimal registry view over a fixed job list.
#[derive(Debug, Default)]
struct StubRegistry {
    jobs: Mutex<Vec<Arc<Job>>>,
}

impl ActiveJobs for StubRegistry {
    fn find(&self, id: JobId) -> Option<Arc<Job>> {
        self.jobs.lock().iter().find(|j| j.id == id).cloned()
    }

    fn active_for_campaign(&self, campaign_id: &CampaignId) -> Vec<Arc<Job>> {
        let mut jobs: Vec<Arc<Job>> = self
            .jobs
            .lock()
            .iter()
            .filter(|j| &j.campaign_id == campaign_id && j.status().is_active())
            .cloned()
            .collect();
        jobs.sort_by(|a, b| {
            b.started_at
                .cmp(&a.started_at)
                .then_with(|| b.id.to_string().cmp(&a.id.to_string()))
        });
        jobs
    }
}

struct Harness {
    bridge: Arc<ScriptedBridge>,
    store: Arc<MemoryStore>,
    registry: Arc<StubRegistry>,
    poller: Arc<AccountingPoller>,
}

fn harness() -> Harness {
    let bridge = Arc::new(ScriptedBridge::default());
    let store = Arc::new(MemoryStore::new());
    let registry = Arc::new(StubRegistry::default());
    let poller = Arc::new(AccountingPoller::new(
        Arc::clone(&bridge) as Arc<dyn BridgeClient>,
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&registry) as Arc<dyn ActiveJobs>,
        Arc::new(TuningResolver::default()),
        PollerConfig::default(),
    ));
    Harness {
        bridge,
        store,
        registry,
        poller,
    }
}

async fn running_job(harness: &Harness, campaign: &str) -> Arc<Job> {
    let campaign = Campaign {
        id: CampaignId::new(campaign),
        name: String::new(),
        recipients: vec![],
        subjects: vec![],
        senders: vec![],
        chunk_size: None,
        worker_limit: None,
    };
    let job = Arc::new(Job::new(&campaign, 50, 4));
    job.set_status(JobStatus::Running);
    harness
        .store
        .save_job(&JobRow::of_job(&job))
        .await
        .unwrap();
    harness.registry.jobs.lock().push(Arc::clone(&job));
    job
}

fn record(outcome: &str, recipient: &str, job: Option<JobId>, campaign: Option<&str>) -> RawRecord {
    let mut map = serde_json::Map::new();
    map.insert(
        "raw".to_string(),
        serde_json::Value::String(format!("{outcome},{recipient}")),
    );
    map.insert(
        "type".to_string(),
        serde_json::Value::String(outcome.to_string()),
    );
    map.insert(
        "rcpt".to_string(),
        serde_json::Value::String(recipient.to_string()),
    );
    if let Some(job) = job {
        map.insert(
            "header_x-job-id".to_string(),
            serde_json::Value::String(job.to_string()),
        );
    }
    if let Some(campaign) = campaign {
        map.insert(
            "header_x-campaign-id".to_string(),
            serde_json::Value::String(campaign.to_string()),
        );
    }
    RawRecord(map)
}

fn batch(records: Vec<RawRecord>, next_cursor: Option<&str>, has_more: bool) -> PullResponse {
    PullResponse {
        ok: true,
        records,
        next_cursor: next_cursor.map(ToString::to_string),
        has_more: Some(has_more),
    }
}

#[tokio::test]
async fn test_batch_applies_outcomes_and_advances_cursor() {
    let harness = harness();
    let job = running_job(&harness, "camp-1").await;

    harness.bridge.route(
        None,
        batch(
            vec![
                record("d", "a@example.com", Some(job.id), None),
                record("b", "b@example.com", Some(job.id), None),
                record("t", "c@example.com", Some(job.id), None),
                record("c", "d@example.com", Some(job.id), None),
            ],
            Some("file:1:400"),
            false,
        ),
    );

    let outcome = harness.poller.poll_once().await.unwrap();
    assert_eq!(outcome.received, 4);
    assert_eq!(outcome.ingested, 4);
    assert!(outcome.cursor_advanced);

    let counters = job.counters.snapshot();
    assert_eq!(counters.delivered, 1);
    assert_eq!(counters.bounced, 1);
    assert_eq!(counters.deferred, 1);
    assert_eq!(counters.complained, 1);

    let row = harness.store.load_job(job.id).await.unwrap().unwrap();
    assert_eq!(row.counters.delivered, 1);

    let cursor = harness.poller.cursor_row().await.unwrap();
    assert_eq!(cursor.cursor_token.as_deref(), Some("file:1:400"));
    assert_eq!(cursor.events_ingested, 4);
}

#[tokio::test]
async fn test_replaying_a_batch_never_double_increments() {
    let harness = harness();
    let job = running_job(&harness, "camp-1").await;

    // Legacy bridge: no cursor fields, so the same batch is served on
    // every poll; only the hash window protects the counters.
    harness.bridge.route(
        None,
        PullResponse {
            ok: true,
            records: vec![
                record("d", "a@example.com", Some(job.id), None),
                record("d", "b@example.com", Some(job.id), None),
            ],
            next_cursor: None,
            has_more: None,
        },
    );

    let first = harness.poller.poll_once().await.unwrap();
    assert_eq!(first.ingested, 2);

    let second = harness.poller.poll_once().await.unwrap();
    assert_eq!(second.ingested, 0);
    assert_eq!(second.duplicates, 2);

    assert_eq!(job.counters.snapshot().delivered, 2);
    let cursor = harness.poller.cursor_row().await.unwrap();
    assert_eq!(cursor.events_received, 4);
    assert_eq!(cursor.duplicates_dropped, 2);
}

#[tokio::test]
async fn test_overlapping_batch_counts_duplicates_exactly() {
    let harness = harness();
    let job = running_job(&harness, "camp-1").await;

    let overlap: Vec<RawRecord> = (0..5)
        .map(|i| record("d", &format!("old{i}@example.com"), Some(job.id), None))
        .collect();
    let fresh: Vec<RawRecord> = (0..115)
        .map(|i| record("d", &format!("new{i}@example.com"), Some(job.id), None))
        .collect();

    harness
        .bridge
        .route(None, batch(overlap.clone(), Some("c1"), false));
    let mut second = overlap;
    second.extend(fresh);
    harness
        .bridge
        .route(Some("c1"), batch(second, Some("c2"), false));

    harness.poller.poll_once().await.unwrap();
    let outcome = harness.poller.poll_once().await.unwrap();

    assert_eq!(outcome.received, 120);
    assert_eq!(outcome.duplicates, 5);
    assert_eq!(outcome.ingested, 115);
    assert_eq!(job.counters.snapshot().delivered, 120);
}

#[tokio::test]
async fn test_write_failure_withholds_cursor_for_replay() {
    let harness = harness();
    let job = running_job(&harness, "camp-1").await;

    harness.bridge.route(
        None,
        batch(
            vec![
                record("d", "a@example.com", Some(job.id), None),
                record("d", "b@example.com", Some(job.id), None),
            ],
            Some("c1"),
            false,
        ),
    );

    harness.store.set_reject_writes(true);
    assert!(harness.poller.poll_once().await.is_err());
    assert_eq!(job.counters.snapshot().delivered, 0, "mirror untouched");

    harness.store.set_reject_writes(false);
    let outcome = harness.poller.poll_once().await.unwrap();
    assert_eq!(outcome.ingested, 2, "batch replayed after store recovery");
    assert_eq!(job.counters.snapshot().delivered, 2);

    let cursor = harness.poller.cursor_row().await.unwrap();
    assert_eq!(cursor.cursor_token.as_deref(), Some("c1"));

    // The bridge served the same cursor twice: once failed, once clean.
    assert_eq!(*harness.bridge.requests.lock(), vec![None, None]);
}

#[tokio::test]
async fn test_restart_resumes_exactly_at_persisted_cursor() {
    let harness = harness();
    let job = running_job(&harness, "camp-1").await;

    let batch_a: Vec<RawRecord> = (0..3)
        .map(|i| record("d", &format!("a{i}@example.com"), Some(job.id), None))
        .collect();
    let batch_b: Vec<RawRecord> = (0..4)
        .map(|i| record("b", &format!("b{i}@example.com"), Some(job.id), None))
        .collect();

    harness
        .bridge
        .route(None, batch(batch_a.clone(), Some("c1"), false));
    // Idempotent pull: the cursor yields a superset including the tail
    // of the previous batch.
    let mut replay = batch_a;
    replay.extend(batch_b);
    harness
        .bridge
        .route(Some("c1"), batch(replay, Some("c2"), false));

    harness.poller.poll_once().await.unwrap();

    // "Restart": a fresh poller over the same store.
    let restarted = AccountingPoller::new(
        Arc::clone(&harness.bridge) as Arc<dyn BridgeClient>,
        Arc::clone(&harness.store) as Arc<dyn Store>,
        Arc::clone(&harness.registry) as Arc<dyn ActiveJobs>,
        Arc::new(TuningResolver::default()),
        PollerConfig::default(),
    );
    let outcome = restarted.poll_once().await.unwrap();

    assert_eq!(
        *harness.bridge.requests.lock(),
        vec![None, Some("c1".to_string())],
        "resumed strictly at the persisted cursor"
    );
    assert_eq!(outcome.duplicates, 3, "already-ingested hashes dropped");
    assert_eq!(outcome.ingested, 4);
    assert_eq!(job.counters.snapshot().delivered, 3);
    assert_eq!(job.counters.snapshot().bounced, 4);
}

#[tokio::test]
async fn test_unresolvable_records_counted_once() {
    let harness = harness();
    running_job(&harness, "camp-1").await;

    harness.bridge.route(
        None,
        PullResponse {
            ok: true,
            records: vec![record("d", "ghost@example.com", None, Some("camp-ghost"))],
            next_cursor: None,
            has_more: None,
        },
    );

    let first = harness.poller.poll_once().await.unwrap();
    assert_eq!(first.not_found, 1);
    assert_eq!(first.ingested, 0);

    // Replay of the same record: dropped as a duplicate, not retried
    // forever.
    let second = harness.poller.poll_once().await.unwrap();
    assert_eq!(second.not_found, 0);
    assert_eq!(second.duplicates, 1);
}

#[tokio::test]
async fn test_campaign_fallback_credits_most_recent_forced_job() {
    let harness = harness();
    let older = running_job(&harness, "camp-1").await;
    let newer = running_job(&harness, "camp-1").await;

    harness.bridge.route(
        None,
        batch(
            vec![record("d", "a@example.com", None, Some("camp-1"))],
            Some("c1"),
            false,
        ),
    );

    harness.poller.poll_once().await.unwrap();

    let expected = harness
        .registry
        .active_for_campaign(&CampaignId::new("camp-1"))[0]
        .id;
    let (hit, miss) = if expected == newer.id {
        (newer, older)
    } else {
        (older, newer)
    };
    assert_eq!(hit.counters.snapshot().delivered, 1);
    assert_eq!(miss.counters.snapshot().delivered, 0);
}

#[tokio::test]
async fn test_unknown_outcome_still_ingested() {
    let harness = harness();
    let job = running_job(&harness, "camp-1").await;

    harness.bridge.route(
        None,
        batch(
            vec![record("rb", "a@example.com", Some(job.id), None)],
            Some("c1"),
            false,
        ),
    );

    let outcome = harness.poller.poll_once().await.unwrap();
    assert_eq!(outcome.ingested, 1);
    assert_eq!(job.counters.snapshot().unknown, 1);
    assert_eq!(job.counters.snapshot().delivered, 0);
}

#[tokio::test(start_paused = true)]
async fn test_run_loop_drains_backlog_immediately() {
    let harness = harness();
    let job = running_job(&harness, "camp-1").await;

    harness.bridge.route(
        None,
        batch(
            vec![record("d", "a@example.com", Some(job.id), None)],
            Some("c1"),
            true,
        ),
    );
    harness.bridge.route(
        Some("c1"),
        batch(
            vec![record("d", "b@example.com", Some(job.id), None)],
            Some("c2"),
            false,
        ),
    );

    let (shutdown_tx, shutdown_rx) = tokio::sync::broadcast::channel(4);
    let handle = tokio::spawn(Arc::clone(&harness.poller).run(shutdown_rx));

    // Both batches drain well inside one steady-state interval.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(job.counters.snapshot().delivered, 2);

    shutdown_tx.send(Signal::Shutdown).unwrap();
    let _ = tokio::time::timeout(Duration::from_secs(60), handle).await;
}

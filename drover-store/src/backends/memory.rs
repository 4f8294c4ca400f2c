//! In-memory backend.
//!
//! Used for tests and for ephemeral deployments that accept losing
//! counters on restart. Also the place where write failures can be
//! injected, so the at-least-once replay discipline of the accounting
//! poller has something real to push against.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use drover_common::{JobId, OutcomeKind};

use crate::{BridgeCursorState, CursorStore, JobRow, JobStore, StoreError};

/// Non-durable row store over concurrent maps.
#[derive(Debug, Default)]
pub struct MemoryStore {
    jobs: DashMap<JobId, JobRow>,
    cursors: DashMap<String, BridgeCursorState>,
    reject_writes: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every write fail until cleared.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<(), StoreError> {
        if self.reject_writes.load(Ordering::SeqCst) {
            Err(StoreError::WritesUnavailable)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn save_job(&self, row: &JobRow) -> Result<(), StoreError> {
        self.check_writable()?;
        self.jobs.insert(row.job_id, row.clone());
        Ok(())
    }

    async fn load_job(&self, id: JobId) -> Result<Option<JobRow>, StoreError> {
        Ok(self.jobs.get(&id).map(|row| row.clone()))
    }

    async fn load_jobs(&self) -> Result<Vec<JobRow>, StoreError> {
        Ok(self.jobs.iter().map(|row| row.clone()).collect())
    }

    async fn record_outcome(&self, id: JobId, kind: OutcomeKind, n: u64) -> Result<(), StoreError> {
        self.check_writable()?;
        let mut row = self
            .jobs
            .get_mut(&id)
            .ok_or_else(|| StoreError::RowNotFound(id.to_string()))?;
        row.counters.record_outcome(kind, n);
        row.updated_at = chrono::Utc::now();
        Ok(())
    }
}

#[async_trait]
impl CursorStore for MemoryStore {
    async fn load_cursor(
        &self,
        source_kind: &str,
    ) -> Result<Option<BridgeCursorState>, StoreError> {
        Ok(self.cursors.get(source_kind).map(|state| state.clone()))
    }

    async fn save_cursor(&self, state: &BridgeCursorState) -> Result<(), StoreError> {
        self.check_writable()?;
        self.cursors
            .insert(state.source_kind.clone(), state.clone());
        Ok(())
    }
}

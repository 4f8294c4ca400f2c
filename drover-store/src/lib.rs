//! Durable state shared by the dispatch engine and the accounting
//! poller: one row per job (counters) and one row per ingestion source
//! kind (cursor + ingestion statistics).
//!
//! Only the durability contract lives here. Rows must survive restart;
//! concurrent writers to the same row serialise through per-row
//! locking; everything else (bounded write retries, at-least-once
//! replay) is the caller's discipline.

mod cursor;
mod error;
mod job_row;

pub mod backends;

pub use backends::{FileStore, MemoryStore};
pub use cursor::{BridgeCursorState, SeenWindow};
pub use error::StoreError;
pub use job_row::JobRow;

use async_trait::async_trait;

use drover_common::{JobId, OutcomeKind};

/// Durable per-job counter rows.
#[async_trait]
pub trait JobStore: Send + Sync + std::fmt::Debug {
    /// Write (or replace) a job's row.
    async fn save_job(&self, row: &JobRow) -> Result<(), StoreError>;

    async fn load_job(&self, id: JobId) -> Result<Option<JobRow>, StoreError>;

    /// All persisted job rows, in unspecified order.
    async fn load_jobs(&self) -> Result<Vec<JobRow>, StoreError>;

    /// Idempotent-per-call counter increment on an existing row.
    ///
    /// # Errors
    /// [`StoreError::RowNotFound`] when the job has no row yet; the
    /// engine persists a row before any outcome can reference it.
    async fn record_outcome(&self, id: JobId, kind: OutcomeKind, n: u64) -> Result<(), StoreError>;
}

/// Durable bridge-cursor rows, one per source kind.
#[async_trait]
pub trait CursorStore: Send + Sync + std::fmt::Debug {
    async fn load_cursor(
        &self,
        source_kind: &str,
    ) -> Result<Option<BridgeCursorState>, StoreError>;

    async fn save_cursor(&self, state: &BridgeCursorState) -> Result<(), StoreError>;
}

/// Both row families behind one handle.
pub trait Store: JobStore + CursorStore {}

impl<T: JobStore + CursorStore> Store for T {}

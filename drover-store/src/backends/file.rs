//! File-backed row store.
//!
//! One JSON document per row: `jobs/{job_id}.json` and
//! `cursors/{source_kind}.json` under the configured root. Every write
//! goes to a temp file in the same directory and is renamed into place,
//! so a crash mid-write never leaves a half-row behind. Concurrent
//! writers to the same row serialise through a per-row async mutex;
//! there is no store-wide lock.

use std::{
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::{fs, sync::Mutex};
use tracing::warn;

use drover_common::{JobId, OutcomeKind};

use crate::{BridgeCursorState, CursorStore, JobRow, JobStore, StoreError};

/// Durable store rooted at a directory.
#[derive(Debug)]
pub struct FileStore {
    root: PathBuf,
    row_locks: DashMap<String, Arc<Mutex<()>>>,
}

impl FileStore {
    /// Open (and lay out) the store root.
    ///
    /// # Errors
    /// Rejects paths containing `..` components; fails on I/O errors
    /// creating the row directories.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        validate_root(&root)?;

        fs::create_dir_all(root.join("jobs")).await?;
        fs::create_dir_all(root.join("cursors")).await?;

        Ok(Self {
            root,
            row_locks: DashMap::new(),
        })
    }

    fn row_lock(&self, key: &str) -> Arc<Mutex<()>> {
        self.row_locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    fn job_path(&self, id: JobId) -> PathBuf {
        self.root.join("jobs").join(format!("{id}.json"))
    }

    fn cursor_path(&self, source_kind: &str) -> PathBuf {
        // Source kinds come from configuration; sanitise anyway so a
        // hostile value cannot escape the store root.
        let safe: String = source_kind
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.root.join("cursors").join(format!("{safe}.json"))
    }

    async fn write_row<T: serde::Serialize>(path: &Path, row: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(row)?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, &bytes).await?;
        fs::rename(&tmp, path).await?;
        Ok(())
    }

    async fn read_row<T: serde::de::DeserializeOwned>(
        path: &Path,
    ) -> Result<Option<T>, StoreError> {
        match fs::read(path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map(Some).map_err(|e| {
                StoreError::Corrupt(path.display().to_string(), e.to_string())
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn validate_root(root: &Path) -> Result<(), StoreError> {
    if root.as_os_str().is_empty() {
        return Err(StoreError::InvalidPath("empty path".to_string()));
    }
    if root.components().any(|c| c == Component::ParentDir) {
        return Err(StoreError::InvalidPath(format!(
            "path must not contain '..': {}",
            root.display()
        )));
    }
    Ok(())
}

#[async_trait]
impl JobStore for FileStore {
    async fn save_job(&self, row: &JobRow) -> Result<(), StoreError> {
        let lock = self.row_lock(&row.job_id.to_string());
        let _guard = lock.lock().await;
        Self::write_row(&self.job_path(row.job_id), row).await
    }

    async fn load_job(&self, id: JobId) -> Result<Option<JobRow>, StoreError> {
        Self::read_row(&self.job_path(id)).await
    }

    async fn load_jobs(&self) -> Result<Vec<JobRow>, StoreError> {
        let mut rows = Vec::new();
        let mut entries = fs::read_dir(self.root.join("jobs")).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            match Self::read_row::<JobRow>(&path).await {
                Ok(Some(row)) => rows.push(row),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable job row"),
            }
        }
        Ok(rows)
    }

    async fn record_outcome(&self, id: JobId, kind: OutcomeKind, n: u64) -> Result<(), StoreError> {
        let lock = self.row_lock(&id.to_string());
        let _guard = lock.lock().await;

        let path = self.job_path(id);
        let mut row: JobRow = Self::read_row(&path)
            .await?
            .ok_or_else(|| StoreError::RowNotFound(id.to_string()))?;
        row.counters.record_outcome(kind, n);
        row.updated_at = chrono::Utc::now();
        Self::write_row(&path, &row).await
    }
}

#[async_trait]
impl CursorStore for FileStore {
    async fn load_cursor(
        &self,
        source_kind: &str,
    ) -> Result<Option<BridgeCursorState>, StoreError> {
        Self::read_row(&self.cursor_path(source_kind)).await
    }

    async fn save_cursor(&self, state: &BridgeCursorState) -> Result<(), StoreError> {
        let lock = self.row_lock(&format!("cursor:{}", state.source_kind));
        let _guard = lock.lock().await;
        Self::write_row(&self.cursor_path(&state.source_kind), state).await
    }
}

//! File-backed write-ahead-log checkpoint store.
//!
//! One append-only file per session under the base directory
//! (`<thread_id>.wal`). Each record is a single line:
//!
//! ```text
//! <crc32 as 8 hex chars> <json payload>\n
//! ```
//!
//! Writes append and fsync; replay walks the file front to back, skipping
//! records whose checksum does not match - a torn tail from a crashed
//! writer is tolerated and everything before it is recovered. Writers for
//! the same session are serialized through a per-session lock; readers
//! just replay the file.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use maestro_core::{
    CheckpointError, CheckpointId, CheckpointMeta, Checkpointer, RunState, ThreadId,
};

#[derive(Debug, Serialize, Deserialize)]
struct WalRecord {
    checkpoint_id: CheckpointId,
    meta: CheckpointMeta,
    snapshot: RunState,
}

/// Durable single-process checkpoint store.
pub struct WalCheckpointer {
    base_dir: PathBuf,
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl WalCheckpointer {
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            base_dir: base_dir.as_ref().to_path_buf(),
            writers: Mutex::new(HashMap::new()),
        }
    }

    fn wal_path(&self, thread_id: &ThreadId) -> Result<PathBuf, CheckpointError> {
        validate_thread_id(thread_id.as_str())?;
        Ok(self.base_dir.join(format!("{}.wal", thread_id.as_str())))
    }

    async fn writer_lock(&self, thread_id: &ThreadId) -> Arc<Mutex<()>> {
        let mut writers = self.writers.lock().await;
        writers
            .entry(thread_id.as_str().to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Replay every intact record in a session's log, in write order.
    async fn replay(&self, thread_id: &ThreadId) -> Result<Vec<WalRecord>, CheckpointError> {
        let path = self.wal_path(thread_id)?;
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut records = Vec::new();
        for (line_no, line) in raw.lines().enumerate() {
            if line.is_empty() {
                continue;
            }
            match decode_record(line) {
                Some(record) => records.push(record),
                None => {
                    tracing::warn!(
                        thread = thread_id.as_str(),
                        line = line_no + 1,
                        "skipping corrupt or torn log record"
                    );
                }
            }
        }
        Ok(records)
    }
}

#[async_trait]
impl Checkpointer for WalCheckpointer {
    async fn put(
        &self,
        thread_id: &ThreadId,
        checkpoint_id: &CheckpointId,
        snapshot: &RunState,
        meta: CheckpointMeta,
    ) -> Result<(), CheckpointError> {
        let path = self.wal_path(thread_id)?;
        let record = WalRecord {
            checkpoint_id: checkpoint_id.clone(),
            meta,
            snapshot: snapshot.clone(),
        };
        let line = encode_record(&record)?;

        let lock = self.writer_lock(thread_id).await;
        let _guard = lock.lock().await;

        tokio::fs::create_dir_all(&self.base_dir).await?;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;
        Ok(())
    }

    async fn get(
        &self,
        thread_id: &ThreadId,
        checkpoint_id: Option<&CheckpointId>,
    ) -> Result<Option<RunState>, CheckpointError> {
        let records = self.replay(thread_id).await?;
        let record = match checkpoint_id {
            // Later records win: a re-put of the same id supersedes.
            Some(id) => records.into_iter().rev().find(|r| r.checkpoint_id == *id),
            None => records.into_iter().next_back(),
        };
        Ok(record.map(|r| r.snapshot))
    }

    async fn list(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Vec<(CheckpointId, CheckpointMeta)>, CheckpointError> {
        let records = self.replay(thread_id).await?;
        let mut listed: Vec<(CheckpointId, CheckpointMeta)> = Vec::new();
        for record in records {
            // Deduplicate re-puts, keeping the newest copy in place.
            if let Some(existing) = listed
                .iter_mut()
                .find(|(id, _)| *id == record.checkpoint_id)
            {
                existing.1 = record.meta;
            } else {
                listed.push((record.checkpoint_id, record.meta));
            }
        }
        listed.reverse();
        Ok(listed)
    }

    async fn delete(&self, thread_id: &ThreadId) -> Result<(), CheckpointError> {
        let path = self.wal_path(thread_id)?;
        let lock = self.writer_lock(thread_id).await;
        let _guard = lock.lock().await;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }
}

// ============================================================================
// RECORD CODEC
// ============================================================================

fn encode_record(record: &WalRecord) -> Result<String, CheckpointError> {
    let payload = serde_json::to_string(record)?;
    let checksum = crc32fast::hash(payload.as_bytes());
    Ok(format!("{checksum:08x} {payload}\n"))
}

fn decode_record(line: &str) -> Option<WalRecord> {
    let (checksum_hex, payload) = line.split_once(' ')?;
    let stored: u32 = u32::from_str_radix(checksum_hex, 16).ok()?;
    if crc32fast::hash(payload.as_bytes()) != stored {
        return None;
    }
    serde_json::from_str(payload).ok()
}

/// Session ids become file names; reject anything that could escape the
/// base directory.
fn validate_thread_id(thread_id: &str) -> Result<(), CheckpointError> {
    if thread_id.is_empty() {
        return Err(CheckpointError::InvalidId(
            "thread id cannot be empty".into(),
        ));
    }
    if thread_id.contains('/')
        || thread_id.contains('\\')
        || thread_id.contains("..")
        || thread_id.contains('\0')
        || thread_id.chars().any(char::is_control)
    {
        return Err(CheckpointError::InvalidId(format!(
            "thread id contains invalid characters: {thread_id:?}"
        )));
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

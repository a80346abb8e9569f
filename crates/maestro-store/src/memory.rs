//! In-memory checkpoint store.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

use maestro_core::{
    CheckpointError, CheckpointId, CheckpointMeta, Checkpointer, RunState, ThreadId,
};

struct Entry {
    id: CheckpointId,
    meta: CheckpointMeta,
    snapshot: RunState,
}

/// Volatile store for tests and development. Snapshots are kept per session
/// in write order; re-putting an existing checkpoint id replaces it in
/// place, keeping reads idempotent under at-least-once writes.
#[derive(Default)]
pub struct MemoryCheckpointer {
    sessions: RwLock<HashMap<String, Vec<Entry>>>,
}

impl MemoryCheckpointer {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Checkpointer for MemoryCheckpointer {
    async fn put(
        &self,
        thread_id: &ThreadId,
        checkpoint_id: &CheckpointId,
        snapshot: &RunState,
        meta: CheckpointMeta,
    ) -> Result<(), CheckpointError> {
        let mut sessions = self.sessions.write().await;
        let entries = sessions.entry(thread_id.as_str().to_string()).or_default();
        let entry = Entry {
            id: checkpoint_id.clone(),
            meta,
            snapshot: snapshot.clone(),
        };
        if let Some(existing) = entries.iter_mut().find(|e| e.id == *checkpoint_id) {
            *existing = entry;
        } else {
            entries.push(entry);
        }
        Ok(())
    }

    async fn get(
        &self,
        thread_id: &ThreadId,
        checkpoint_id: Option<&CheckpointId>,
    ) -> Result<Option<RunState>, CheckpointError> {
        let sessions = self.sessions.read().await;
        let Some(entries) = sessions.get(thread_id.as_str()) else {
            return Ok(None);
        };
        let entry = match checkpoint_id {
            Some(id) => entries.iter().find(|e| e.id == *id),
            None => entries.last(),
        };
        Ok(entry.map(|e| e.snapshot.clone()))
    }

    async fn list(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Vec<(CheckpointId, CheckpointMeta)>, CheckpointError> {
        let sessions = self.sessions.read().await;
        let Some(entries) = sessions.get(thread_id.as_str()) else {
            return Ok(Vec::new());
        };
        Ok(entries
            .iter()
            .rev()
            .map(|e| (e.id.clone(), e.meta.clone()))
            .collect())
    }

    async fn delete(&self, thread_id: &ThreadId) -> Result<(), CheckpointError> {
        self.sessions.write().await.remove(thread_id.as_str());
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

//! Checkpointer contract - session-keyed persistence of state snapshots.
//!
//! The kernel snapshots state at every node boundary through this trait.
//! Store implementations live in a separate crate; the contract here is the
//! only coupling, so a production deployment may substitute a shared backing
//! store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::EngineError;
use crate::state::RunState;
use crate::types::{CheckpointId, ThreadId};

// ============================================================================
// ERRORS
// ============================================================================

/// Errors raised by checkpoint stores.
#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid identifier: {0}")]
    InvalidId(String),
}

impl From<std::io::Error> for CheckpointError {
    fn from(err: std::io::Error) -> Self {
        CheckpointError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for CheckpointError {
    fn from(err: serde_json::Error) -> Self {
        CheckpointError::Serialization(err.to_string())
    }
}

impl From<CheckpointError> for EngineError {
    fn from(err: CheckpointError) -> Self {
        EngineError::Checkpoint(err.to_string())
    }
}

// ============================================================================
// METADATA
// ============================================================================

/// Lightweight metadata stored alongside each snapshot, listable without
/// loading the snapshot itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointMeta {
    /// Node boundary this snapshot was taken at.
    pub node: String,
    /// Monotonic step counter within the session.
    pub step: u64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl CheckpointMeta {
    pub fn new(node: impl Into<String>, step: u64) -> Self {
        Self {
            node: node.into(),
            step,
            created_at: Utc::now(),
        }
    }
}

// ============================================================================
// CHECKPOINTER TRAIT
// ============================================================================

/// Session-scoped snapshot persistence keyed by `(thread_id, checkpoint_id)`.
///
/// Guarantees required of implementations:
/// - `get(thread_id, None)` after a completed `put` returns that snapshot
///   (read-after-write within a session).
/// - Concurrent `put`s for the same thread are serialized.
/// - `list` returns newest first.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Durably write one snapshot. At-least-once: re-writing the same
    /// checkpoint id is permitted and idempotent from the reader's view.
    async fn put(
        &self,
        thread_id: &ThreadId,
        checkpoint_id: &CheckpointId,
        snapshot: &RunState,
        meta: CheckpointMeta,
    ) -> Result<(), CheckpointError>;

    /// Read a snapshot; the latest one when `checkpoint_id` is omitted.
    async fn get(
        &self,
        thread_id: &ThreadId,
        checkpoint_id: Option<&CheckpointId>,
    ) -> Result<Option<RunState>, CheckpointError>;

    /// All checkpoint ids with metadata for a session, newest first.
    async fn list(
        &self,
        thread_id: &ThreadId,
    ) -> Result<Vec<(CheckpointId, CheckpointMeta)>, CheckpointError>;

    /// Remove every snapshot for a session.
    async fn delete(&self, thread_id: &ThreadId) -> Result<(), CheckpointError>;
}

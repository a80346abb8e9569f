//! # maestro-store
//!
//! Checkpoint store adapters for the maestro orchestration engine.
//!
//! Two variants of the [`maestro_core::Checkpointer`] contract:
//! - [`MemoryCheckpointer`] - volatile, single-process, for tests and dev.
//! - [`WalCheckpointer`] - embedded write-ahead log on the local
//!   filesystem: one append-only file per session, CRC-verified records,
//!   concurrent readers and a single serialized writer per session.

mod memory;
mod wal;

pub use memory::MemoryCheckpointer;
pub use wal::WalCheckpointer;

use std::path::Path;
use std::sync::Arc;

use maestro_core::{Checkpointer, CheckpointStoreKind};

/// Build the store selected by configuration. `base_dir` is only used by the
/// durable variant.
pub fn open_store(kind: CheckpointStoreKind, base_dir: impl AsRef<Path>) -> Arc<dyn Checkpointer> {
    match kind {
        CheckpointStoreKind::Memory => Arc::new(MemoryCheckpointer::new()),
        CheckpointStoreKind::LocalDurable => Arc::new(WalCheckpointer::new(base_dir)),
    }
}

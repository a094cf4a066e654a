//! In-memory fakes for storage traits (testing only)
//!
//! `MemoryCheckpointStore` satisfies the `CheckpointStore` contract without
//! touching the filesystem and counts saves so tests can assert on
//! checkpoint cadence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::storage_traits::{
    validate_project_name, CheckpointEnvelope, CheckpointStore, StateResult,
};

/// In-memory checkpoint store backed by a `HashMap<project, envelope>`.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    snapshots: Mutex<HashMap<String, CheckpointEnvelope>>,
    saves: AtomicUsize,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `save` calls so far.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Replace a stored snapshot directly, bypassing `save` (for corruption
    /// and schema-mismatch tests).
    pub fn insert_raw(&self, envelope: CheckpointEnvelope) {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        snapshots.insert(envelope.project_name.clone(), envelope);
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn save(&self, envelope: &CheckpointEnvelope) -> StateResult<()> {
        validate_project_name(&envelope.project_name)?;
        let mut snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        snapshots.insert(envelope.project_name.clone(), envelope.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn load(&self, project_name: &str) -> StateResult<Option<CheckpointEnvelope>> {
        let snapshots = self.snapshots.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(snapshots.get(project_name).cloned())
    }
}

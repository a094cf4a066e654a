//! Project <-> checkpoint envelope adapter.
//!
//! Every save of a run goes through one [`Checkpointer`], which holds a lock
//! for the duration of the write so snapshots are never written concurrently.

use std::sync::Arc;

use async_trait::async_trait;
use proofline_state::{CheckpointEnvelope, CheckpointStore, ContentDigest, StateError};
use tokio::sync::Mutex;
use tracing::debug;

use crate::domain::error::PipelineError;
use crate::domain::project::Project;
use crate::domain::stage::Stage;
use crate::metrics::METRICS;
use crate::obs;
use crate::scheduler::RankHook;

/// Bumped whenever the serialized shape of [`Project`] changes.
pub const CHECKPOINT_SCHEMA_VERSION: u32 = 1;

pub struct Checkpointer {
    store: Arc<dyn CheckpointStore>,
    save_lock: Mutex<()>,
}

impl Checkpointer {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self {
            store,
            save_lock: Mutex::new(()),
        }
    }

    /// Snapshot the whole project.
    pub async fn save(&self, project: &Project) -> Result<ContentDigest, PipelineError> {
        let _guard = self.save_lock.lock().await;
        let payload = serde_json::to_value(project).map_err(StateError::from)?;
        let envelope = CheckpointEnvelope::seal(
            CHECKPOINT_SCHEMA_VERSION,
            &project.name,
            project.cursor.last_completed.map(|s| s.as_str().to_string()),
            payload,
        )?;
        self.store.save(&envelope).await?;

        METRICS.inc_checkpoints_saved();
        obs::emit_checkpoint_saved(
            &project.name,
            project.cursor.last_completed,
            envelope.digest.short(),
        );
        Ok(envelope.digest)
    }

    /// Latest snapshot for `project_name`, verified against the current
    /// schema. Never coerces an incompatible snapshot.
    pub async fn load(&self, project_name: &str) -> Result<Option<Project>, PipelineError> {
        let Some(envelope) = self.store.load(project_name).await.map_err(refuse_resume)? else {
            return Ok(None);
        };

        envelope
            .verify(CHECKPOINT_SCHEMA_VERSION)
            .map_err(refuse_resume)?;

        if envelope.project_name != project_name {
            return Err(PipelineError::ProjectMismatch {
                found: envelope.project_name,
                expected: project_name.to_string(),
            });
        }

        let project: Project = serde_json::from_value(envelope.payload).map_err(|e| {
            debug!(error = %e, "checkpoint payload does not match the project schema");
            PipelineError::IncompatibleCheckpoint {
                project: project_name.to_string(),
                found: envelope.schema_version,
                expected: CHECKPOINT_SCHEMA_VERSION,
            }
        })?;
        Ok(Some(project))
    }
}

/// Any snapshot written under another schema version is incompatible, even
/// when its envelope could not be fully decoded.
fn refuse_resume(err: StateError) -> PipelineError {
    match err {
        StateError::IncompatibleCheckpoint {
            project,
            found,
            expected,
        } => PipelineError::IncompatibleCheckpoint {
            project,
            found,
            expected,
        },
        StateError::UnreadableEnvelope {
            project,
            found,
            reason: _,
        } if found != CHECKPOINT_SCHEMA_VERSION => PipelineError::IncompatibleCheckpoint {
            project,
            found,
            expected: CHECKPOINT_SCHEMA_VERSION,
        },
        StateError::UnreadableEnvelope { project, reason, .. } => {
            PipelineError::Checkpoint(StateError::CorruptCheckpoint { project, reason })
        }
        other => PipelineError::Checkpoint(other),
    }
}

#[async_trait]
impl RankHook for Checkpointer {
    async fn rank_committed(
        &self,
        project: &Project,
        stage: Stage,
        rank: usize,
    ) -> Result<(), PipelineError> {
        debug!(stage = %stage, rank, "checkpointing rank");
        self.save(project).await.map(|_| ())
    }
}

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tokio::sync::Mutex;
use tracing::debug;

use crate::error::StateError;
use crate::storage_traits::{
    validate_project_name, CheckpointEnvelope, CheckpointStore, StateResult,
};

const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Filesystem-backed checkpoint store.
///
/// Layout: `<root>/<project_name>/checkpoint.json`
pub struct FsCheckpointStore {
    root: PathBuf,
    write_lock: Mutex<()>,
}

impl FsCheckpointStore {
    /// Create a new store rooted at `root`. Creates `root` if needed.
    pub fn new(root: impl AsRef<Path>) -> StateResult<Self> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
            write_lock: Mutex::new(()),
        })
    }

    /// Path of the checkpoint file for `project_name`.
    pub fn checkpoint_path(&self, project_name: &str) -> PathBuf {
        self.root.join(project_name).join(CHECKPOINT_FILE)
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> StateResult<()> {
    let dir = path
        .parent()
        .ok_or_else(|| StateError::InvalidProjectName(path.display().to_string()))?;
    fs::create_dir_all(dir)?;

    // Temp file in the same directory so the rename never crosses devices.
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(data)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

#[async_trait]
impl CheckpointStore for FsCheckpointStore {
    async fn save(&self, envelope: &CheckpointEnvelope) -> StateResult<()> {
        validate_project_name(&envelope.project_name)?;
        let bytes = serde_json::to_vec_pretty(envelope)?;
        let path = self.checkpoint_path(&envelope.project_name);

        let _guard = self.write_lock.lock().await;
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &bytes))
            .await
            .map_err(|e| StateError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))??;

        debug!(
            project = %envelope.project_name,
            digest = %envelope.digest.short(),
            path = %path.display(),
            "checkpoint written"
        );
        Ok(())
    }

    async fn load(&self, project_name: &str) -> StateResult<Option<CheckpointEnvelope>> {
        validate_project_name(project_name)?;
        let path = self.checkpoint_path(project_name);

        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StateError::Io(e)),
        };

        CheckpointEnvelope::decode(project_name, &bytes).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_store() -> (tempfile::TempDir, FsCheckpointStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path()).unwrap();
        (dir, store)
    }

    fn envelope(name: &str, n: u64) -> CheckpointEnvelope {
        CheckpointEnvelope::seal(1, name, None, serde_json::json!({ "n": n })).unwrap()
    }

    #[tokio::test]
    async fn roundtrip() {
        let (_dir, store) = make_store();
        let env = envelope("shop", 7);
        store.save(&env).await.unwrap();
        let loaded = store.load("shop").await.unwrap().unwrap();
        assert_eq!(loaded, env);
        assert!(loaded.verify(1).is_ok());
    }

    #[tokio::test]
    async fn missing_checkpoint_is_none() {
        let (_dir, store) = make_store();
        assert!(store.load("nobody").await.unwrap().is_none());
        assert!(!store.contains("nobody").await.unwrap());
    }

    #[tokio::test]
    async fn save_overwrites_and_leaves_no_temp_files() {
        let (dir, store) = make_store();
        store.save(&envelope("shop", 1)).await.unwrap();
        store.save(&envelope("shop", 2)).await.unwrap();

        let loaded = store.load("shop").await.unwrap().unwrap();
        assert_eq!(loaded.payload["n"], 2);

        let entries: Vec<_> = std::fs::read_dir(dir.path().join("shop")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn garbage_file_is_corrupt() {
        let (_dir, store) = make_store();
        let path = store.checkpoint_path("shop");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"{ not json").unwrap();

        match store.load("shop").await {
            Err(StateError::CorruptCheckpoint { project, .. }) => assert_eq!(project, "shop"),
            other => panic!("expected CorruptCheckpoint, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn older_envelope_reports_its_version() {
        let (_dir, store) = make_store();
        let path = store.checkpoint_path("shop");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(
            &path,
            br#"{"schema_version":0,"project_name":"shop","payload":{}}"#,
        )
        .unwrap();

        match store.load("shop").await {
            Err(StateError::UnreadableEnvelope { project, found, .. }) => {
                assert_eq!(project, "shop");
                assert_eq!(found, 0);
            }
            other => panic!("expected UnreadableEnvelope, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn invalid_project_name_is_rejected() {
        let (_dir, store) = make_store();
        assert!(matches!(
            store.load("../escape").await,
            Err(StateError::InvalidProjectName(_))
        ));
    }
}

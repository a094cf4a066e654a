//! Storage trait definitions for Proofline checkpoints
//!
//! A checkpoint is a whole-project snapshot wrapped in a [`CheckpointEnvelope`].
//! The envelope is schema-versioned and content-addressed: `seal` computes a
//! SHA-256 digest over the payload and `verify` recomputes it on load.
//!
//! Stores are async and backend-agnostic. An in-memory fake is provided via
//! the `fakes` module.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::StateError;

/// Result type for checkpoint operations
pub type StateResult<T> = std::result::Result<T, StateError>;

// ---------------------------------------------------------------------------
// ContentDigest
// ---------------------------------------------------------------------------

/// Content digest (SHA-256 hex string).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Compute the SHA-256 digest of the given bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        use sha2::Digest;
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentDigest(hex::encode(hasher.finalize()))
    }

    /// Return the full hex string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 12 hex chars).
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// CheckpointEnvelope
// ---------------------------------------------------------------------------

/// A persisted, versioned project snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEnvelope {
    /// Schema version of `payload`, owned by the writer.
    pub schema_version: u32,

    /// Key the snapshot is stored under.
    pub project_name: String,

    /// Last fully completed stage at save time (informational).
    pub stage_cursor: Option<String>,

    /// When the snapshot was sealed.
    pub saved_at: DateTime<Utc>,

    /// SHA-256 over the serialized payload.
    pub digest: ContentDigest,

    /// The serialized project aggregate.
    pub payload: serde_json::Value,
}

impl CheckpointEnvelope {
    /// Wrap `payload` and compute its digest.
    pub fn seal(
        schema_version: u32,
        project_name: &str,
        stage_cursor: Option<String>,
        payload: serde_json::Value,
    ) -> StateResult<Self> {
        validate_project_name(project_name)?;
        let digest = payload_digest(&payload)?;
        Ok(Self {
            schema_version,
            project_name: project_name.to_string(),
            stage_cursor,
            saved_at: Utc::now(),
            digest,
            payload,
        })
    }

    /// Decode stored bytes for `project_name`.
    ///
    /// Bytes that are not an envelope at all are `CorruptCheckpoint`. An
    /// envelope whose `schema_version` is readable but whose other fields are
    /// not is `UnreadableEnvelope`, so callers can tell an older writer from
    /// damage.
    pub fn decode(project_name: &str, bytes: &[u8]) -> StateResult<Self> {
        serde_json::from_slice(bytes).map_err(|full| {
            match serde_json::from_slice::<EnvelopeHeader>(bytes) {
                Ok(header) => StateError::UnreadableEnvelope {
                    project: project_name.to_string(),
                    found: header.schema_version,
                    reason: full.to_string(),
                },
                Err(_) => StateError::CorruptCheckpoint {
                    project: project_name.to_string(),
                    reason: full.to_string(),
                },
            }
        })
    }

    /// Fail fast unless the envelope matches `expected_version` and its
    /// payload still hashes to the recorded digest.
    pub fn verify(&self, expected_version: u32) -> StateResult<()> {
        if self.schema_version != expected_version {
            return Err(StateError::IncompatibleCheckpoint {
                project: self.project_name.clone(),
                found: self.schema_version,
                expected: expected_version,
            });
        }

        let actual = payload_digest(&self.payload)?;
        if actual != self.digest {
            return Err(StateError::CorruptCheckpoint {
                project: self.project_name.clone(),
                reason: format!(
                    "digest mismatch: expected {}, got {}",
                    self.digest.short(),
                    actual.short()
                ),
            });
        }
        Ok(())
    }
}

/// The one field every envelope version carries.
#[derive(Deserialize)]
struct EnvelopeHeader {
    schema_version: u32,
}

fn payload_digest(payload: &serde_json::Value) -> StateResult<ContentDigest> {
    let bytes = serde_json::to_vec(payload)?;
    Ok(ContentDigest::from_bytes(&bytes))
}

/// Reject names that cannot be used as a single path component.
pub fn validate_project_name(name: &str) -> StateResult<()> {
    let bad = name.is_empty()
        || name == "."
        || name == ".."
        || name.contains(['/', '\\'])
        || name.chars().any(char::is_control);
    if bad {
        return Err(StateError::InvalidProjectName(name.to_string()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CheckpointStore
// ---------------------------------------------------------------------------

/// Whole-project checkpoint store.
///
/// Guarantees:
/// - `save` is atomic from the caller's perspective: a concurrent or later
///   `load` observes either the previous snapshot or the new one, never a
///   partial write.
/// - `load` returns `Ok(None)` when no checkpoint exists for the project.
/// - Writers are serialized; two `save` calls never interleave.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Persist `envelope`, replacing any previous snapshot for its project.
    async fn save(&self, envelope: &CheckpointEnvelope) -> StateResult<()>;

    /// Load the latest snapshot for `project_name`.
    async fn load(&self, project_name: &str) -> StateResult<Option<CheckpointEnvelope>>;

    /// Whether a snapshot exists for `project_name`.
    async fn contains(&self, project_name: &str) -> StateResult<bool> {
        Ok(self.load(project_name).await?.is_some())
    }
}

//! Proofline-State: checkpoint persistence for pipeline runs
//!
//! This crate owns the on-disk representation of a run's progress. The
//! orchestration engine serializes its whole project aggregate into a
//! [`CheckpointEnvelope`] after every stage boundary; the envelope carries a
//! schema version and a content digest so that a reader either gets the exact
//! snapshot that was written or a typed error.
//!
//! ## Key Components
//!
//! - `CheckpointStore`: async save/load contract
//! - `FsCheckpointStore`: filesystem store (`<root>/<project>/checkpoint.json`)
//!   with write-to-temp-then-rename discipline
//! - `fakes::MemoryCheckpointStore`: in-memory store for tests

mod error;
pub mod fakes;
mod fs_store;
pub mod storage_traits;

pub use error::StateError;
pub use fs_store::FsCheckpointStore;
pub use storage_traits::{
    validate_project_name, CheckpointEnvelope, CheckpointStore, ContentDigest, StateResult,
};

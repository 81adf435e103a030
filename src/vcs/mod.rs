//! Version-control adapter.
//!
//! Sync logic talks to [`Repository`], which applies clone/pull/commit/push
//! policy over any [`VersionControl`] backend. [`GitCli`] is the production
//! backend.

mod git;
mod repository;
mod status;
mod tool;

pub use git::GitCli;
pub use repository::{
    CloneOptions, CommitOutcome, PushOutcome, PushPolicy, PushVerdict, Repository,
    ASSOCIATED_FILES_DIR, DATASET_INFO_FILE, FRAMES_FILE, MANIFEST_FILE, VIDEOS_FILE,
    WRITABLE_MANIFEST_FILES,
};
pub use status::{RepoStatus, StatusEntry};
pub use tool::{CommandOutput, VersionControl};

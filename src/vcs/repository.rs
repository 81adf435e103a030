//! Repository policy on top of a [`VersionControl`] backend.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::status::RepoStatus;
use super::tool::{CommandOutput, VersionControl};
use crate::error::{Error, Result};

/// Manifest file name at the repository root.
pub const MANIFEST_FILE: &str = "index.json";
/// Directory of small tracked files committed alongside the manifest.
pub const ASSOCIATED_FILES_DIR: &str = "associated_files";
/// Dataset-level fields of a manifest split into JSON Lines files. Its
/// presence marks the repository as using that layout.
pub const DATASET_INFO_FILE: &str = "dataset.jsonl";
/// One frame per line.
pub const FRAMES_FILE: &str = "frames.jsonl";
/// One video per line. Generated by the server and never committed.
pub const VIDEOS_FILE: &str = "videos.jsonl";
/// Manifest files a commit may carry.
pub const WRITABLE_MANIFEST_FILES: [&str; 3] = [MANIFEST_FILE, DATASET_INFO_FILE, FRAMES_FILE];

const UP_TO_DATE: &str = "Everything up-to-date";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    NothingToCommit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Accepted,
    UpToDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushVerdict {
    Accepted,
    UpToDate,
    Rejected,
}

/// Decides whether the remote accepted a push.
///
/// Servers that post-process pushes may exit non-zero even on success and
/// announce acceptance in their output instead. With a marker configured,
/// only output containing it counts as accepted. Without one, a zero exit
/// status is enough.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PushPolicy {
    acceptance_marker: Option<String>,
}

impl PushPolicy {
    /// An empty marker selects exit-status detection.
    pub fn new(acceptance_marker: Option<String>) -> Self {
        Self {
            acceptance_marker: acceptance_marker.filter(|m| !m.is_empty()),
        }
    }

    pub fn exit_status_only() -> Self {
        Self::default()
    }

    pub fn classify(&self, output: &CommandOutput) -> PushVerdict {
        let text = output.combined();
        if let Some(marker) = &self.acceptance_marker {
            if text.contains(marker.as_str()) {
                return PushVerdict::Accepted;
            }
        }
        if text.contains(UP_TO_DATE) {
            return PushVerdict::UpToDate;
        }
        if self.acceptance_marker.is_none() && output.success {
            return PushVerdict::Accepted;
        }
        PushVerdict::Rejected
    }
}

/// How to clone a dataset repository.
#[derive(Debug, Clone)]
pub struct CloneOptions {
    /// Attempts for the clone itself, and separately for the manifest poll.
    pub retries: u32,
    pub delay: Duration,
    /// Written to the clone's `user.email`.
    pub email: Option<String>,
    /// Revision to reset to once the manifest is present.
    pub checkout: Option<String>,
}

impl Default for CloneOptions {
    fn default() -> Self {
        Self {
            retries: 5,
            delay: Duration::from_secs(5),
            email: None,
            checkout: None,
        }
    }
}

/// A dataset repository checked out at `root`.
#[derive(Clone)]
pub struct Repository {
    vcs: Arc<dyn VersionControl>,
    root: PathBuf,
    branch: String,
    push_policy: PushPolicy,
}

impl std::fmt::Debug for Repository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("root", &self.root)
            .field("branch", &self.branch)
            .field("push_policy", &self.push_policy)
            .finish_non_exhaustive()
    }
}

fn is_empty_dir(path: &Path) -> Result<bool> {
    let mut entries =
        fs::read_dir(path).map_err(|e| Error::io(e, "listing directory", path.to_path_buf()))?;
    Ok(entries.next().is_none())
}

impl Repository {
    /// Wrap an existing working directory. `branch` is the only branch that
    /// accepts commits.
    pub fn open(
        vcs: Arc<dyn VersionControl>,
        root: impl Into<PathBuf>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            vcs,
            root: root.into(),
            branch: branch.into(),
            push_policy: PushPolicy::default(),
        }
    }

    pub fn with_push_policy(mut self, policy: PushPolicy) -> Self {
        self.push_policy = policy;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Clone `remote` into `dest` and wait for its manifest to appear.
    ///
    /// A freshly created remote can exist before the server has populated it,
    /// so the clone call is retried and then, independently, the manifest is
    /// polled for with a pull between polls.
    pub fn clone_remote(
        vcs: Arc<dyn VersionControl>,
        remote: &str,
        dest: &Path,
        branch: &str,
        options: &CloneOptions,
    ) -> Result<Self> {
        if dest.exists() && !(dest.is_dir() && is_empty_dir(dest)?) {
            return Err(Error::DestinationExists {
                path: dest.to_path_buf(),
            });
        }

        let attempts = options.retries.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            info!("Cloning {} into {}", remote, dest.display());
            let output = vcs.clone_repo(remote, dest)?;
            if output.success {
                break;
            }
            if attempt >= attempts {
                return Err(Error::Vcs {
                    command: format!("git clone {}", remote),
                    output: output.combined(),
                });
            }
            warn!(
                "Clone of {} failed (attempt {}/{}), retrying in {:?}",
                remote, attempt, attempts, options.delay
            );
            thread::sleep(options.delay);
        }

        let repo = Self::open(vcs, dest, branch);
        if let Some(email) = &options.email {
            repo.vcs
                .set_config(dest, "user.email", email)?
                .check("git config user.email")?;
        }
        repo.wait_for_manifest(attempts, options.delay)?;

        if let Some(rev) = &options.checkout {
            repo.checkout(rev)?;
        }
        Ok(repo)
    }

    fn has_manifest(&self) -> bool {
        self.root.join(MANIFEST_FILE).is_file() || self.root.join(DATASET_INFO_FILE).is_file()
    }

    fn wait_for_manifest(&self, attempts: u32, delay: Duration) -> Result<()> {
        for attempt in 1..=attempts {
            if self.has_manifest() {
                return Ok(());
            }
            warn!(
                "{} not present yet (attempt {}/{}), pulling again in {:?}",
                MANIFEST_FILE, attempt, attempts, delay
            );
            thread::sleep(delay);
            if let Err(e) = self.pull() {
                debug!("Pull while waiting for manifest failed: {}", e);
            }
        }
        if self.has_manifest() {
            Ok(())
        } else {
            Err(Error::ManifestMissing {
                path: self.root.join(MANIFEST_FILE),
            })
        }
    }

    /// Fetch, then switch to the writable branch reset at its remote tip.
    ///
    /// Local-only commits on the writable branch are discarded; other
    /// branches keep theirs. Uncommitted edits survive unless the remote
    /// changed the same file, in which case the pull fails.
    pub fn pull(&self) -> Result<()> {
        self.vcs.fetch(&self.root)?.check("git fetch")?;
        let upstream = format!("origin/{}", self.branch);
        self.vcs
            .checkout_branch(&self.root, &self.branch, &upstream)?
            .check(&format!("git checkout -B {} {}", self.branch, upstream))?;
        debug!("Switched {} to {} at {}", self.root.display(), self.branch, upstream);
        Ok(())
    }

    /// Reset the working tree to `rev`, dropping uncommitted manifest edits.
    pub fn checkout(&self, rev: &str) -> Result<()> {
        self.vcs
            .reset_hard(&self.root, rev)?
            .check(&format!("git reset --hard {}", rev))?;
        Ok(())
    }

    pub fn current_branch(&self) -> Result<String> {
        self.vcs.current_branch(&self.root)
    }

    /// Fail with `WrongBranch` unless the writable branch is checked out.
    pub fn ensure_writable(&self) -> Result<()> {
        let actual = self.current_branch()?;
        if actual != self.branch {
            return Err(Error::WrongBranch {
                expected: self.branch.clone(),
                actual,
            });
        }
        Ok(())
    }

    pub fn status(&self) -> Result<RepoStatus> {
        let output = self.vcs.status(&self.root)?.check("git status")?;
        Ok(RepoStatus::parse(&output.stdout))
    }

    /// Changed files that may be committed: writable manifest files and
    /// anything under the associated files directory.
    ///
    /// `index.json` and the `.jsonl` manifest files describe the same data,
    /// so changes to both cannot go into one commit.
    pub fn trackable_changes(&self) -> Result<Vec<String>> {
        let status = self.status()?;
        let prefix = format!("{}/", ASSOCIATED_FILES_DIR);
        let has_dataset_info = self.root.join(DATASET_INFO_FILE).is_file();

        let modified = status.modified_working.iter().map(|p| (p.as_str(), true));
        let untracked = status.added_working.iter().map(|p| (p.as_str(), false));
        let mut paths: Vec<String> = Vec::new();
        for (path, tracked) in modified.chain(untracked) {
            let keep = if path == VIDEOS_FILE {
                warn!("Will not stage changes to read-only file '{}'", path);
                false
            } else if path.starts_with(&prefix) {
                true
            } else if path == MANIFEST_FILE {
                tracked
            } else if WRITABLE_MANIFEST_FILES.contains(&path) {
                if !tracked && !has_dataset_info {
                    warn!(
                        "'{}' cannot be added until the server has committed {}",
                        path, DATASET_INFO_FILE
                    );
                }
                tracked || has_dataset_info
            } else {
                debug!("Not staging {}", path);
                false
            };
            if keep && !paths.iter().any(|p| p == path) {
                paths.push(path.to_string());
            }
        }

        let jsonl_change = paths.iter().any(|p| !p.contains('/') && p.ends_with(".jsonl"));
        if jsonl_change && paths.iter().any(|p| p == MANIFEST_FILE) {
            return Err(Error::MixedManifestChanges);
        }
        Ok(paths)
    }

    /// Stage manifest and associated file changes, then commit them.
    pub fn commit(&self, message: &str) -> Result<CommitOutcome> {
        self.ensure_writable()?;

        let paths = self.trackable_changes()?;
        if !paths.is_empty() {
            self.vcs.add(&self.root, &paths)?.check("git add")?;
        }
        if !self.status()?.has_staged_changes() {
            warn!("No changes staged, nothing to commit.");
            return Ok(CommitOutcome::NothingToCommit);
        }
        self.vcs
            .commit(&self.root, message)?
            .check("git commit")?;
        info!("Committed {} file(s): {}", paths.len(), message);
        Ok(CommitOutcome::Committed)
    }

    /// Push and classify the result with the configured [`PushPolicy`].
    ///
    /// Accepted pushes are followed by a pull, since the server may rewrite
    /// what it received. A rejected push is reconciled with a single pull
    /// before `PushRejected` is returned.
    pub fn push(&self) -> Result<PushOutcome> {
        let output = self.vcs.push(&self.root)?;
        match self.push_policy.classify(&output) {
            PushVerdict::Accepted => {
                info!("Push accepted");
                if let Err(e) = self.pull() {
                    warn!("Push accepted but the follow-up pull failed, run pull later: {}", e);
                }
                Ok(PushOutcome::Accepted)
            }
            PushVerdict::UpToDate => {
                warn!("{}", output.combined().trim());
                Ok(PushOutcome::UpToDate)
            }
            PushVerdict::Rejected => {
                let text = output.combined();
                warn!("Server did not accept changes:\n{}", text);
                if let Err(e) = self.pull() {
                    warn!("Pull after rejected push failed: {}", e);
                }
                Err(Error::PushRejected { output: text })
            }
        }
    }

    pub fn log(&self) -> Result<String> {
        Ok(self.vcs.log(&self.root)?.check("git log")?.stdout)
    }

    /// Diff of the manifest files and associated files.
    pub fn diff(&self) -> Result<String> {
        let paths = vec![
            MANIFEST_FILE.to_string(),
            "*.jsonl".to_string(),
            ASSOCIATED_FILES_DIR.to_string(),
        ];
        Ok(self.vcs.diff(&self.root, &paths)?.check("git diff")?.stdout)
    }

    pub fn show(&self, rev: Option<&str>) -> Result<String> {
        Ok(self.vcs.show(&self.root, rev)?.check("git show")?.stdout)
    }
}

//! The narrow interface onto the external version-control tool.

use std::path::Path;

use crate::error::{Error, Result};

/// Captured result of one version-control invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            success: true,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failed(stderr: impl Into<String>) -> Self {
        Self {
            success: false,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    /// stdout followed by stderr, the way a terminal would show them.
    pub fn combined(&self) -> String {
        match (self.stdout.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.stdout.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr),
        }
    }

    /// Turn a non-zero exit into `Error::Vcs` naming `command`.
    pub fn check(self, command: &str) -> Result<Self> {
        if self.success {
            Ok(self)
        } else {
            Err(Error::Vcs {
                command: command.to_string(),
                output: self.combined(),
            })
        }
    }
}

/// Operations the sync engine needs from a distributed version-control tool.
///
/// Implementations return `Err` only when the tool could not be run at all.
/// A command that ran and failed comes back as `Ok` with `success == false`
/// so callers can inspect its output.
pub trait VersionControl: Send + Sync {
    fn clone_repo(&self, remote: &str, dest: &Path) -> Result<CommandOutput>;

    fn fetch(&self, dir: &Path) -> Result<CommandOutput>;

    /// Move the current branch and working tree to `rev`.
    fn reset_hard(&self, dir: &Path, rev: &str) -> Result<CommandOutput>;

    /// Create or reset `branch` at `start` and switch to it. Other branches
    /// are untouched and local edits that do not conflict are kept.
    fn checkout_branch(&self, dir: &Path, branch: &str, start: &str) -> Result<CommandOutput>;

    fn add(&self, dir: &Path, paths: &[String]) -> Result<CommandOutput>;

    fn commit(&self, dir: &Path, message: &str) -> Result<CommandOutput>;

    fn push(&self, dir: &Path) -> Result<CommandOutput>;

    /// Machine-readable status in porcelain v1 format.
    fn status(&self, dir: &Path) -> Result<CommandOutput>;

    /// Name of the checked-out branch.
    fn current_branch(&self, dir: &Path) -> Result<String>;

    fn log(&self, dir: &Path) -> Result<CommandOutput>;

    /// Diff of the working tree, limited to `paths` when non-empty.
    fn diff(&self, dir: &Path, paths: &[String]) -> Result<CommandOutput>;

    fn show(&self, dir: &Path, rev: Option<&str>) -> Result<CommandOutput>;

    fn set_config(&self, dir: &Path, key: &str, value: &str) -> Result<CommandOutput>;
}

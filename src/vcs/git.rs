//! `git` subprocess backend.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use super::tool::{CommandOutput, VersionControl};
use crate::error::{Error, Result};

/// Runs the `git` executable.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: PathBuf,
    quiet: bool,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: PathBuf::from("git"),
            quiet: false,
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a specific git binary.
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Pass `-q` to commands that chatter on stderr.
    pub fn quiet(mut self, quiet: bool) -> Self {
        self.quiet = quiet;
        self
    }

    fn run(&self, dir: Option<&Path>, args: &[&str]) -> Result<CommandOutput> {
        let mut command = Command::new(&self.program);
        command.args(args);
        if let Some(dir) = dir {
            command.current_dir(dir);
        }
        debug!("Running git {} in {:?}", args.join(" "), dir);

        let output = command.output().map_err(|e| {
            let operation = format!("running git {}", args.join(" "));
            Error::io(e, &operation, None::<PathBuf>)
        })?;
        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    fn with_quiet<'a>(&self, mut args: Vec<&'a str>) -> Vec<&'a str> {
        if self.quiet {
            args.insert(1, "-q");
        }
        args
    }
}

impl VersionControl for GitCli {
    fn clone_repo(&self, remote: &str, dest: &Path) -> Result<CommandOutput> {
        let dest = dest.to_string_lossy();
        let args = self.with_quiet(vec!["clone", remote, dest.as_ref()]);
        self.run(None, &args)
    }

    fn fetch(&self, dir: &Path) -> Result<CommandOutput> {
        let args = self.with_quiet(vec!["fetch"]);
        self.run(Some(dir), &args)
    }

    fn reset_hard(&self, dir: &Path, rev: &str) -> Result<CommandOutput> {
        let args = self.with_quiet(vec!["reset", "--hard", rev]);
        self.run(Some(dir), &args)
    }

    fn checkout_branch(&self, dir: &Path, branch: &str, start: &str) -> Result<CommandOutput> {
        let args = self.with_quiet(vec!["checkout", "-B", branch, start]);
        self.run(Some(dir), &args)
    }

    fn add(&self, dir: &Path, paths: &[String]) -> Result<CommandOutput> {
        let mut args = vec!["add", "--"];
        args.extend(paths.iter().map(String::as_str));
        self.run(Some(dir), &args)
    }

    fn commit(&self, dir: &Path, message: &str) -> Result<CommandOutput> {
        let args = self.with_quiet(vec!["commit", "-m", message]);
        self.run(Some(dir), &args)
    }

    fn push(&self, dir: &Path) -> Result<CommandOutput> {
        self.run(Some(dir), &["push"])
    }

    fn status(&self, dir: &Path) -> Result<CommandOutput> {
        self.run(Some(dir), &["status", "--porcelain=v1"])
    }

    fn current_branch(&self, dir: &Path) -> Result<String> {
        let output = self
            .run(Some(dir), &["rev-parse", "--abbrev-ref", "HEAD"])?
            .check("git rev-parse --abbrev-ref HEAD")?;
        Ok(output.stdout.trim().to_string())
    }

    fn log(&self, dir: &Path) -> Result<CommandOutput> {
        self.run(Some(dir), &["--no-pager", "log"])
    }

    fn diff(&self, dir: &Path, paths: &[String]) -> Result<CommandOutput> {
        let mut args = vec!["--no-pager", "diff"];
        if !paths.is_empty() {
            args.push("--");
            args.extend(paths.iter().map(String::as_str));
        }
        self.run(Some(dir), &args)
    }

    fn show(&self, dir: &Path, rev: Option<&str>) -> Result<CommandOutput> {
        let mut args = vec!["--no-pager", "show"];
        if let Some(rev) = rev {
            args.push(rev);
        }
        self.run(Some(dir), &args)
    }

    fn set_config(&self, dir: &Path, key: &str, value: &str) -> Result<CommandOutput> {
        self.run(Some(dir), &["config", key, value])
    }
}

//! Persisted set of local images queued for publishing.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, info};

use super::image::check_jpeg;
use crate::error::{Error, Result};

/// Ordered, duplicate-free list of absolute paths stored as a JSON array.
#[derive(Debug, Clone)]
pub struct StagingArea {
    path: PathBuf,
}

fn absolute(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir()
        .map_err(|e| Error::io(e, "resolving current directory", None::<PathBuf>))?;
    Ok(cwd.join(path))
}

impl StagingArea {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Staged paths in the order they were added. A missing file is an
    /// empty set.
    pub fn list(&self) -> Result<Vec<PathBuf>> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::io(e, "reading", self.path.clone())),
        };
        serde_json::from_str(&text).map_err(|source| Error::Json {
            path: self.path.clone(),
            source,
        })
    }

    fn write(&self, paths: &[PathBuf]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir).map_err(|e| Error::io(e, "creating directory", dir.to_path_buf()))?;
        let json = serde_json::to_string(paths).map_err(|source| Error::Json {
            path: self.path.clone(),
            source,
        })?;
        let mut temp = NamedTempFile::new_in(dir)
            .map_err(|e| Error::io(e, "creating temporary file in", dir.to_path_buf()))?;
        temp.write_all(json.as_bytes())
            .map_err(|e| Error::io(e, "writing", self.path.clone()))?;
        temp.persist(&self.path)
            .map_err(|e| Error::io(e.error, "replacing", self.path.clone()))?;
        Ok(())
    }

    /// Validate every path, then add them all.
    ///
    /// Each path must exist, not be a directory, and be a JPEG with readable
    /// dimensions. If any path fails, nothing is added. Returns the number of
    /// paths that were not already staged.
    pub fn stage<P: AsRef<Path>>(&self, paths: &[P]) -> Result<usize> {
        let mut candidates = Vec::with_capacity(paths.len());
        for path in paths {
            let path = absolute(path.as_ref())?;
            check_jpeg(&path)?;
            candidates.push(path);
        }

        let mut staged = self.list()?;
        let mut added = 0;
        for path in candidates {
            if staged.contains(&path) {
                debug!("'{}' is already staged", path.display());
                continue;
            }
            info!("Adding '{}' to staging file.", path.display());
            staged.push(path);
            added += 1;
        }
        if added > 0 {
            self.write(&staged)?;
        }
        Ok(added)
    }

    /// Remove the given paths. Returns how many were staged.
    pub fn unstage<P: AsRef<Path>>(&self, paths: &[P]) -> Result<usize> {
        let targets = paths
            .iter()
            .map(|p| absolute(p.as_ref()))
            .collect::<Result<Vec<_>>>()?;
        let staged = self.list()?;
        let before = staged.len();
        let kept: Vec<PathBuf> = staged.into_iter().filter(|p| !targets.contains(p)).collect();
        let removed = before - kept.len();
        if removed > 0 {
            self.write(&kept)?;
        }
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        self.write(&[])
    }
}

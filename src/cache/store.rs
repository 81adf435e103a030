//! Blob storage keyed by content hash.

use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::links::{link_file, LinkMode};
use crate::error::{Error, Result};
use crate::hash::{hash_file, is_valid_hash, HashingWriter};

/// A hash-addressed local blob store shared by every working tree on a machine.
///
/// Entries are write-once: a blob only ever appears at its final path through
/// an atomic rename, and a blob whose bytes no longer hash to its key is
/// reported as absent so callers re-fetch it.
#[derive(Debug, Clone)]
pub struct ContentCache {
    root: PathBuf,
}

impl ContentCache {
    /// Open a cache rooted at `root`. The directory is created lazily.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(&root))
                .unwrap_or(root)
        };
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Sharded blob path: first two hex characters as a directory, the rest
    /// as the file name.
    pub fn path_for(&self, hash: &str) -> Result<PathBuf> {
        if !is_valid_hash(hash) {
            return Err(Error::InvalidHash(hash.to_string()));
        }
        Ok(self.root.join(&hash[..2]).join(&hash[2..]))
    }

    /// True only if the blob exists, is non-empty and still hashes to `hash`.
    pub fn exists(&self, hash: &str) -> bool {
        let path = match self.path_for(hash) {
            Ok(path) => path,
            Err(_) => return false,
        };
        let meta = match fs::metadata(&path) {
            Ok(meta) => meta,
            Err(_) => return false,
        };
        if meta.len() == 0 {
            warn!("Cache file '{}' was empty, ignoring.", path.display());
            return false;
        }
        match hash_file(&path) {
            Ok(actual) if actual == hash => true,
            Ok(_) => {
                warn!("Cache file '{}' had invalid MD5, ignoring.", path.display());
                false
            }
            Err(e) => {
                warn!("Cache file '{}' could not be read: {}", path.display(), e);
                false
            }
        }
    }

    /// Link the blob for `hash` to `target`, replacing any existing file.
    pub fn link(&self, hash: &str, target: &Path, mode: LinkMode) -> Result<()> {
        let blob = self.path_for(hash)?;
        link_file(&blob, target, mode)
    }

    /// Copy a locally produced file into the cache under `hash`.
    ///
    /// The source is never moved. If a valid blob is already present nothing
    /// is copied. The bytes are hashed while copying and the entry is only
    /// published if they match `hash`.
    pub fn put(&self, local_file: &Path, hash: &str) -> Result<PathBuf> {
        let blob = self.path_for(hash)?;
        if self.exists(hash) {
            debug!("{} already cached", hash);
            return Ok(blob);
        }

        let shard = self.shard_dir(&blob)?;
        let mut source = File::open(local_file)
            .map_err(|e| Error::io(e, "reading", local_file.to_path_buf()))?;
        let temp = NamedTempFile::new_in(shard)
            .map_err(|e| Error::io(e, "creating temporary file in", shard.to_path_buf()))?;

        let mut writer = HashingWriter::new(BufWriter::new(temp));
        io::copy(&mut source, &mut writer)
            .map_err(|e| Error::io(e, "copying into cache", local_file.to_path_buf()))?;
        writer
            .flush()
            .map_err(|e| Error::io(e, "copying into cache", local_file.to_path_buf()))?;
        let (buffered, actual) = writer.finish();
        if actual != hash {
            return Err(Error::Integrity {
                path: local_file.to_path_buf(),
                expected: hash.to_string(),
                actual,
            });
        }

        let temp = buffered
            .into_inner()
            .map_err(|e| Error::io(e.into_error(), "flushing", blob.clone()))?;
        temp.persist(&blob)
            .map_err(|e| Error::io(e.error, "publishing cache entry", blob.clone()))?;
        debug!("Copied '{}' to '{}'", local_file.display(), blob.display());
        Ok(blob)
    }

    /// Create and return the shard directory holding `blob`.
    pub(crate) fn shard_dir<'a>(&self, blob: &'a Path) -> Result<&'a Path> {
        let shard = blob
            .parent()
            .ok_or_else(|| Error::Config(format!("invalid cache path {}", blob.display())))?;
        fs::create_dir_all(shard)
            .map_err(|e| Error::io(e, "creating directory", shard.to_path_buf()))?;
        Ok(shard)
    }
}

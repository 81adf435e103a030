//! Working-tree links onto cache blobs.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::error::{Error, Result};

/// How a working-tree file refers to its cache blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkMode {
    /// Hardlink: shares storage, requires the cache on the same filesystem.
    #[default]
    Hard,
    /// Symlink: works across filesystems.
    Symbolic,
}

impl LinkMode {
    pub fn from_symlink_flag(use_symlink: bool) -> Self {
        if use_symlink {
            LinkMode::Symbolic
        } else {
            LinkMode::Hard
        }
    }
}

// EXDEV
#[cfg(unix)]
fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(18)
}

// ERROR_NOT_SAME_DEVICE
#[cfg(not(unix))]
fn is_cross_device(err: &io::Error) -> bool {
    err.raw_os_error() == Some(17)
}

/// Replace whatever is at `target` with a link to `blob`.
pub(crate) fn link_file(blob: &Path, target: &Path, mode: LinkMode) -> Result<()> {
    match fs::symlink_metadata(target) {
        Ok(_) => {
            fs::remove_file(target)
                .map_err(|e| Error::io(e, "removing stale link", target.to_path_buf()))?;
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(Error::io(e, "inspecting", target.to_path_buf())),
    }
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .map_err(|e| Error::io(e, "creating directory", parent.to_path_buf()))?;
    }

    debug!("Linking '{}' to '{}'", target.display(), blob.display());
    let linked = match mode {
        LinkMode::Hard => fs::hard_link(blob, target),
        LinkMode::Symbolic => symlink(blob, target),
    };
    linked.map_err(|e| {
        if mode == LinkMode::Hard && is_cross_device(&e) {
            Error::CrossDeviceLink {
                source_path: blob.to_path_buf(),
                target: target.to_path_buf(),
            }
        } else {
            Error::io(e, "linking", target.to_path_buf())
        }
    })
}

#[cfg(unix)]
fn symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(original, link)
}

#[cfg(windows)]
fn symlink(original: &Path, link: &Path) -> io::Result<()> {
    std::os::windows::fs::symlink_file(original, link)
}

/// Returns true if `path` looks like a link onto a cache blob: a symlink, or
/// a regular file with more than one hardlink.
pub fn is_cache_linked(path: &Path) -> io::Result<bool> {
    let meta = fs::symlink_metadata(path)?;
    if meta.file_type().is_symlink() {
        return Ok(true);
    }
    Ok(meta.is_file() && link_count(&meta) > 1)
}

#[cfg(unix)]
fn link_count(meta: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    meta.nlink()
}

#[cfg(not(unix))]
fn link_count(_meta: &fs::Metadata) -> u64 {
    1
}

/// Remove every cache-linked entry directly inside `dir`.
///
/// Files that are not links onto the cache are left alone. A missing
/// directory is not an error. Returns the number of entries removed.
pub fn clean_links(dir: &Path) -> Result<usize> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(Error::io(e, "listing directory", dir.to_path_buf())),
    };

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|e| Error::io(e, "listing directory", dir.to_path_buf()))?;
        let path = entry.path();
        let linked =
            is_cache_linked(&path).map_err(|e| Error::io(e, "inspecting", path.clone()))?;
        if linked {
            fs::remove_file(&path).map_err(|e| Error::io(e, "removing link", path.clone()))?;
            removed += 1;
        }
    }
    debug!("Removed {} cache links from {}", removed, dir.display());
    Ok(removed)
}

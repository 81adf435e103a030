//! Image validation for staged frames.

use std::fs;
use std::path::{Path, PathBuf};

use image::ImageFormat;

use crate::error::{Error, Result};
use crate::hash::hash_file;

/// Facts about a local JPEG recorded in its manifest entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageInfo {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub file_size: u64,
    pub md5: String,
}

/// Check that `path` is a readable JPEG with decodable dimensions.
///
/// The format is sniffed from the file contents, not the extension.
pub fn check_jpeg(path: &Path) -> Result<(u32, u32)> {
    let meta = fs::metadata(path).map_err(|e| Error::io(e, "inspecting", path.to_path_buf()))?;
    if meta.is_dir() {
        return Err(Error::IsDirectory {
            path: path.to_path_buf(),
        });
    }

    let invalid = |reason: String| Error::InvalidImage {
        path: path.to_path_buf(),
        reason,
    };
    let reader = image::io::Reader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| Error::io(e, "reading", path.to_path_buf()))?;
    match reader.format() {
        Some(ImageFormat::Jpeg) => {}
        Some(other) => return Err(invalid(format!("expected a JPEG, found {:?}", other))),
        None => return Err(invalid("not an image".into())),
    }
    reader
        .into_dimensions()
        .map_err(|e| invalid(format!("unreadable dimensions: {}", e)))
}

/// Validate `path` and gather size, dimensions and content hash.
pub fn inspect_jpeg(path: &Path) -> Result<ImageInfo> {
    let (width, height) = check_jpeg(path)?;
    let file_size = fs::metadata(path)
        .map_err(|e| Error::io(e, "inspecting", path.to_path_buf()))?
        .len();
    Ok(ImageInfo {
        path: path.to_path_buf(),
        width,
        height,
        file_size,
        md5: hash_file(path)?,
    })
}

//! Transfer task descriptions.

use std::path::{Path, PathBuf};

/// Fetch `url` into `local_path`, optionally verifying the content hash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub url: String,
    pub local_path: PathBuf,
    pub expected_hash: Option<String>,
}

impl DownloadRequest {
    pub fn new(url: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            local_path: local_path.into(),
            expected_hash: None,
        }
    }

    pub fn with_expected_hash(mut self, hash: impl Into<String>) -> Self {
        self.expected_hash = Some(hash.into());
        self
    }
}

/// PUT the bytes of `local_path` to `url`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub url: String,
    pub local_path: PathBuf,
    pub headers: Vec<(String, String)>,
    /// Compared against the response `ETag` when the server sends one.
    pub expected_hash: Option<String>,
}

impl UploadRequest {
    pub fn new(url: impl Into<String>, local_path: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            local_path: local_path.into(),
            headers: Vec::new(),
            expected_hash: None,
        }
    }

    /// Upload of a JPEG frame, tagged with its original file name.
    pub fn jpeg(url: impl Into<String>, local_path: &Path, hash: impl Into<String>) -> Self {
        let file_name = local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self::new(url, local_path)
            .with_header("Content-Type", "image/jpeg")
            .with_header("x-amz-meta-originalfilename", file_name)
            .with_expected_hash(hash)
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn with_expected_hash(mut self, hash: impl Into<String>) -> Self {
        self.expected_hash = Some(hash.into());
        self
    }
}

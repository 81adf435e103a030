//! Where a working tree keeps its manifest.
//!
//! Older datasets carry a single `index.json`. Newer ones split it into
//! line-delimited files: `dataset.jsonl` holds the dataset record,
//! `frames.jsonl` one frame per line and `videos.jsonl` the server-managed
//! video list. When `dataset.jsonl` is present it wins over `index.json`.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use super::manifest::{write_atomic, FrameEntry, Manifest};
use crate::error::{Error, Result};
use crate::vcs::{DATASET_INFO_FILE, FRAMES_FILE, MANIFEST_FILE, VIDEOS_FILE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    IndexJson,
    Jsonl,
}

/// Manifest files of one working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestSource {
    pub index: PathBuf,
    pub dataset_info: PathBuf,
    pub frames: PathBuf,
    pub videos: PathBuf,
}

impl ManifestSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            index: root.join(MANIFEST_FILE),
            dataset_info: root.join(DATASET_INFO_FILE),
            frames: root.join(FRAMES_FILE),
            videos: root.join(VIDEOS_FILE),
        }
    }

    pub fn format(&self) -> ManifestFormat {
        if self.dataset_info.is_file() {
            ManifestFormat::Jsonl
        } else {
            ManifestFormat::IndexJson
        }
    }

    pub fn exists(&self) -> bool {
        self.index.is_file() || self.dataset_info.is_file()
    }

    /// File that names the manifest in errors.
    pub fn path(&self) -> &Path {
        match self.format() {
            ManifestFormat::IndexJson => &self.index,
            ManifestFormat::Jsonl => &self.frames,
        }
    }

    pub fn load(&self) -> Result<Manifest> {
        match self.format() {
            ManifestFormat::IndexJson => Manifest::load(&self.index),
            ManifestFormat::Jsonl => self.load_jsonl(),
        }
    }

    /// Persist frames. In the line-delimited layout only `frames.jsonl` is
    /// written; the dataset record and video list belong to the server.
    pub fn save(&self, manifest: &Manifest) -> Result<()> {
        match self.format() {
            ManifestFormat::IndexJson => manifest.save(&self.index),
            ManifestFormat::Jsonl => {
                let mut out = String::new();
                for frame in &manifest.frames {
                    let line = serde_json::to_string(frame).map_err(|source| Error::Json {
                        path: self.frames.clone(),
                        source,
                    })?;
                    out.push_str(&line);
                    out.push('\n');
                }
                write_atomic(&self.frames, out.as_bytes())
            }
        }
    }

    pub fn validate(&self, manifest: &Manifest) -> Result<()> {
        manifest.validate(self.path())
    }

    fn load_jsonl(&self) -> Result<Manifest> {
        let invalid = |path: &Path, reason: String| Error::InvalidManifest {
            path: path.to_path_buf(),
            reason,
        };

        let text = fs::read_to_string(&self.dataset_info)
            .map_err(|e| Error::io(e, "reading", self.dataset_info.clone()))?;
        let record = text
            .lines()
            .find(|line| !line.trim().is_empty())
            .ok_or_else(|| invalid(&self.dataset_info, "no dataset record".into()))?;
        let mut extra: Map<String, Value> = serde_json::from_str(record)
            .map_err(|e| invalid(&self.dataset_info, e.to_string()))?;
        let dataset_id = match extra.remove("datasetId") {
            Some(Value::String(id)) => id,
            _ => return Err(invalid(&self.dataset_info, "missing datasetId".into())),
        };

        let frames = match fs::read_to_string(&self.frames) {
            Ok(text) => parse_frames(&text).map_err(|reason| invalid(&self.frames, reason))?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(Error::io(e, "reading", self.frames.clone())),
        };

        Ok(Manifest {
            dataset_id,
            frames,
            extra,
        })
    }
}

fn parse_frames(text: &str) -> std::result::Result<Vec<FrameEntry>, String> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str(line).map_err(|e| format!("line {}: {}", i + 1, e))
        })
        .collect()
}

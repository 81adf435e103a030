//! `index.json` model.
//!
//! Only the fields the sync engine reads or writes are typed; everything else
//! in the document is carried through `extra` so a load/save cycle does not
//! drop data written by the server.

use std::collections::HashSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tempfile::NamedTempFile;

use super::image::ImageInfo;
use crate::error::{Error, Result};
use crate::hash::is_valid_hash;

/// Replace `path` with `bytes` through a temporary sibling and a rename.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut temp = NamedTempFile::new_in(dir)
        .map_err(|e| Error::io(e, "creating temporary file in", dir.to_path_buf()))?;
    temp.write_all(bytes)
        .map_err(|e| Error::io(e, "writing", path.to_path_buf()))?;
    temp.persist(path)
        .map_err(|e| Error::io(e.error, "replacing", path.to_path_buf()))?;
    Ok(())
}

/// Position of a frame within its source video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoMetadata {
    #[serde(default)]
    pub frame_id: String,
    #[serde(default)]
    pub video_id: String,
    #[serde(default)]
    pub frame_index: u64,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrameEntry {
    pub dataset_frame_id: String,
    pub md5: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics_md5: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub file_size: u64,
    /// Opaque to the sync engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<Value>,
    #[serde(default)]
    pub video_metadata: VideoMetadata,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl FrameEntry {
    /// A frame uploaded directly to the dataset rather than extracted from a
    /// video: its frame id is its dataset frame id and its video is the
    /// dataset itself.
    pub fn uploaded(frame_id: &str, dataset_id: &str, frame_index: u64, info: &ImageInfo) -> Self {
        let mut extra = Map::new();
        extra.insert("isEmpty".into(), Value::Bool(false));
        extra.insert("isFlagged".into(), Value::Bool(false));
        Self {
            dataset_frame_id: frame_id.to_string(),
            md5: info.md5.clone(),
            analytics_md5: None,
            width: info.width,
            height: info.height,
            file_size: info.file_size,
            annotations: Some(Value::Array(Vec::new())),
            video_metadata: VideoMetadata {
                frame_id: frame_id.to_string(),
                video_id: dataset_id.to_string(),
                frame_index,
                extra: Map::new(),
            },
            extra,
        }
    }

    pub fn frame_id(&self) -> &str {
        &self.video_metadata.frame_id
    }

    pub fn video_id(&self) -> &str {
        &self.video_metadata.video_id
    }

    pub fn frame_index(&self) -> u64 {
        self.video_metadata.frame_index
    }

    /// True for frames uploaded directly rather than extracted from a video.
    pub fn is_direct_upload(&self) -> bool {
        self.dataset_frame_id == self.video_metadata.frame_id
    }

    fn file_name(&self, extension: &str) -> String {
        format!(
            "video-{}-frame-{:06}-{}.{}",
            self.video_id(),
            self.frame_index(),
            self.dataset_frame_id,
            extension
        )
    }

    /// Working tree name of the primary image.
    pub fn image_file_name(&self) -> String {
        self.file_name("jpg")
    }

    /// Working tree name of the analytics blob.
    pub fn analytics_file_name(&self) -> String {
        self.file_name("tiff")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Manifest {
    pub dataset_id: String,
    #[serde(default)]
    pub frames: Vec<FrameEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Manifest {
    pub fn new(dataset_id: impl Into<String>) -> Self {
        Self {
            dataset_id: dataset_id.into(),
            frames: Vec::new(),
            extra: Map::new(),
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text =
            fs::read_to_string(path).map_err(|e| Error::io(e, "reading", path.to_path_buf()))?;
        serde_json::from_str(&text).map_err(|e| Error::InvalidManifest {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Render with sorted keys and a one-space indent.
    pub fn to_json(&self) -> serde_json::Result<String> {
        // Value's map is ordered, which sorts keys at every level.
        let value = serde_json::to_value(self)?;
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        value.serialize(&mut serializer)?;
        buf.push(b'\n');
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Write atomically, replacing the file at `path`.
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json().map_err(|source| Error::Json {
            path: path.to_path_buf(),
            source,
        })?;
        write_atomic(path, json.as_bytes())
    }

    /// Check the invariants the sync engine relies on.
    pub fn validate(&self, path: &Path) -> Result<()> {
        let invalid = |reason: String| Error::InvalidManifest {
            path: path.to_path_buf(),
            reason,
        };
        if self.dataset_id.is_empty() {
            return Err(invalid("datasetId is empty".into()));
        }
        let mut seen = HashSet::new();
        for (i, frame) in self.frames.iter().enumerate() {
            if frame.dataset_frame_id.is_empty() {
                return Err(invalid(format!("frames[{}].datasetFrameId is empty", i)));
            }
            if !seen.insert(frame.dataset_frame_id.as_str()) {
                return Err(invalid(format!(
                    "frames[{}].datasetFrameId {} is not unique",
                    i, frame.dataset_frame_id
                )));
            }
            if !is_valid_hash(&frame.md5) {
                return Err(invalid(format!(
                    "frames[{}].md5 {:?} is not an MD5 digest",
                    i, frame.md5
                )));
            }
            if let Some(md5) = &frame.analytics_md5 {
                if !is_valid_hash(md5) {
                    return Err(invalid(format!(
                        "frames[{}].analyticsMd5 {:?} is not an MD5 digest",
                        i, md5
                    )));
                }
            }
        }
        Ok(())
    }

    /// Index for the next directly uploaded frame: 0 if there are none,
    /// otherwise one past the highest. Frames extracted from videos keep
    /// their own numbering and are not counted.
    pub fn next_frame_index(&self) -> u64 {
        self.frames
            .iter()
            .filter(|f| f.is_direct_upload())
            .map(FrameEntry::frame_index)
            .max()
            .map_or(0, |max| max + 1)
    }

    pub fn contains_frame(&self, dataset_frame_id: &str) -> bool {
        self.frames
            .iter()
            .any(|f| f.dataset_frame_id == dataset_frame_id)
    }
}

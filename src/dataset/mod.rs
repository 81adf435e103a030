//! Dataset working trees: manifest, staging, and the download and publish
//! flows that reconcile them with the remote.

mod backend;
mod download;
mod image;
mod local;
mod manifest;
mod publish;
mod source;
mod staging;

pub use backend::{content_url, BackendApi, HttpBackend};
pub use download::{DownloadOptions, DownloadReport};
pub use image::{check_jpeg, inspect_jpeg, ImageInfo};
pub use local::{
    DatasetPaths, LocalDataset, SyncContext, ANALYTICS_DIR, DATA_DIR, META_DIR, STAGING_FILE,
};
pub use manifest::{FrameEntry, Manifest, VideoMetadata};
pub use publish::{PublishOptions, PublishReport};
pub use source::{ManifestFormat, ManifestSource};
pub use staging::StagingArea;

//! Upload staged images and record them in the manifest.

use std::collections::HashSet;

use tracing::{debug, error, info, warn};

use super::image::{inspect_jpeg, ImageInfo};
use super::local::LocalDataset;
use super::manifest::FrameEntry;
use crate::cache::LinkMode;
use crate::error::Result;
use crate::transfer::UploadRequest;
use crate::vcs::CommitOutcome;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishOptions {
    /// Copy published images into the cache and link them into `data/`,
    /// as a later download would.
    pub copy_to_cache: bool,
    pub pool_size: usize,
    pub link_mode: LinkMode,
}

impl Default for PublishOptions {
    fn default() -> Self {
        Self {
            copy_to_cache: true,
            pool_size: 10,
            link_mode: LinkMode::Hard,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub staged: usize,
    pub uploaded: usize,
    /// Content the remote already had.
    pub skipped_existing: usize,
    pub frames_added: usize,
    pub failed: usize,
    pub bytes_uploaded: u64,
}

impl PublishReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

impl LocalDataset {
    /// Upload every staged image the remote lacks, then append one frame
    /// per staged file to the manifest.
    ///
    /// The manifest is written and the staging area cleared only if every
    /// upload succeeded; otherwise both are left as they were.
    pub fn publish_staged(&self, options: &PublishOptions) -> Result<PublishReport> {
        let staged = self.staging.list()?;
        let mut report = PublishReport {
            staged: staged.len(),
            ..Default::default()
        };
        if staged.is_empty() {
            info!("No files to push.");
            return Ok(report);
        }

        self.repo.ensure_writable()?;
        let mut manifest = self.manifest()?;

        let images = staged
            .iter()
            .map(|path| inspect_jpeg(path))
            .collect::<Result<Vec<ImageInfo>>>()?;

        let mut queued = HashSet::new();
        let mut uploads = Vec::new();
        let mut sizes = Vec::new();
        for image in &images {
            if !queued.insert(image.md5.as_str()) {
                continue;
            }
            if self.backend.hash_exists(&image.md5)? {
                debug!("'{}' already exists remotely, skipping", image.path.display());
                report.skipped_existing += 1;
                continue;
            }
            debug!("'{}' doesn't exist remotely, uploading", image.path.display());
            uploads.push(UploadRequest::jpeg(
                self.backend.content_url(&image.md5),
                &image.path,
                image.md5.clone(),
            ));
            sizes.push(image.file_size);
        }

        let results = self.transfer.upload_many(&uploads, options.pool_size);
        report.uploaded = results.iter().filter(|ok| **ok).count();
        report.failed = results.len() - report.uploaded;
        report.bytes_uploaded = sizes
            .iter()
            .zip(&results)
            .filter(|(_, ok)| **ok)
            .map(|(size, _)| size)
            .sum();
        if report.failed > 0 {
            for (upload, ok) in uploads.iter().zip(&results) {
                if !ok {
                    error!("Upload of '{}' failed", upload.local_path.display());
                }
            }
            warn!("Leaving manifest and staging area unchanged; run publish again to retry");
            return Ok(report);
        }

        let mut next_index = manifest.next_frame_index();
        for image in &images {
            let frame_id = self.backend.generate_id()?;
            let frame = FrameEntry::uploaded(&frame_id, &manifest.dataset_id, next_index, image);
            if options.copy_to_cache {
                self.cache.put(&image.path, &image.md5)?;
                let link = self.paths.data.join(frame.image_file_name());
                self.cache.link(&image.md5, &link, options.link_mode)?;
            }
            debug!("Added new frame {} at index {}", frame_id, next_index);
            manifest.frames.push(frame);
            next_index += 1;
            report.frames_added += 1;
        }

        self.save_manifest(&manifest)?;
        self.staging.clear()?;
        info!(
            "Published {} frames ({} uploaded, {} already present)",
            report.frames_added, report.uploaded, report.skipped_existing
        );
        Ok(report)
    }

    /// Publish staged images, then commit and push the manifest.
    ///
    /// Nothing is committed if any upload failed.
    pub fn publish(&self, message: &str, options: &PublishOptions) -> Result<PublishReport> {
        let report = self.publish_staged(options)?;
        if !report.is_success() {
            return Ok(report);
        }
        if self.commit(message)? == CommitOutcome::NothingToCommit {
            debug!("Nothing new to commit, pushing existing commits");
        }
        self.push()?;
        Ok(report)
    }
}

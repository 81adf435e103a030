//! Materialize the working tree from the manifest and the content cache.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, error, info, warn};

use super::local::LocalDataset;
use crate::cache::{clean_links, LinkMode};
use crate::error::{Error, Result};
use crate::transfer::DownloadRequest;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadOptions {
    /// Link primary images into `data/`.
    pub include_images: bool,
    /// Link analytics blobs into `analyticsData/`.
    pub include_analytics: bool,
    pub pool_size: usize,
    pub link_mode: LinkMode,
    /// Outer passes over the missing set.
    pub tries: u32,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            include_images: true,
            include_analytics: false,
            pool_size: 10,
            link_mode: LinkMode::Hard,
            tries: 5,
        }
    }
}

/// Counts from one download pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DownloadReport {
    /// Working tree files the manifest asks for.
    pub frames: usize,
    pub unique_hashes: usize,
    pub cache_hits: usize,
    pub attempted: usize,
    pub downloaded: usize,
    pub failed: usize,
}

impl DownloadReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// Content hashes in manifest order, each with the working tree paths that
/// should point at it.
#[derive(Debug, Default)]
struct RequiredBlobs {
    order: Vec<(String, Vec<PathBuf>)>,
    index: HashMap<String, usize>,
}

impl RequiredBlobs {
    fn add(&mut self, hash: &str, link: PathBuf) {
        match self.index.get(hash) {
            Some(&i) => self.order[i].1.push(link),
            None => {
                self.index.insert(hash.to_string(), self.order.len());
                self.order.push((hash.to_string(), vec![link]));
            }
        }
    }
}

fn is_nonempty_file(path: &Path) -> bool {
    fs::metadata(path).map(|m| m.is_file() && m.len() > 0).unwrap_or(false)
}

impl LocalDataset {
    /// Bring the media directories in line with the manifest.
    ///
    /// Cached blobs are linked straight away. Missing ones are fetched into
    /// the cache in parallel batches; whatever is still missing after a pass
    /// is retried in a smaller batch, up to `tries` passes, stopping early if
    /// a pass makes no progress.
    pub fn download(&self, options: &DownloadOptions) -> Result<DownloadReport> {
        let manifest = self.validate()?;
        let mut report = DownloadReport::default();

        let mut required = RequiredBlobs::default();
        for frame in &manifest.frames {
            if options.include_images {
                required.add(&frame.md5, self.paths.data.join(frame.image_file_name()));
                report.frames += 1;
            }
            if options.include_analytics {
                if let Some(md5) = &frame.analytics_md5 {
                    required.add(md5, self.paths.analytics.join(frame.analytics_file_name()));
                    report.frames += 1;
                }
            }
        }
        report.unique_hashes = required.order.len();

        let mut media_dirs = Vec::new();
        if options.include_images {
            media_dirs.push(&self.paths.data);
        }
        if options.include_analytics {
            media_dirs.push(&self.paths.analytics);
        }
        for dir in media_dirs {
            fs::create_dir_all(dir).map_err(|e| Error::io(e, "creating directory", dir.clone()))?;
            let removed = clean_links(dir)?;
            debug!("Pruned {} links from {}", removed, dir.display());
        }

        info!("Checking cache...");
        let mut requests = Vec::new();
        let mut request_links: Vec<&[PathBuf]> = Vec::new();
        for (hash, links) in &required.order {
            if self.cache.exists(hash) {
                self.link_all(hash, links, options.link_mode)?;
                report.cache_hits += 1;
                debug!("Skipping {}: already downloaded.", hash);
                continue;
            }
            let target = self.cache.path_for(hash)?;
            let url = self.backend.content_url(hash);
            requests.push(DownloadRequest::new(url, target).with_expected_hash(hash));
            request_links.push(links.as_slice());
        }
        report.attempted = requests.len();

        info!("Total frames: {}", report.frames);
        info!("  Unique hashes: {}", report.unique_hashes);
        info!("  Already downloaded: {}", report.cache_hits);
        info!("  Missing: {}", report.attempted);

        let tries = options.tries.max(1);
        let mut pending: Vec<usize> = (0..requests.len()).collect();
        let mut pass = 0;
        while !pending.is_empty() && pass < tries {
            pass += 1;
            info!(
                "Downloading {} frames using {} workers (pass {}/{})",
                pending.len(),
                options.pool_size,
                pass,
                tries
            );
            let batch: Vec<DownloadRequest> =
                pending.iter().map(|&i| requests[i].clone()).collect();
            self.transfer.download_many(&batch, options.pool_size);

            let mut still_missing = Vec::new();
            for &i in &pending {
                let request = &requests[i];
                if is_nonempty_file(&request.local_path) {
                    if let Some(hash) = &request.expected_hash {
                        self.link_all(hash, request_links[i], options.link_mode)?;
                    }
                } else {
                    if pass < tries {
                        warn!(
                            "Download to {} seems to have failed. Retrying ..",
                            request.local_path.display()
                        );
                    } else {
                        error!(
                            "Download to {} seems to have failed.",
                            request.local_path.display()
                        );
                    }
                    still_missing.push(i);
                }
            }

            let progressed = still_missing.len() < pending.len();
            pending = still_missing;
            if !progressed {
                error!("No downloads succeeded in pass {}, giving up", pass);
                break;
            }
        }

        report.failed = pending.len();
        report.downloaded = report.attempted - report.failed;
        info!("Downloads attempted: {}", report.attempted);
        info!("  Successful downloads: {}", report.downloaded);
        info!("  Failed downloads: {}", report.failed);
        Ok(report)
    }

    fn link_all(&self, hash: &str, links: &[PathBuf], mode: LinkMode) -> Result<()> {
        for link in links {
            self.cache.link(hash, link, mode)?;
        }
        Ok(())
    }
}

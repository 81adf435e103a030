//! Per-working-directory session.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info;

use super::backend::BackendApi;
use super::manifest::Manifest;
use super::source::ManifestSource;
use super::staging::StagingArea;
use crate::cache::ContentCache;
use crate::error::{Error, Result};
use crate::transfer::TransferEngine;
use crate::vcs::{
    CloneOptions, CommitOutcome, PushOutcome, PushPolicy, RepoStatus, Repository, VersionControl,
    ASSOCIATED_FILES_DIR, MANIFEST_FILE, WRITABLE_MANIFEST_FILES,
};

/// Directory holding tool state inside a working tree.
pub const META_DIR: &str = ".framesync";
pub const DATA_DIR: &str = "data";
pub const ANALYTICS_DIR: &str = "analyticsData";
pub const STAGING_FILE: &str = "staging.json";

/// Well-known locations inside a dataset working tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetPaths {
    pub root: PathBuf,
    pub manifest: PathBuf,
    pub associated_files: PathBuf,
    pub data: PathBuf,
    pub analytics: PathBuf,
    pub meta: PathBuf,
    pub staging: PathBuf,
}

impl DatasetPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let meta = root.join(META_DIR);
        Self {
            manifest: root.join(MANIFEST_FILE),
            associated_files: root.join(ASSOCIATED_FILES_DIR),
            data: root.join(DATA_DIR),
            analytics: root.join(ANALYTICS_DIR),
            staging: meta.join(STAGING_FILE),
            meta,
            root,
        }
    }
}

/// Collaborators shared by every dataset a process works with.
#[derive(Clone)]
pub struct SyncContext {
    pub vcs: Arc<dyn VersionControl>,
    pub backend: Arc<dyn BackendApi>,
    pub transfer: TransferEngine,
    /// Cache root. Relative paths are resolved against the dataset root.
    pub cache_dir: PathBuf,
    pub writable_branch: String,
    pub push_policy: PushPolicy,
}

impl SyncContext {
    fn cache_for(&self, root: &Path) -> ContentCache {
        if self.cache_dir.is_absolute() {
            ContentCache::new(&self.cache_dir)
        } else {
            ContentCache::new(root.join(&self.cache_dir))
        }
    }
}

/// A cloned dataset and everything needed to sync it.
pub struct LocalDataset {
    pub(crate) paths: DatasetPaths,
    pub(crate) cache: ContentCache,
    pub(crate) repo: Repository,
    pub(crate) transfer: TransferEngine,
    pub(crate) backend: Arc<dyn BackendApi>,
    pub(crate) staging: StagingArea,
}

impl std::fmt::Debug for LocalDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDataset")
            .field("paths", &self.paths)
            .field("cache", &self.cache)
            .field("repo", &self.repo)
            .finish_non_exhaustive()
    }
}

impl LocalDataset {
    /// Open the working tree at `root`, which must contain `index.json` or
    /// `dataset.jsonl`.
    pub fn open(root: impl Into<PathBuf>, ctx: &SyncContext) -> Result<Self> {
        let root = root.into();
        let root = if root.is_absolute() {
            root
        } else {
            std::env::current_dir()
                .map_err(|e| Error::io(e, "resolving current directory", None::<PathBuf>))?
                .join(root)
        };
        let paths = DatasetPaths::new(root);
        if !ManifestSource::new(&paths.root).exists() {
            return Err(Error::NotADataset {
                path: paths.root.clone(),
            });
        }

        let repo = Repository::open(ctx.vcs.clone(), &paths.root, ctx.writable_branch.clone())
            .with_push_policy(ctx.push_policy.clone());
        Ok(Self {
            cache: ctx.cache_for(&paths.root),
            staging: StagingArea::new(&paths.staging),
            repo,
            transfer: ctx.transfer.clone(),
            backend: ctx.backend.clone(),
            paths,
        })
    }

    /// Clone a dataset's repository into `dest` (default: a directory named
    /// after the dataset id) and open it.
    pub fn clone_dataset(
        dataset_id: &str,
        dest: Option<PathBuf>,
        ctx: &SyncContext,
        options: &CloneOptions,
    ) -> Result<Self> {
        let dest = dest.unwrap_or_else(|| PathBuf::from(dataset_id));
        let remote = ctx.backend.repository_url(dataset_id);
        Repository::clone_remote(
            ctx.vcs.clone(),
            &remote,
            &dest,
            &ctx.writable_branch,
            options,
        )?;
        info!("Cloned dataset {} into {}", dataset_id, dest.display());
        Self::open(dest, ctx)
    }

    pub fn paths(&self) -> &DatasetPaths {
        &self.paths
    }

    pub fn root(&self) -> &Path {
        &self.paths.root
    }

    pub fn cache(&self) -> &ContentCache {
        &self.cache
    }

    pub fn repository(&self) -> &Repository {
        &self.repo
    }

    pub fn staging(&self) -> &StagingArea {
        &self.staging
    }

    pub fn manifest_source(&self) -> ManifestSource {
        ManifestSource::new(&self.paths.root)
    }

    pub fn manifest(&self) -> Result<Manifest> {
        self.manifest_source().load()
    }

    pub fn save_manifest(&self, manifest: &Manifest) -> Result<()> {
        self.manifest_source().save(manifest)
    }

    /// Load and check the manifest.
    pub fn validate(&self) -> Result<Manifest> {
        let source = self.manifest_source();
        let manifest = source.load()?;
        source.validate(&manifest)?;
        Ok(manifest)
    }

    pub fn pull(&self) -> Result<()> {
        self.repo.pull()
    }

    pub fn checkout(&self, rev: &str) -> Result<()> {
        self.repo.checkout(rev)
    }

    /// Validate the manifest, then commit it with any associated files.
    pub fn commit(&self, message: &str) -> Result<CommitOutcome> {
        let changes = self.repo.trackable_changes()?;
        if changes.iter().any(|p| WRITABLE_MANIFEST_FILES.contains(&p.as_str())) {
            self.validate()?;
        }
        self.repo.commit(message)
    }

    pub fn push(&self) -> Result<PushOutcome> {
        self.repo.push()
    }

    pub fn status(&self) -> Result<RepoStatus> {
        self.repo.status()
    }

    pub fn log(&self) -> Result<String> {
        self.repo.log()
    }

    pub fn diff(&self) -> Result<String> {
        self.repo.diff()
    }

    pub fn show(&self, rev: Option<&str>) -> Result<String> {
        self.repo.show(rev)
    }

    pub fn stage<P: AsRef<Path>>(&self, paths: &[P]) -> Result<usize> {
        self.staging.stage(paths)
    }

    pub fn unstage<P: AsRef<Path>>(&self, paths: &[P]) -> Result<usize> {
        self.staging.unstage(paths)
    }

    pub fn staged(&self) -> Result<Vec<PathBuf>> {
        self.staging.list()
    }
}

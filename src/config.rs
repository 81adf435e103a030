//! Settings loaded from a TOML file with environment overrides.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dataset::{HttpBackend, SyncContext};
use crate::error::{Error, Result};
use crate::transfer::{HttpClient, ReqwestClient, RetryPolicy, TransferEngine};
use crate::vcs::{CloneOptions, GitCli, PushPolicy};

pub const DEFAULT_SERVER_URL: &str = "https://flirconservator.com";
pub const DEFAULT_PUSH_MARKER: &str = "updated in conservator";
pub const ENV_URL: &str = "FRAMESYNC_URL";
pub const ENV_CACHE_DIR: &str = "FRAMESYNC_CACHE_DIR";

/// Tool configuration. Every field has a default, so an empty or missing
/// file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub server_url: String,
    /// Content endpoint base; `<server_url>/dvc` when unset.
    pub content_url: Option<String>,
    /// Clone URL pattern with `{server}` and `{id}` placeholders.
    pub repository_template: String,
    /// Cache root; relative paths resolve against the dataset root.
    pub cache_dir: Option<PathBuf>,
    pub pool_size: usize,
    pub tries: u32,
    pub clone_retries: u32,
    pub clone_delay_secs: u64,
    pub retry_delay_secs: u64,
    /// Output the server prints on an accepted push. Empty means trust the
    /// exit status.
    pub push_acceptance_marker: String,
    pub writable_branch: String,
    /// Written to `user.email` of new clones.
    pub email: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            content_url: None,
            repository_template: "{server}/git/dataset_{id}".to_string(),
            cache_dir: None,
            pool_size: 10,
            tries: 5,
            clone_retries: 5,
            clone_delay_secs: 5,
            retry_delay_secs: 1,
            push_acceptance_marker: DEFAULT_PUSH_MARKER.to_string(),
            writable_branch: "master".to_string(),
            email: None,
        }
    }
}

impl Settings {
    /// `<config_dir>/framesync/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("framesync").join("config.toml"))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    /// Load from `path`, or from the default location when `None`.
    ///
    /// An explicitly named file must exist; a missing default file yields
    /// the defaults. Environment overrides are applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::read(path)?,
            None => match Self::default_path() {
                Some(path) if path.is_file() => Self::read(&path)?,
                _ => Self::default(),
            },
        };
        settings.apply_env(|key| std::env::var(key).ok());
        Ok(settings)
    }

    fn read(path: &Path) -> Result<Self> {
        debug!("Reading settings from {}", path.display());
        let text =
            fs::read_to_string(path).map_err(|e| Error::io(e, "reading", path.to_path_buf()))?;
        Self::from_toml(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Apply `FRAMESYNC_URL` and `FRAMESYNC_CACHE_DIR` from `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup(ENV_URL).filter(|v| !v.is_empty()) {
            self.server_url = url;
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn server_url(&self) -> &str {
        self.server_url.trim_end_matches('/')
    }

    pub fn content_base(&self) -> String {
        match &self.content_url {
            Some(url) => url.trim_end_matches('/').to_string(),
            None => format!("{}/dvc", self.server_url()),
        }
    }

    /// Configured cache root, or `<cache_dir>/framesync` for the platform.
    pub fn cache_root(&self) -> PathBuf {
        match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => dirs::cache_dir()
                .map(|dir| dir.join("framesync"))
                .unwrap_or_else(|| PathBuf::from(".framesync").join("cache")),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.tries, Duration::from_secs(self.retry_delay_secs))
    }

    pub fn push_policy(&self) -> PushPolicy {
        PushPolicy::new(Some(self.push_acceptance_marker.clone()))
    }

    pub fn clone_options(&self) -> CloneOptions {
        CloneOptions {
            retries: self.clone_retries,
            delay: Duration::from_secs(self.clone_delay_secs),
            email: self.email.clone(),
            checkout: None,
        }
    }

    /// Production collaborators: reqwest for HTTP, the `git` binary for
    /// version control.
    pub fn sync_context(&self, show_progress: bool) -> Result<SyncContext> {
        let client: Arc<dyn HttpClient> = Arc::new(ReqwestClient::new(None)?);
        let backend = HttpBackend::new(
            self.server_url(),
            self.content_base(),
            self.repository_template.clone(),
            client.clone(),
        );
        Ok(SyncContext {
            vcs: Arc::new(GitCli::new()),
            backend: Arc::new(backend),
            transfer: TransferEngine::new(client, self.retry_policy()).with_progress(show_progress),
            cache_dir: self.cache_root(),
            writable_branch: self.writable_branch.clone(),
            push_policy: self.push_policy(),
        })
    }
}

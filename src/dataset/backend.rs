//! The backend API collaborator: repository locations, remote content
//! existence and identifier generation.

use std::sync::Arc;

use tracing::debug;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::transfer::HttpClient;

/// URL of a blob under a content-addressed base: `<base>/<hash[0:2]>/<hash[2:]>`.
pub fn content_url(base: &str, hash: &str) -> String {
    let base = base.trim_end_matches('/');
    if hash.len() < 2 {
        return format!("{}/{}", base, hash);
    }
    format!("{}/{}/{}", base, &hash[..2], &hash[2..])
}

/// What the sync engine needs from the remote service besides raw bytes.
pub trait BackendApi: Send + Sync {
    /// Clone URL of a dataset's repository.
    fn repository_url(&self, dataset_id: &str) -> String;

    /// Content endpoint for `hash`.
    fn content_url(&self, hash: &str) -> String;

    /// Whether the remote already stores `hash`.
    fn hash_exists(&self, hash: &str) -> Result<bool>;

    /// A fresh identifier for a new frame.
    fn generate_id(&self) -> Result<String>;
}

/// Backend over plain HTTP: existence via `HEAD` on the content endpoint,
/// identifiers from random UUIDs.
#[derive(Clone)]
pub struct HttpBackend {
    server_url: String,
    content_base: String,
    repository_template: String,
    client: Arc<dyn HttpClient>,
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("server_url", &self.server_url)
            .field("content_base", &self.content_base)
            .field("repository_template", &self.repository_template)
            .finish_non_exhaustive()
    }
}

impl HttpBackend {
    /// `repository_template` may use `{server}` and `{id}` placeholders.
    pub fn new(
        server_url: impl Into<String>,
        content_base: impl Into<String>,
        repository_template: impl Into<String>,
        client: Arc<dyn HttpClient>,
    ) -> Self {
        Self {
            server_url: server_url.into().trim_end_matches('/').to_string(),
            content_base: content_base.into(),
            repository_template: repository_template.into(),
            client,
        }
    }
}

impl BackendApi for HttpBackend {
    fn repository_url(&self, dataset_id: &str) -> String {
        self.repository_template
            .replace("{server}", &self.server_url)
            .replace("{id}", dataset_id)
    }

    fn content_url(&self, hash: &str) -> String {
        content_url(&self.content_base, hash)
    }

    fn hash_exists(&self, hash: &str) -> Result<bool> {
        let url = self.content_url(hash);
        let status = self.client.head(&url)?;
        debug!("HEAD {} -> {}", url, status);
        match status {
            200..=299 => Ok(true),
            404 => Ok(false),
            other => Err(Error::Backend(format!(
                "unexpected status {} checking {}",
                other, url
            ))),
        }
    }

    fn generate_id(&self) -> Result<String> {
        Ok(Uuid::new_v4().simple().to_string())
    }
}

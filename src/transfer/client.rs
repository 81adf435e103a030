//! HTTP client abstraction.
//!
//! The transfer engine talks to the network only through [`HttpClient`], so the
//! retry and integrity logic can be exercised against an in-memory client.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::ETAG;

use crate::error::{Error, Result};

/// Response to a single HTTP request.
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// `ETag` header, if the server sent one.
    pub etag: Option<String>,
    /// Response body, streamed.
    pub body: Box<dyn Read + Send>,
}

impl HttpResponse {
    /// Build a response from an in-memory body.
    pub fn from_bytes(status: u16, body: Vec<u8>) -> Self {
        Self {
            status,
            etag: None,
            body: Box::new(std::io::Cursor::new(body)),
        }
    }

    /// Attach an `ETag` header value.
    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

impl std::fmt::Debug for HttpResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpResponse")
            .field("status", &self.status)
            .field("etag", &self.etag)
            .finish_non_exhaustive()
    }
}

/// HTTP client abstraction.
///
/// Implementations return `Err` only for connection-level failures; any
/// response the server produced, whatever its status, is returned as `Ok`.
pub trait HttpClient: Send + Sync {
    /// Sends a GET request.
    fn get(&self, url: &str) -> Result<HttpResponse>;

    /// Sends a PUT request with the contents of `path` as the body.
    fn put(&self, url: &str, path: &Path, headers: &[(String, String)]) -> Result<HttpResponse>;

    /// Sends a HEAD request and returns the status code.
    fn head(&self, url: &str) -> Result<u16>;
}

/// Production client over `reqwest::blocking`.
#[derive(Debug, Clone)]
pub struct ReqwestClient {
    client: Client,
}

impl ReqwestClient {
    /// Create a client with the given overall request timeout. `None`
    /// disables the timeout, which large media downloads usually need.
    pub fn new(timeout: Option<Duration>) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn connection_error(url: &str, err: reqwest::Error) -> Error {
    Error::Connection {
        url: url.to_string(),
        reason: err.to_string(),
    }
}

fn into_response(response: reqwest::blocking::Response) -> HttpResponse {
    let status = response.status().as_u16();
    let etag = response
        .headers()
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    HttpResponse {
        status,
        etag,
        body: Box::new(response),
    }
}

impl HttpClient for ReqwestClient {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|e| connection_error(url, e))?;
        Ok(into_response(response))
    }

    fn put(&self, url: &str, path: &Path, headers: &[(String, String)]) -> Result<HttpResponse> {
        let file = File::open(path).map_err(|e| Error::io(e, "reading", path.to_path_buf()))?;
        let mut request = self.client.put(url).body(file);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        let response = request.send().map_err(|e| connection_error(url, e))?;
        Ok(into_response(response))
    }

    fn head(&self, url: &str) -> Result<u16> {
        let response = self
            .client
            .head(url)
            .send()
            .map_err(|e| connection_error(url, e))?;
        Ok(response.status().as_u16())
    }
}

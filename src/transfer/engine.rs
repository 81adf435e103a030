//! Single-item and batched transfers.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::unbounded;
use indicatif::{ProgressBar, ProgressStyle};
use rayon::ThreadPoolBuilder;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::client::{HttpClient, HttpResponse};
use super::request::{DownloadRequest, UploadRequest};
use super::retry::{is_transient, RetryPolicy};
use crate::error::{Error, Result};
use crate::hash::{hash_file, HashingWriter};

/// Moves bytes between the content endpoint and the local filesystem.
///
/// Cloning is cheap; the HTTP client is shared.
#[derive(Clone)]
pub struct TransferEngine {
    client: Arc<dyn HttpClient>,
    retry: RetryPolicy,
    show_progress: bool,
}

impl std::fmt::Debug for TransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferEngine")
            .field("retry", &self.retry)
            .field("show_progress", &self.show_progress)
            .finish_non_exhaustive()
    }
}

impl TransferEngine {
    pub fn new(client: Arc<dyn HttpClient>, retry: RetryPolicy) -> Self {
        Self {
            client,
            retry,
            show_progress: false,
        }
    }

    /// Show an indicatif progress bar during batched transfers.
    pub fn with_progress(mut self, show_progress: bool) -> Self {
        self.show_progress = show_progress;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn client(&self) -> &Arc<dyn HttpClient> {
        &self.client
    }

    /// Send a request until it succeeds, fails permanently, or the retry
    /// budget for transient statuses runs out.
    fn send_with_retry<F>(&self, url: &str, send: F) -> Result<HttpResponse>
    where
        F: Fn() -> Result<HttpResponse>,
    {
        let attempts = self.retry.attempts();
        let mut attempt = 0;
        loop {
            attempt += 1;
            let response = send()?;
            if response.is_success() {
                return Ok(response);
            }
            if !is_transient(response.status) {
                return Err(Error::Transfer {
                    url: url.to_string(),
                    status: response.status,
                });
            }
            if attempt >= attempts {
                return Err(Error::RetriesExhausted {
                    url: url.to_string(),
                    status: response.status,
                    attempts,
                });
            }
            let delay = self.retry.delay_for(attempt);
            warn!(
                "Got status {} from {}, retrying in {:?} ({}/{})",
                response.status, url, delay, attempt, attempts
            );
            thread::sleep(delay);
        }
    }

    /// Download `request.url` to `request.local_path`.
    ///
    /// Whatever was at the target is removed first. The body streams into a
    /// temporary file in the target directory that is renamed into place only
    /// after the transfer (and hash check, if requested) completes, so a
    /// failure at any point leaves nothing at the target.
    pub fn download(&self, request: &DownloadRequest) -> Result<()> {
        let target = request.local_path.as_path();
        remove_if_present(target)?;

        let response = self.send_with_retry(&request.url, || self.client.get(&request.url))?;
        debug!("Downloading {} to {}", request.url, target.display());
        write_body(response, target, request.expected_hash.as_deref())
    }

    /// Download unless `local_path` already holds the expected bytes.
    ///
    /// Returns true if a transfer took place.
    pub fn download_if_missing(
        &self,
        url: &str,
        local_path: &Path,
        expected_hash: &str,
    ) -> Result<bool> {
        if local_path.is_file() {
            match hash_file(local_path) {
                Ok(actual) if actual == expected_hash => {
                    debug!("{} already up to date", local_path.display());
                    return Ok(false);
                }
                Ok(_) => debug!("{} is stale, downloading", local_path.display()),
                Err(e) => debug!("{} unreadable ({}), downloading", local_path.display(), e),
            }
        }
        let request = DownloadRequest::new(url, local_path).with_expected_hash(expected_hash);
        self.download(&request)?;
        Ok(true)
    }

    /// PUT the file at `request.local_path` to `request.url`.
    pub fn upload(&self, request: &UploadRequest) -> Result<()> {
        let path = request.local_path.as_path();
        if !path.is_file() {
            return Err(Error::NotFound {
                path: path.to_path_buf(),
            });
        }
        let response = self.send_with_retry(&request.url, || {
            self.client.put(&request.url, path, &request.headers)
        })?;

        if let (Some(etag), Some(expected)) = (&response.etag, &request.expected_hash) {
            let etag = etag.trim_matches('"');
            if etag != expected {
                return Err(Error::Integrity {
                    path: path.to_path_buf(),
                    expected: expected.clone(),
                    actual: etag.to_string(),
                });
            }
        }
        debug!("Uploaded {} to {}", path.display(), request.url);
        Ok(())
    }

    /// Run downloads on a pool of `workers` threads.
    ///
    /// The result at index `i` is true if `requests[i]` succeeded.
    pub fn download_many(&self, requests: &[DownloadRequest], workers: usize) -> Vec<bool> {
        self.run_batch("Downloading", requests, workers, |request| {
            self.download(request)
        })
    }

    /// Run uploads on a pool of `workers` threads.
    pub fn upload_many(&self, requests: &[UploadRequest], workers: usize) -> Vec<bool> {
        self.run_batch("Uploading", requests, workers, |request| self.upload(request))
    }

    /// Fan `items` out over a fixed-size pool and collect one outcome per item.
    ///
    /// Workers report `(index, ok)` over a channel as they finish; the calling
    /// thread drains it to drive the progress bar. An item's error is logged
    /// and reduced to `false` inside its worker.
    fn run_batch<T, F>(&self, label: &str, items: &[T], workers: usize, op: F) -> Vec<bool>
    where
        T: Sync,
        F: Fn(&T) -> Result<()> + Sync,
    {
        let mut results = vec![false; items.len()];
        if items.is_empty() {
            return results;
        }

        let workers = workers.max(1).min(items.len());
        let pool = match ThreadPoolBuilder::new().num_threads(workers).build() {
            Ok(pool) => Some(pool),
            Err(e) => {
                warn!("Could not start worker pool ({}), running sequentially", e);
                None
            }
        };

        let pb = self.progress_bar(items.len() as u64, label);
        let (sender, receiver) = unbounded::<(usize, bool)>();
        let op = &op;
        let run = move |index: usize, item: &T| -> bool {
            match op(item) {
                Ok(()) => true,
                Err(e) => {
                    warn!("{} item {} failed: {}", label, index, e);
                    false
                }
            }
        };

        thread::scope(|s| {
            s.spawn(move || {
                match pool {
                    Some(pool) => pool.scope(|scope| {
                        for (index, item) in items.iter().enumerate() {
                            let sender = sender.clone();
                            scope.spawn(move |_| {
                                let _ = sender.send((index, run(index, item)));
                            });
                        }
                    }),
                    None => {
                        for (index, item) in items.iter().enumerate() {
                            let _ = sender.send((index, run(index, item)));
                        }
                    }
                }
                drop(sender);
            });

            let mut succeeded = 0usize;
            let mut failed = 0usize;
            for (index, ok) in receiver.iter() {
                results[index] = ok;
                if ok {
                    succeeded += 1;
                } else {
                    failed += 1;
                }
                pb.set_message(format!("{} OK, {} failed", succeeded, failed));
                pb.inc(1);
            }
        });

        pb.finish_and_clear();
        let succeeded = results.iter().filter(|ok| **ok).count();
        info!(
            "{} finished: {}/{} succeeded",
            label,
            succeeded,
            items.len()
        );
        results
    }

    fn progress_bar(&self, len: u64, label: &str) -> ProgressBar {
        if !self.show_progress {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new(len);
        let template = format!(
            "{} [{{elapsed_precise}}] [{{bar:40.cyan/blue}}] {{pos}}/{{len}} files \
             ({{percent}}%) | {{msg}}",
            label
        );
        pb.set_style(
            ProgressStyle::default_bar()
                .template(&template)
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        pb
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(Error::io(e, "removing", path.to_path_buf())),
    }
}

/// Stream `response` into a temporary sibling of `target`, verify, then rename.
fn write_body(
    mut response: HttpResponse,
    target: &Path,
    expected_hash: Option<&str>,
) -> Result<()> {
    let dir = match target.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir).map_err(|e| Error::io(e, "creating directory", dir.to_path_buf()))?;

    let temp = NamedTempFile::new_in(dir)
        .map_err(|e| Error::io(e, "creating temporary file in", dir.to_path_buf()))?;
    let mut writer = HashingWriter::new(BufWriter::new(temp));
    io::copy(&mut response.body, &mut writer)
        .map_err(|e| Error::io(e, "downloading to", target.to_path_buf()))?;
    writer
        .flush()
        .map_err(|e| Error::io(e, "writing", target.to_path_buf()))?;

    let (buffered, actual) = writer.finish();
    if let Some(expected) = expected_hash {
        if actual != expected {
            return Err(Error::Integrity {
                path: target.to_path_buf(),
                expected: expected.to_string(),
                actual,
            });
        }
    }

    let temp = buffered
        .into_inner()
        .map_err(|e| Error::io(e.into_error(), "flushing", target.to_path_buf()))?;
    temp.persist(target)
        .map_err(|e| Error::io(e.error, "renaming into", target.to_path_buf()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Serves a scripted list of statuses per URL; the last one repeats.
    #[derive(Default)]
    struct ScriptedClient {
        scripts: Mutex<HashMap<String, Vec<u16>>>,
        body: Vec<u8>,
        calls: Mutex<usize>,
    }

    impl ScriptedClient {
        fn with(url: &str, statuses: Vec<u16>, body: &[u8]) -> Self {
            let mut scripts = HashMap::new();
            scripts.insert(url.to_string(), statuses);
            Self {
                scripts: Mutex::new(scripts),
                body: body.to_vec(),
                calls: Mutex::new(0),
            }
        }

        fn next_status(&self, url: &str) -> u16 {
            *self.calls.lock().unwrap() += 1;
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(url) {
                Some(statuses) if statuses.len() > 1 => statuses.remove(0),
                Some(statuses) => statuses[0],
                None => 404,
            }
        }
    }

    impl HttpClient for ScriptedClient {
        fn get(&self, url: &str) -> Result<HttpResponse> {
            let status = self.next_status(url);
            Ok(HttpResponse::from_bytes(status, self.body.clone()))
        }

        fn put(
            &self,
            url: &str,
            _path: &Path,
            _headers: &[(String, String)],
        ) -> Result<HttpResponse> {
            let status = self.next_status(url);
            Ok(HttpResponse::from_bytes(status, Vec::new()))
        }

        fn head(&self, url: &str) -> Result<u16> {
            Ok(self.next_status(url))
        }
    }

    fn make_engine(
        client: ScriptedClient,
        attempts: u32,
    ) -> (TransferEngine, Arc<ScriptedClient>) {
        let client = Arc::new(client);
        let retry = RetryPolicy::new(attempts, Duration::ZERO);
        let engine = TransferEngine::new(client.clone(), retry);
        (engine, client)
    }

    #[test]
    fn test_retry_bound() {
        let url = "http://h/ab/cd";
        for retries in 1..4u32 {
            let mut statuses = vec![502; retries as usize];
            statuses.push(200);

            let dir = tempfile::tempdir().unwrap();
            let target = dir.path().join("out");
            let client = ScriptedClient::with(url, statuses.clone(), b"hello");
            let (engine, _) = make_engine(client, retries + 1);
            engine.download(&DownloadRequest::new(url, &target)).unwrap();
            assert_eq!(fs::read(&target).unwrap(), b"hello");

            let target = dir.path().join("out2");
            let (engine, _) = make_engine(ScriptedClient::with(url, statuses, b"hello"), retries);
            let err = engine.download(&DownloadRequest::new(url, &target)).unwrap_err();
            assert!(matches!(err, Error::RetriesExhausted { status: 502, .. }));
            assert!(!target.exists());
        }
    }

    #[test]
    fn test_permanent_status_not_retried() {
        let url = "http://h/ab/cd";
        let dir = tempfile::tempdir().unwrap();
        let (engine, client) = make_engine(ScriptedClient::with(url, vec![500, 200], b"x"), 5);
        let err = engine
            .download(&DownloadRequest::new(url, dir.path().join("out")))
            .unwrap_err();
        assert!(matches!(err, Error::Transfer { status: 500, .. }));
        assert_eq!(*client.calls.lock().unwrap(), 1);
    }

    #[test]
    fn test_hash_mismatch_leaves_nothing() {
        let url = "http://h/ab/cd";
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        fs::write(&target, b"previous").unwrap();
        let (engine, _) = make_engine(ScriptedClient::with(url, vec![200], b"jello"), 1);
        let request = DownloadRequest::new(url, &target)
            .with_expected_hash("5d41402abc4b2a76b9719d911017c592");
        assert!(engine.download(&request).unwrap_err().is_integrity());
        assert!(!target.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_download_if_missing_skips_valid_file() {
        let url = "http://h/ab/cd";
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out");
        fs::write(&target, b"hello").unwrap();
        let (engine, client) = make_engine(ScriptedClient::with(url, vec![200], b"hello"), 1);
        let fetched = engine
            .download_if_missing(url, &target, "5d41402abc4b2a76b9719d911017c592")
            .unwrap();
        assert!(!fetched);
        assert_eq!(*client.calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_upload_missing_file() {
        let (engine, client) = make_engine(ScriptedClient::default(), 1);
        let err = engine
            .upload(&UploadRequest::new("http://h/x", "/no/such/file.jpg"))
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert_eq!(*client.calls.lock().unwrap(), 0);
    }

    #[test]
    fn test_single_worker_batch_completes() {
        let url = "http://h/ab/cd";
        let dir = tempfile::tempdir().unwrap();
        let (engine, _) = make_engine(ScriptedClient::with(url, vec![200], b"hello"), 1);
        let requests: Vec<_> = (0..4)
            .map(|i| DownloadRequest::new(url, dir.path().join(format!("f{i}"))))
            .collect();
        assert_eq!(engine.download_many(&requests, 1), vec![true; 4]);
        assert!(engine.download_many(&[], 3).is_empty());
    }
}

// Shared fixtures for integration tests
// In-memory content server and version-control backend

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use framesync::dataset::{FrameEntry, HttpBackend, LocalDataset, Manifest, SyncContext};
use framesync::hash::hash_reader;
use framesync::transfer::{HttpClient, HttpResponse, RetryPolicy, TransferEngine};
use framesync::vcs::{CommandOutput, PushPolicy, VersionControl};
use framesync::Result;
use image::{ImageBuffer, ImageFormat, Rgb};

pub const CONTENT_BASE: &str = "http://content.test/dvc";
pub const SERVER: &str = "http://content.test";
pub const MARKER: &str = "updated in conservator";

pub fn content_url(hash: &str) -> String {
    framesync::dataset::content_url(CONTENT_BASE, hash)
}

/// Content server keeping blobs in memory, with per-URL failure scripts.
#[derive(Default)]
pub struct FakeContentServer {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
    scripts: Mutex<HashMap<String, VecDeque<u16>>>,
    always_fail: Mutex<HashSet<String>>,
    truncate: Mutex<HashSet<String>>,
    requests: Mutex<Vec<(String, String)>>,
}

impl FakeContentServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, hash: &str, bytes: &[u8]) {
        self.blobs
            .lock()
            .unwrap()
            .insert(content_url(hash), bytes.to_vec());
    }

    pub fn insert_url(&self, url: &str, bytes: &[u8]) {
        self.blobs.lock().unwrap().insert(url.to_string(), bytes.to_vec());
    }

    pub fn blob(&self, hash: &str) -> Option<Vec<u8>> {
        self.blobs.lock().unwrap().get(&content_url(hash)).cloned()
    }

    /// Respond with these statuses, in order, before behaving normally.
    pub fn script(&self, url: &str, statuses: &[u16]) {
        self.scripts
            .lock()
            .unwrap()
            .insert(url.to_string(), statuses.iter().copied().collect());
    }

    pub fn fail_always(&self, url: &str) {
        self.always_fail.lock().unwrap().insert(url.to_string());
    }

    /// Serve a body that breaks off halfway with an I/O error.
    pub fn truncate(&self, url: &str) {
        self.truncate.lock().unwrap().insert(url.to_string());
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self, method: &str) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, url)| url.clone())
            .collect()
    }

    pub fn reset_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    fn record(&self, method: &str, url: &str) -> Option<u16> {
        self.requests
            .lock()
            .unwrap()
            .push((method.to_string(), url.to_string()));
        if self.always_fail.lock().unwrap().contains(url) {
            return Some(500);
        }
        self.scripts
            .lock()
            .unwrap()
            .get_mut(url)
            .and_then(|statuses| statuses.pop_front())
    }
}

/// Yields half the bytes, then fails.
struct BrokenBody {
    data: io::Cursor<Vec<u8>>,
    limit: u64,
}

impl Read for BrokenBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.data.position() >= self.limit {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "connection reset"));
        }
        let remaining = (self.limit - self.data.position()) as usize;
        let n = buf.len().min(remaining);
        self.data.read(&mut buf[..n])
    }
}

impl HttpClient for FakeContentServer {
    fn get(&self, url: &str) -> Result<HttpResponse> {
        if let Some(status) = self.record("GET", url) {
            return Ok(HttpResponse::from_bytes(status, Vec::new()));
        }
        let body = self.blobs.lock().unwrap().get(url).cloned();
        match body {
            Some(bytes) if self.truncate.lock().unwrap().contains(url) => {
                let limit = (bytes.len() / 2) as u64;
                Ok(HttpResponse {
                    status: 200,
                    etag: None,
                    body: Box::new(BrokenBody {
                        data: io::Cursor::new(bytes),
                        limit,
                    }),
                })
            }
            Some(bytes) => Ok(HttpResponse::from_bytes(200, bytes)),
            None => Ok(HttpResponse::from_bytes(404, Vec::new())),
        }
    }

    fn put(&self, url: &str, path: &Path, _headers: &[(String, String)]) -> Result<HttpResponse> {
        if let Some(status) = self.record("PUT", url) {
            return Ok(HttpResponse::from_bytes(status, Vec::new()));
        }
        let bytes = fs::read(path).unwrap();
        let md5 = hash_reader(&bytes[..]).unwrap();
        self.blobs.lock().unwrap().insert(url.to_string(), bytes);
        Ok(HttpResponse::from_bytes(200, Vec::new()).with_etag(format!("\"{}\"", md5)))
    }

    fn head(&self, url: &str) -> Result<u16> {
        if let Some(status) = self.record("HEAD", url) {
            return Ok(status);
        }
        Ok(if self.blobs.lock().unwrap().contains_key(url) {
            200
        } else {
            404
        })
    }
}

type Tree = BTreeMap<String, Vec<u8>>;

#[derive(Default)]
struct Remote {
    files: Tree,
    pushes: usize,
    /// Files that appear only after this many fetches.
    pending: Option<(usize, Tree)>,
}

struct Checkout {
    remote: String,
    head: Tree,
    index: Tree,
    branch: Option<String>,
}

/// Top-level manifest files the fake tracks besides `associated_files/`.
const TRACKED_TOP_LEVEL: [&str; 4] =
    ["index.json", "dataset.jsonl", "frames.jsonl", "videos.jsonl"];

/// A tiny in-memory stand-in for git, tracking the manifest files and
/// `associated_files/` only.
#[derive(Default)]
pub struct FakeVcs {
    remotes: Mutex<HashMap<String, Remote>>,
    checkouts: Mutex<HashMap<PathBuf, Checkout>>,
    branch: Mutex<Option<String>>,
    clone_failures: Mutex<usize>,
    push_override: Mutex<Option<CommandOutput>>,
    calls: Mutex<Vec<String>>,
    added: Mutex<Vec<String>>,
}

fn write_tree(dir: &Path, tree: &Tree) {
    for (name, bytes) in tree {
        let path = dir.join(name);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, bytes).unwrap();
    }
}

fn read_worktree(dir: &Path) -> Tree {
    let mut tree = Tree::new();
    for name in TRACKED_TOP_LEVEL {
        if let Ok(bytes) = fs::read(dir.join(name)) {
            tree.insert(name.into(), bytes);
        }
    }
    if let Ok(entries) = fs::read_dir(dir.join("associated_files")) {
        for entry in entries.flatten() {
            if entry.path().is_file() {
                let name = format!("associated_files/{}", entry.file_name().to_string_lossy());
                tree.insert(name, fs::read(entry.path()).unwrap());
            }
        }
    }
    tree
}

/// Top-level entries the fake never tracks, listed the way git reports
/// untracked files and directories.
fn untracked_outside(dir: &Path) -> Vec<String> {
    let mut names = Vec::new();
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let name = entry.file_name().to_string_lossy().to_string();
            if TRACKED_TOP_LEVEL.contains(&name.as_str()) || name == "associated_files" {
                continue;
            }
            if entry.path().is_dir() {
                names.push(format!("{}/", name));
            } else {
                names.push(name);
            }
        }
    }
    names.sort();
    names
}

impl FakeVcs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn add_remote(&self, url: &str, manifest: &Manifest) {
        let mut files = Tree::new();
        files.insert("index.json".into(), manifest.to_json().unwrap().into_bytes());
        self.remotes.lock().unwrap().insert(
            url.to_string(),
            Remote {
                files,
                ..Default::default()
            },
        );
    }

    /// A remote holding exactly `files`.
    pub fn add_remote_files(&self, url: &str, files: &[(&str, Vec<u8>)]) {
        let files = files
            .iter()
            .map(|(name, bytes)| (name.to_string(), bytes.clone()))
            .collect();
        self.remotes.lock().unwrap().insert(
            url.to_string(),
            Remote {
                files,
                ..Default::default()
            },
        );
    }

    /// Replace one file on the remote, as if another clone had pushed it.
    pub fn set_remote_file(&self, url: &str, name: &str, bytes: Vec<u8>) {
        let mut remotes = self.remotes.lock().unwrap();
        remotes.get_mut(url).unwrap().files.insert(name.to_string(), bytes);
    }

    /// A remote in the line-delimited layout, with an `index.json` left
    /// behind by the old layout that no longer lists any frames.
    pub fn add_jsonl_remote(&self, url: &str, manifest: &Manifest) {
        let mut record = manifest.extra.clone();
        record.insert("datasetId".into(), manifest.dataset_id.clone().into());
        let mut dataset = serde_json::to_vec(&record).unwrap();
        dataset.push(b'\n');
        let stale = Manifest::new(&manifest.dataset_id).to_json().unwrap().into_bytes();
        self.add_remote_files(
            url,
            &[
                ("dataset.jsonl", dataset),
                ("frames.jsonl", frames_jsonl(&manifest.frames)),
                ("videos.jsonl", b"{\"videoId\":\"v1\"}\n".to_vec()),
                ("index.json", stale),
            ],
        );
    }

    /// Frames listed in the remote's `frames.jsonl`.
    pub fn remote_frames(&self, url: &str) -> Vec<FrameEntry> {
        let bytes = self.remote_file(url, "frames.jsonl").unwrap_or_default();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    /// A remote that exists but has no content until `after_fetches` fetches.
    pub fn add_slow_remote(&self, url: &str, manifest: &Manifest, after_fetches: usize) {
        let mut files = Tree::new();
        files.insert("index.json".into(), manifest.to_json().unwrap().into_bytes());
        self.remotes.lock().unwrap().insert(
            url.to_string(),
            Remote {
                files: Tree::new(),
                pushes: 0,
                pending: Some((after_fetches, files)),
            },
        );
    }

    pub fn fail_clones(&self, times: usize) {
        *self.clone_failures.lock().unwrap() = times;
    }

    /// Switch every checkout, present and future, to `branch`.
    pub fn set_branch(&self, branch: &str) {
        *self.branch.lock().unwrap() = Some(branch.to_string());
        for checkout in self.checkouts.lock().unwrap().values_mut() {
            checkout.branch = Some(branch.to_string());
        }
    }

    pub fn set_push_output(&self, output: CommandOutput) {
        *self.push_override.lock().unwrap() = Some(output);
    }

    pub fn remote_manifest(&self, url: &str) -> Manifest {
        let remotes = self.remotes.lock().unwrap();
        let bytes = &remotes[url].files["index.json"];
        serde_json::from_slice(bytes).unwrap()
    }

    pub fn remote_file(&self, url: &str, name: &str) -> Option<Vec<u8>> {
        self.remotes.lock().unwrap()[url].files.get(name).cloned()
    }

    /// Every path handed to `add`, in order.
    pub fn added_paths(&self) -> Vec<String> {
        self.added.lock().unwrap().clone()
    }

    pub fn remote_pushes(&self, url: &str) -> usize {
        self.remotes.lock().unwrap()[url].pushes
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn with_checkout<T>(&self, dir: &Path, f: impl FnOnce(&mut Checkout) -> T) -> Option<T> {
        self.checkouts.lock().unwrap().get_mut(dir).map(f)
    }
}

impl VersionControl for FakeVcs {
    fn clone_repo(&self, remote: &str, dest: &Path) -> Result<CommandOutput> {
        self.record("clone");
        {
            let mut failures = self.clone_failures.lock().unwrap();
            if *failures > 0 {
                *failures -= 1;
                return Ok(CommandOutput::failed("fatal: repository not ready"));
            }
        }
        let files = match self.remotes.lock().unwrap().get(remote) {
            Some(r) => r.files.clone(),
            None => return Ok(CommandOutput::failed("fatal: repository not found")),
        };
        fs::create_dir_all(dest).unwrap();
        write_tree(dest, &files);
        self.checkouts.lock().unwrap().insert(
            dest.to_path_buf(),
            Checkout {
                remote: remote.to_string(),
                head: files.clone(),
                index: files,
                branch: self.branch.lock().unwrap().clone(),
            },
        );
        Ok(CommandOutput::ok(""))
    }

    fn fetch(&self, dir: &Path) -> Result<CommandOutput> {
        self.record("fetch");
        let remote = match self.with_checkout(dir, |c| c.remote.clone()) {
            Some(remote) => remote,
            None => return Ok(CommandOutput::failed("fatal: not a git repository")),
        };
        let mut remotes = self.remotes.lock().unwrap();
        if let Some(r) = remotes.get_mut(&remote) {
            if let Some((after, files)) = r.pending.take() {
                if after <= 1 {
                    r.files = files;
                } else {
                    r.pending = Some((after - 1, files));
                }
            }
        }
        Ok(CommandOutput::ok(""))
    }

    fn reset_hard(&self, dir: &Path, rev: &str) -> Result<CommandOutput> {
        self.record("reset");
        let remote = match self.with_checkout(dir, |c| c.remote.clone()) {
            Some(remote) => remote,
            None => return Ok(CommandOutput::failed("fatal: not a git repository")),
        };
        let target = if rev.starts_with("origin/") {
            let remotes = self.remotes.lock().unwrap();
            remotes[&remote].files.clone()
        } else if rev == "HEAD" {
            self.with_checkout(dir, |c| c.head.clone()).unwrap_or_default()
        } else {
            return Ok(CommandOutput::failed(format!("fatal: unknown revision '{}'", rev)));
        };
        write_tree(dir, &target);
        self.with_checkout(dir, |c| {
            c.head = target.clone();
            c.index = target;
        });
        Ok(CommandOutput::ok(""))
    }

    fn checkout_branch(&self, dir: &Path, branch: &str, start: &str) -> Result<CommandOutput> {
        self.record("checkout");
        let (remote, head) = match self.with_checkout(dir, |c| (c.remote.clone(), c.head.clone())) {
            Some(state) => state,
            None => return Ok(CommandOutput::failed("fatal: not a git repository")),
        };
        let target = if start.starts_with("origin/") {
            self.remotes.lock().unwrap()[&remote].files.clone()
        } else {
            head.clone()
        };
        let worktree = read_worktree(dir);
        let edited = |name: &String| worktree.get(name) != head.get(name);

        let mut names: Vec<&String> = head.keys().chain(target.keys()).collect();
        names.sort();
        names.dedup();
        for name in &names {
            if edited(*name) && head.get(*name) != target.get(*name) {
                return Ok(CommandOutput::failed(format!(
                    "error: Your local changes to the following files would be overwritten \
                     by checkout:\n\t{}",
                    name
                )));
            }
        }
        for name in names {
            if edited(name) {
                continue;
            }
            match target.get(name) {
                Some(bytes) => {
                    let path = dir.join(name);
                    fs::create_dir_all(path.parent().unwrap()).unwrap();
                    fs::write(path, bytes).unwrap();
                }
                None => {
                    let _ = fs::remove_file(dir.join(name));
                }
            }
        }
        self.with_checkout(dir, |c| {
            c.head = target.clone();
            c.index = target;
            c.branch = Some(branch.to_string());
        });
        Ok(CommandOutput::ok(""))
    }

    fn add(&self, dir: &Path, paths: &[String]) -> Result<CommandOutput> {
        self.record("add");
        self.added.lock().unwrap().extend(paths.iter().cloned());
        let worktree = read_worktree(dir);
        self.with_checkout(dir, |c| {
            for path in paths {
                let prefix = path.trim_end_matches('/');
                for (name, bytes) in &worktree {
                    if name == prefix || name.starts_with(&format!("{}/", prefix)) {
                        c.index.insert(name.clone(), bytes.clone());
                    }
                }
            }
        });
        Ok(CommandOutput::ok(""))
    }

    fn commit(&self, dir: &Path, _message: &str) -> Result<CommandOutput> {
        self.record("commit");
        let committed = self.with_checkout(dir, |c| {
            if c.index == c.head {
                false
            } else {
                c.head = c.index.clone();
                true
            }
        });
        Ok(match committed {
            Some(true) => CommandOutput::ok("1 file changed"),
            _ => CommandOutput::failed("nothing to commit"),
        })
    }

    fn push(&self, dir: &Path) -> Result<CommandOutput> {
        self.record("push");
        if let Some(output) = self.push_override.lock().unwrap().clone() {
            return Ok(output);
        }
        let (remote, head) = match self.with_checkout(dir, |c| (c.remote.clone(), c.head.clone())) {
            Some(state) => state,
            None => return Ok(CommandOutput::failed("fatal: not a git repository")),
        };
        let mut remotes = self.remotes.lock().unwrap();
        let r = remotes.get_mut(&remote).unwrap();
        if r.files == head {
            return Ok(CommandOutput::ok("Everything up-to-date"));
        }
        r.files = head;
        r.pushes += 1;
        Ok(CommandOutput {
            success: true,
            stdout: String::new(),
            stderr: format!("remote: index.json {}\n", MARKER),
        })
    }

    fn status(&self, dir: &Path) -> Result<CommandOutput> {
        self.record("status");
        let worktree = read_worktree(dir);
        let lines = self.with_checkout(dir, |c| {
            let mut names: Vec<&String> =
                c.head.keys().chain(c.index.keys()).chain(worktree.keys()).collect();
            names.sort();
            names.dedup();
            let mut lines = Vec::new();
            for name in names {
                let (head, index, work) = (c.head.get(name), c.index.get(name), worktree.get(name));
                if index.is_none() && head.is_none() {
                    lines.push(format!("?? {}", name));
                    continue;
                }
                let x = match (head, index) {
                    (None, Some(_)) => 'A',
                    (Some(h), Some(i)) if h != i => 'M',
                    (Some(_), None) => 'D',
                    _ => ' ',
                };
                let y = match (index, work) {
                    (Some(i), Some(w)) if i != w => 'M',
                    (Some(_), None) => 'D',
                    _ => ' ',
                };
                if x != ' ' || y != ' ' {
                    lines.push(format!("{}{} {}", x, y, name));
                }
            }
            lines.extend(untracked_outside(dir).into_iter().map(|name| format!("?? {}", name)));
            lines.join("\n")
        });
        Ok(match lines {
            Some(text) => CommandOutput::ok(text),
            None => CommandOutput::failed("fatal: not a git repository"),
        })
    }

    fn current_branch(&self, dir: &Path) -> Result<String> {
        let branch = self
            .with_checkout(dir, |c| c.branch.clone())
            .flatten()
            .or_else(|| self.branch.lock().unwrap().clone());
        Ok(branch.unwrap_or_else(|| "master".to_string()))
    }

    fn log(&self, _dir: &Path) -> Result<CommandOutput> {
        Ok(CommandOutput::ok("commit 0000000\n"))
    }

    fn diff(&self, _dir: &Path, _paths: &[String]) -> Result<CommandOutput> {
        Ok(CommandOutput::ok(""))
    }

    fn show(&self, _dir: &Path, _rev: Option<&str>) -> Result<CommandOutput> {
        Ok(CommandOutput::ok(""))
    }

    fn set_config(&self, _dir: &Path, key: &str, _value: &str) -> Result<CommandOutput> {
        self.record(&format!("config {}", key));
        Ok(CommandOutput::ok(""))
    }
}

pub fn frames_jsonl(frames: &[FrameEntry]) -> Vec<u8> {
    let mut out = Vec::new();
    for frame in frames {
        out.extend(serde_json::to_vec(frame).unwrap());
        out.push(b'\n');
    }
    out
}

pub fn repo_url(dataset_id: &str) -> String {
    format!("{}/git/dataset_{}", SERVER, dataset_id)
}

/// A context wired to the fakes, with no retry delays.
pub fn context(
    server: &Arc<FakeContentServer>,
    vcs: &Arc<FakeVcs>,
    cache_dir: &Path,
    attempts: u32,
) -> SyncContext {
    let client: Arc<dyn HttpClient> = server.clone();
    SyncContext {
        vcs: vcs.clone(),
        backend: Arc::new(HttpBackend::new(
            SERVER,
            CONTENT_BASE,
            "{server}/git/dataset_{id}",
            client.clone(),
        )),
        transfer: TransferEngine::new(client, RetryPolicy::new(attempts, Duration::ZERO)),
        cache_dir: cache_dir.to_path_buf(),
        writable_branch: "master".to_string(),
        push_policy: PushPolicy::new(Some(MARKER.to_string())),
    }
}

/// Clone `dataset_id` into `<dir>/<name>`.
pub fn clone_into(ctx: &SyncContext, dataset_id: &str, dir: &Path, name: &str) -> LocalDataset {
    let options = framesync::vcs::CloneOptions {
        retries: 3,
        delay: Duration::ZERO,
        email: None,
        checkout: None,
    };
    LocalDataset::clone_dataset(dataset_id, Some(dir.join(name)), ctx, &options).unwrap()
}

/// Deterministic RGB JPEG written to `path`.
pub fn write_jpeg(path: &Path, width: u32, height: u32, seed: u8) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let img = ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x as u8).wrapping_add(seed), (y as u8).wrapping_mul(3), seed])
    });
    img.save_with_format(path, ImageFormat::Jpeg).unwrap();
}

pub fn md5_of(bytes: &[u8]) -> String {
    hash_reader(bytes).unwrap()
}

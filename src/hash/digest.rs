// Digest computation
// Buffered streaming MD5 over files, readers and writers

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use md5::{Digest, Md5};

use crate::error::{Error, Result};

/// Length of a hex-encoded content hash.
pub const HASH_LEN: usize = 32;

/// Read buffer size used for hashing (1 MiB).
const BUFFER_SIZE: usize = 1024 * 1024;

/// Returns true if `hash` is a 32 character lowercase hex digest.
pub fn is_valid_hash(hash: &str) -> bool {
    hash.len() == HASH_LEN
        && hash
            .bytes()
            .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}

fn to_hex(hasher: Md5) -> String {
    format!("{:x}", hasher.finalize())
}

/// Hash everything readable from `reader`.
pub fn hash_reader<R: Read>(mut reader: R) -> io::Result<String> {
    let mut hasher = Md5::new();
    let mut buffer = vec![0u8; BUFFER_SIZE];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }
    Ok(to_hex(hasher))
}

/// Hash the file at `path`.
pub fn hash_file(path: &Path) -> Result<String> {
    let file = File::open(path).map_err(|e| Error::io(e, "reading", path.to_path_buf()))?;
    hash_reader(file).map_err(|e| Error::io(e, "hashing", path.to_path_buf()))
}

/// A writer adapter that hashes every byte written through it.
///
/// Used by the transfer engine to verify a download while it streams to disk.
pub struct HashingWriter<W> {
    inner: W,
    hasher: Md5,
    written: u64,
}

impl<W: Write> HashingWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Md5::new(),
            written: 0,
        }
    }

    /// Number of bytes written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Finish hashing, returning the inner writer and the hex digest.
    pub fn finish(self) -> (W, String) {
        (self.inner, to_hex(self.hasher))
    }
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

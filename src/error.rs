// Centralized error handling module
// One error taxonomy for cache, transfer, version control and dataset operations

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type used throughout the library.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for dataset synchronization.
///
/// Variants carry the path, URL or command involved so a message is
/// actionable without a backtrace.
#[derive(Debug, Error)]
pub enum Error {
    /// File system errors with context
    #[error("file not found: {}", .path.display())]
    NotFound { path: PathBuf },

    #[error("permission denied while {operation} {}", .path.display())]
    PermissionDenied { path: PathBuf, operation: String },

    #[error("I/O error while {operation}{}: {source}", fmt_opt_path(.path))]
    Io {
        path: Option<PathBuf>,
        operation: String,
        #[source]
        source: io::Error,
    },

    #[error(
        "cannot hardlink {} to {}: cache is on a different filesystem \
         (use symlink mode or move the cache)",
        .source_path.display(),
        .target.display()
    )]
    CrossDeviceLink { source_path: PathBuf, target: PathBuf },

    /// Permanent transport failures
    #[error("request to {url} failed to connect: {reason}")]
    Connection { url: String, reason: String },

    #[error("request to {url} failed with status {status}")]
    Transfer { url: String, status: u16 },

    /// Transient transport failures past the retry bound
    #[error("request to {url} still failing with status {status} after {attempts} attempts")]
    RetriesExhausted { url: String, status: u16, attempts: u32 },

    /// Integrity errors
    #[error("content of {} hashes to {actual}, expected {expected}", .path.display())]
    Integrity {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    #[error("invalid content hash {0:?}: expected 32 lowercase hex characters")]
    InvalidHash(String),

    /// Validation errors
    #[error("{} is a directory", .path.display())]
    IsDirectory { path: PathBuf },

    #[error("{} is not a valid image: {reason}", .path.display())]
    InvalidImage { path: PathBuf, reason: String },

    #[error("invalid manifest {}: {reason}", .path.display())]
    InvalidManifest { path: PathBuf, reason: String },

    #[error("{} is not a dataset working directory (no manifest)", .path.display())]
    NotADataset { path: PathBuf },

    /// Version-control errors
    #[error("`{command}` failed:\n{output}")]
    Vcs { command: String, output: String },

    #[error("server did not accept pushed changes:\n{output}")]
    PushRejected { output: String },

    #[error("repository at {} was cloned but never contained index.json", .path.display())]
    ManifestMissing { path: PathBuf },

    #[error("only the '{expected}' branch accepts changes (currently on '{actual}')")]
    WrongBranch { expected: String, actual: String },

    #[error("index.json and .jsonl manifest changes must be committed separately")]
    MixedManifestChanges,

    #[error("destination {} already exists", .path.display())]
    DestinationExists { path: PathBuf },

    /// Backend API errors
    #[error("backend error: {0}")]
    Backend(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    #[error("JSON error in {}: {source}", .path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

fn fmt_opt_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" {}", p.display()),
        None => String::new(),
    }
}

impl Error {
    /// Create an I/O error with context about the operation and optional path.
    ///
    /// `NotFound` and `PermissionDenied` are mapped onto their dedicated
    /// variants when a path is known.
    pub fn io(err: io::Error, operation: &str, path: impl Into<Option<PathBuf>>) -> Self {
        let path = path.into();
        match (err.kind(), path) {
            (io::ErrorKind::NotFound, Some(path)) => Error::NotFound { path },
            (io::ErrorKind::PermissionDenied, Some(path)) => Error::PermissionDenied {
                path,
                operation: operation.to_string(),
            },
            (_, path) => Error::Io {
                path,
                operation: operation.to_string(),
                source: err,
            },
        }
    }

    /// Returns true for integrity failures, which batch logic treats as
    /// "item missing" rather than a fatal error.
    pub fn is_integrity(&self) -> bool {
        matches!(self, Error::Integrity { .. })
    }

    /// Returns true if the error came from the transport layer.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Error::Connection { .. } | Error::Transfer { .. } | Error::RetriesExhausted { .. }
        )
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::io(err, "performing unknown operation", None::<PathBuf>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_not_found_maps_to_dedicated_variant() {
        let err = Error::io(
            io::Error::new(io::ErrorKind::NotFound, "gone"),
            "reading",
            PathBuf::from("/tmp/x.jpg"),
        );
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(err.to_string().contains("/tmp/x.jpg"));
    }

    #[test]
    fn io_permission_denied_keeps_operation() {
        let err = Error::io(
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
            "writing",
            PathBuf::from("/protected"),
        );
        let message = err.to_string();
        assert!(message.contains("permission denied"));
        assert!(message.contains("writing"));
    }

    #[test]
    fn io_without_path() {
        let err: Error = io::Error::new(io::ErrorKind::Other, "disk full").into();
        assert!(matches!(err, Error::Io { path: None, .. }));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn classification() {
        let integrity = Error::Integrity {
            path: PathBuf::from("a"),
            expected: "x".into(),
            actual: "y".into(),
        };
        assert!(integrity.is_integrity());
        assert!(!integrity.is_transport());

        let transfer = Error::Transfer {
            url: "http://h/ab/cd".into(),
            status: 404,
        };
        assert!(transfer.is_transport());
        assert!(transfer.to_string().contains("404"));
    }
}

//! Error types for the aggregation engine and its filesystem adapter.
//!
//! Only the path errors ever reach a filesystem client. Fragment and
//! directory errors are logged and recovered where they happen.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for sshconfig-fs operations
pub type Result<T> = std::result::Result<T, Error>;

/// Failure to read a single fragment during a rebuild.
///
/// The aggregator skips the fragment and keeps going.
#[derive(Debug, Error)]
pub enum FragmentError {
    /// The fragment was listed but removed before it could be read
    #[error("fragment {path:?} vanished before it could be read")]
    Vanished { path: PathBuf },

    /// Any other I/O failure (permission denied, EIO, dangling target...)
    #[error("failed to read fragment {path:?}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FragmentError {
    pub(crate) fn from_io(path: PathBuf, source: io::Error) -> Self {
        match source.kind() {
            io::ErrorKind::NotFound => FragmentError::Vanished { path },
            _ => FragmentError::Unreadable { path, source },
        }
    }

    /// Path of the fragment that failed
    pub fn path(&self) -> &PathBuf {
        match self {
            FragmentError::Vanished { path } | FragmentError::Unreadable { path, .. } => path,
        }
    }
}

/// Errors surfaced by the engine
#[derive(Debug, Error)]
pub enum Error {
    /// The requested path is neither `/` nor `/config`
    #[error("no such file or directory: {0}")]
    NotFound(String),

    /// A read was issued against the root directory
    #[error("is a directory: {0}")]
    IsADirectory(String),

    /// A directory listing was requested for the config file
    #[error("not a directory: {0}")]
    NotADirectory(String),

    /// The watched directory's metadata could not be read during a poll
    #[error("failed to stat watched directory {path:?}: {source}")]
    DirectoryStat {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The watcher thread could not be started
    #[error("failed to spawn watcher thread: {0}")]
    Spawn(#[source] io::Error),

    /// Bootstrap or mount I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl Error {
    /// errno value reported to the kernel for this error
    pub fn errno(&self) -> libc::c_int {
        match self {
            Error::NotFound(_) => libc::ENOENT,
            Error::IsADirectory(_) => libc::EISDIR,
            Error::NotADirectory(_) => libc::ENOTDIR,
            Error::DirectoryStat { .. } | Error::Spawn(_) => libc::EIO,
            Error::Io(e) => e.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

//! Fragment discovery and ordering
//!
//! A fragment ("chunk") is any non-directory entry of the watched directory
//! whose name starts with an ASCII digit. Fragments are ordered by comparing
//! their names byte by byte, so `10_y` sorts before `9_x`. Use zero-padded
//! prefixes (`01_`, `02_`, ...) to get numeric-looking order.

use std::ffi::OsString;
use std::fs;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};

use tracing::debug;

/// A candidate fragment in the watched directory
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkFile {
    /// Bare file name, used as the sort key
    pub name: OsString,
    /// Full path used for reading
    pub path: PathBuf,
}

impl ChunkFile {
    /// Whether a file name is eligible to be a fragment
    #[inline]
    pub fn is_chunk_name(name: &std::ffi::OsStr) -> bool {
        name.as_bytes().first().is_some_and(u8::is_ascii_digit)
    }
}

/// Select and order the fragments in `dir`.
///
/// Never fails: a missing or unreadable directory yields an empty set, and
/// entries that cannot be inspected are dropped.
pub fn select(dir: &Path) -> Vec<ChunkFile> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(dir = %dir.display(), error = %e, "chunk directory not listable");
            return Vec::new();
        }
    };

    let mut chunks: Vec<ChunkFile> = entries
        .filter_map(|entry| entry.ok())
        .filter(|entry| ChunkFile::is_chunk_name(&entry.file_name()))
        // Nested directories are not aggregated. Symlinks are kept and
        // resolved at read time.
        .filter(|entry| entry.file_type().map(|t| !t.is_dir()).unwrap_or(false))
        .map(|entry| ChunkFile {
            name: entry.file_name(),
            path: entry.path(),
        })
        .collect();

    // OsString ordering is byte-wise on unix
    chunks.sort_by(|a, b| a.name.cmp(&b.name));
    chunks
}

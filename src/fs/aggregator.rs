//! Config aggregation
//!
//! Reads every selected fragment in order and concatenates the bytes into a
//! fresh [`AggregatedConfig`]. A fragment that fails to read is logged and
//! left out; the rest of the build carries on.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, info, warn};

use super::chunk_set::{self, ChunkFile};
use crate::error::FragmentError;

/// One immutable build of the synthesized file
#[derive(Clone, Debug)]
pub struct AggregatedConfig {
    content: Arc<[u8]>,
    built_at: SystemTime,
    included: Vec<OsString>,
    skipped: Vec<OsString>,
}

impl AggregatedConfig {
    /// An empty build, stamped now
    pub fn empty() -> Self {
        Self::from_bytes(Vec::new())
    }

    /// Wrap raw bytes as a build with no recorded fragments
    pub fn from_bytes(content: Vec<u8>) -> Self {
        AggregatedConfig {
            content: content.into(),
            built_at: SystemTime::now(),
            included: Vec::new(),
            skipped: Vec::new(),
        }
    }

    /// Full content of the build
    #[inline]
    pub fn content(&self) -> &[u8] {
        &self.content
    }

    /// Content length in bytes
    #[inline]
    pub fn len(&self) -> u64 {
        self.content.len() as u64
    }

    /// Whether the build is empty
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// When the build finished
    pub fn built_at(&self) -> SystemTime {
        self.built_at
    }

    /// Names of fragments that contributed, in order
    pub fn included(&self) -> &[OsString] {
        &self.included
    }

    /// Names of fragments that failed to read
    pub fn skipped(&self) -> &[OsString] {
        &self.skipped
    }

    /// Copy out up to `size` bytes starting at `offset`.
    ///
    /// Short at the end of the content, empty past it.
    pub fn slice(&self, offset: u64, size: u32) -> Vec<u8> {
        let len = self.content.len();
        let start = match usize::try_from(offset) {
            Ok(v) if v < len => v,
            _ => return Vec::new(),
        };
        let end = std::cmp::min(start.saturating_add(size as usize), len);
        self.content[start..end].to_vec()
    }
}

/// Builds [`AggregatedConfig`] values from a fragment directory
#[derive(Clone, Debug)]
pub struct ConfigAggregator {
    chunk_dir: PathBuf,
}

impl ConfigAggregator {
    /// Create an aggregator over `chunk_dir`
    pub fn new(chunk_dir: impl Into<PathBuf>) -> Self {
        ConfigAggregator {
            chunk_dir: chunk_dir.into(),
        }
    }

    /// Directory being aggregated
    pub fn chunk_dir(&self) -> &Path {
        &self.chunk_dir
    }

    /// Read all fragments and produce a new build.
    ///
    /// Touches no shared state: the caller decides whether to publish.
    pub fn rebuild(&self) -> AggregatedConfig {
        let chunks = chunk_set::select(&self.chunk_dir);

        let mut buf = Vec::new();
        let mut included = Vec::with_capacity(chunks.len());
        let mut skipped = Vec::new();

        for chunk in chunks {
            match read_chunk(&chunk) {
                Ok(bytes) => {
                    debug!(
                        chunk = %chunk.path.display(),
                        bytes = bytes.len(),
                        "fragment is being included"
                    );
                    buf.extend_from_slice(&bytes);
                    included.push(chunk.name);
                }
                Err(err @ FragmentError::Vanished { .. }) => {
                    debug!(error = %err, "skipping fragment");
                    skipped.push(chunk.name);
                }
                Err(err) => {
                    warn!(error = %err, "skipping fragment");
                    skipped.push(chunk.name);
                }
            }
        }

        let config = AggregatedConfig {
            content: buf.into(),
            built_at: SystemTime::now(),
            included,
            skipped,
        };

        info!(
            dir = %self.chunk_dir.display(),
            bytes = config.len(),
            fragments = config.included.len(),
            skipped = config.skipped.len(),
            "rebuilt config"
        );

        config
    }
}

fn read_chunk(chunk: &ChunkFile) -> Result<Vec<u8>, FragmentError> {
    fs::read(&chunk.path).map_err(|e| FragmentError::from_io(chunk.path.clone(), e))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_chunks(dir: &Path, chunks: &[(&str, &str)]) {
        for (name, body) in chunks {
            fs::write(dir.join(name), body).unwrap();
        }
    }

    #[test]
    fn test_rebuild_concatenates_in_order() {
        let dir = tempfile::tempdir().unwrap();
        write_chunks(dir.path(), &[("03_c", "C"), ("01_a", "A"), ("02_b", "B")]);

        let config = ConfigAggregator::new(dir.path()).rebuild();
        assert_eq!(config.content(), b"ABC");
        assert_eq!(config.len(), 3);
        assert_eq!(config.included().len(), 3);
        assert!(config.skipped().is_empty());
    }

    #[test]
    fn test_rebuild_inserts_no_separator() {
        let dir = tempfile::tempdir().unwrap();
        write_chunks(
            dir.path(),
            &[("10_base", "Host *\n  User me"), ("20_extra", "Host x\n")],
        );

        let config = ConfigAggregator::new(dir.path()).rebuild();
        assert_eq!(config.content(), b"Host *\n  User meHost x\n");
    }

    #[test]
    fn test_rebuild_ignores_non_chunks() {
        let dir = tempfile::tempdir().unwrap();
        write_chunks(dir.path(), &[("01_a", "A"), ("notes.txt", "N"), (".02_b", "H")]);

        let config = ConfigAggregator::new(dir.path()).rebuild();
        assert_eq!(config.content(), b"A");
    }

    #[test]
    fn test_rebuild_skips_dangling_symlink() {
        let dir = tempfile::tempdir().unwrap();
        write_chunks(dir.path(), &[("01_a", "A"), ("03_c", "C")]);
        std::os::unix::fs::symlink(dir.path().join("missing"), dir.path().join("02_b")).unwrap();

        let config = ConfigAggregator::new(dir.path()).rebuild();
        assert_eq!(config.content(), b"AC");
        assert_eq!(config.skipped(), &[OsString::from("02_b")]);
    }

    #[test]
    fn test_rebuild_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = ConfigAggregator::new(dir.path().join("gone")).rebuild();
        assert!(config.is_empty());
    }

    #[test]
    fn test_slice_bounds() {
        let config = AggregatedConfig::from_bytes(b"0123456789".to_vec());
        assert_eq!(config.slice(3, 4), b"3456");
        assert_eq!(config.slice(8, 100), b"89");
        assert!(config.slice(10, 5).is_empty());
        assert!(config.slice(u64::MAX, 5).is_empty());
        assert!(config.slice(0, 0).is_empty());
    }
}

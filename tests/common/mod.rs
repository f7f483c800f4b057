//! Shared fixtures for integration tests

#![allow(dead_code)] // Not every test binary uses every helper

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tempfile::TempDir;

/// Directory timestamps come from a coarse kernel clock. Sleep this long
/// before a change that must be distinguishable from the previous state.
pub const SETTLE: Duration = Duration::from_millis(50);

/// A temporary fragment directory
pub struct ChunkDir {
    dir: TempDir,
}

impl ChunkDir {
    /// Empty fragment directory
    pub fn new() -> Self {
        Self {
            dir: tempfile::tempdir().expect("create temp dir"),
        }
    }

    /// Fragment directory pre-populated with `(name, content)` pairs
    pub fn with(chunks: &[(&str, &str)]) -> Self {
        let dir = Self::new();
        for (name, body) in chunks {
            dir.write(name, body);
        }
        dir
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn join(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn write(&self, name: &str, body: impl AsRef<[u8]>) {
        fs::write(self.join(name), body).expect("write fragment");
    }

    pub fn remove(&self, name: &str) {
        fs::remove_file(self.join(name)).expect("remove fragment");
    }
}

/// Poll `cond` every few milliseconds until it holds or `timeout` passes.
///
/// Returns the time it took, or `None` on timeout.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> Option<Duration> {
    let start = Instant::now();
    loop {
        if cond() {
            return Some(start.elapsed());
        }
        if start.elapsed() > timeout {
            return None;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// Whether the tests run with root privileges (permission bits are ignored)
pub fn running_as_root() -> bool {
    // SAFETY: geteuid has no preconditions
    unsafe { libc::geteuid() == 0 }
}

//! Change detection
//!
//! [`ChangeWatcher`] polls the fragment directory on a fixed interval and
//! republishes the config whenever it sees a change. It runs on its own OS
//! thread and is stopped through the [`WatcherHandle`] returned by
//! [`ChangeWatcher::spawn`].
//!
//! # Detection
//!
//! By default the only signal is the directory's own modification time,
//! which moves when fragments are added, removed or renamed. Rewriting an
//! existing fragment in place does not move it, so such edits show up only
//! on the next add/remove/rename. [`DetectionMode::ChunkContents`] closes
//! that gap by also comparing the size and mtime of every fragment, at the
//! cost of one `stat` per fragment per poll.

use std::ffi::OsString;
use std::fs;
use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use tracing::{debug, info, warn};

use super::aggregator::ConfigAggregator;
use super::chunk_set;
use super::state::SharedConfigState;
use crate::error::{Error, Result};

/// Default wait between two directory checks
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// What the watcher compares between polls
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DetectionMode {
    /// Directory modification time only
    #[default]
    DirectoryMtime,
    /// Directory modification time plus size and mtime of every fragment
    ChunkContents,
}

/// Watcher settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WatcherConfig {
    /// Wait between checks
    pub poll_interval: Duration,
    /// Change signal
    pub detection: DetectionMode,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        WatcherConfig {
            poll_interval: DEFAULT_POLL_INTERVAL,
            detection: DetectionMode::DirectoryMtime,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct ChunkStamp {
    name: OsString,
    len: u64,
    mtime: Option<SystemTime>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Fingerprint {
    dir_mtime: SystemTime,
    chunks: Option<Vec<ChunkStamp>>,
}

impl Fingerprint {
    fn capture(dir: &Path, mode: DetectionMode) -> Result<Self> {
        let dir_mtime = fs::metadata(dir)
            .and_then(|m| m.modified())
            .map_err(|source| Error::DirectoryStat {
                path: dir.to_path_buf(),
                source,
            })?;

        let chunks = match mode {
            DetectionMode::DirectoryMtime => None,
            DetectionMode::ChunkContents => Some(
                chunk_set::select(dir)
                    .into_iter()
                    .filter_map(|chunk| {
                        // A fragment that can't be stat'ed is left out here
                        // as it will be left out of the build.
                        let meta = fs::metadata(&chunk.path).ok()?;
                        Some(ChunkStamp {
                            name: chunk.name,
                            len: meta.len(),
                            mtime: meta.modified().ok(),
                        })
                    })
                    .collect(),
            ),
        };

        Ok(Fingerprint { dir_mtime, chunks })
    }
}

/// Polls the fragment directory and republishes on change
pub struct ChangeWatcher {
    aggregator: ConfigAggregator,
    state: Arc<SharedConfigState>,
    config: WatcherConfig,
    last: Option<Fingerprint>,
}

impl ChangeWatcher {
    /// Create a watcher, taking the current directory state as baseline.
    ///
    /// Build the initial snapshot after this call so that a change landing
    /// in between is caught by the first check.
    pub fn new(
        aggregator: ConfigAggregator,
        state: Arc<SharedConfigState>,
        config: WatcherConfig,
    ) -> Self {
        let last = Fingerprint::capture(aggregator.chunk_dir(), config.detection).ok();
        ChangeWatcher {
            aggregator,
            state,
            config,
            last,
        }
    }

    /// Run one check, rebuilding and publishing if anything changed.
    ///
    /// Returns whether a new build was published. A directory that can't be
    /// stat'ed is reported as [`Error::DirectoryStat`] and leaves the
    /// baseline untouched.
    pub fn check_once(&mut self) -> Result<bool> {
        let current = Fingerprint::capture(self.aggregator.chunk_dir(), self.config.detection)?;
        if self.last.as_ref() == Some(&current) {
            return Ok(false);
        }

        debug!(dir = %self.aggregator.chunk_dir().display(), "change detected");
        let config = self.aggregator.rebuild();
        self.state.publish(config);
        self.last = Some(current);
        Ok(true)
    }

    /// Start polling on a background thread
    pub fn spawn(self) -> Result<WatcherHandle> {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let thread = thread::Builder::new()
            .name("chunk-watcher".to_string())
            .spawn(move || self.run(stop_rx))
            .map_err(Error::Spawn)?;

        Ok(WatcherHandle {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    fn run(mut self, stop: mpsc::Receiver<()>) {
        info!(
            dir = %self.aggregator.chunk_dir().display(),
            interval_ms = self.config.poll_interval.as_millis() as u64,
            mode = ?self.config.detection,
            "watcher started"
        );

        loop {
            match stop.recv_timeout(self.config.poll_interval) {
                Err(RecvTimeoutError::Timeout) => {}
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }

            if let Err(e) = self.check_once() {
                warn!(error = %e, "skipping poll cycle");
            }
        }

        info!("watcher stopped");
    }
}

/// Handle to a running watcher; stops it when dropped
#[derive(Debug)]
pub struct WatcherHandle {
    stop_tx: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl WatcherHandle {
    /// Stop the watcher and wait for its thread to exit.
    ///
    /// Interrupts the current wait, so this returns within one rebuild.
    pub fn stop(mut self) {
        self.shutdown();
    }

    /// Whether the watcher thread is still running
    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn shutdown(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            // The thread may already be gone; nothing to do then.
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("watcher thread panicked");
            }
        }
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

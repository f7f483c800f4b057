//! FUSE filesystem exposing the synthesized config file
//!
//! The mount contains exactly one read-only file:
//!
//! ```text
//! <mountpoint>/          dr-xr-x---
//! <mountpoint>/config    -r--r-----   (concatenation of <chunk-dir>/[0-9]*)
//! ```
//!
//! [`ConfigFs`] answers the four operations the host needs (`get_attributes`,
//! `read`, `list_directory`, `on_mount`) against [`SharedConfigState`]. With
//! the `fuse` feature it also implements `fuser::Filesystem`, mapping inode 1
//! to `/` and inode 2 to `/config`.
//!
//! # Usage
//!
//! ```bash
//! # Mount (requires --features fuse)
//! sshconfig-fs --chunk-dir ~/.ssh/config.d --mountpoint ~/.ssh/.sshconfigfs
//!
//! # Point ssh at the synthesized file
//! ln -s .sshconfigfs/config ~/.ssh/config
//!
//! # Unmount
//! fusermount -u ~/.ssh/.sshconfigfs
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use super::aggregator::{AggregatedConfig, ConfigAggregator};
use super::state::{FileAttr, Node, SharedConfigState};
use super::watcher::{ChangeWatcher, WatcherConfig, WatcherHandle};
use crate::error::{Error, Result};

#[cfg(feature = "fuse")]
use super::state::{FileKind, CONFIG_NAME};
#[cfg(feature = "fuse")]
use std::ffi::OsStr;
#[cfg(feature = "fuse")]
use std::path::Path;
#[cfg(feature = "fuse")]
use std::time::Duration;

/// Attribute/entry TTL handed to the kernel.
///
/// Zero so a size cached by the kernel never outlives a rebuild.
#[cfg(feature = "fuse")]
const TTL: Duration = Duration::ZERO;

/// Read-only filesystem serving the aggregated config
pub struct ConfigFs {
    state: Arc<SharedConfigState>,
    /// Watcher built at construction, started by `on_mount`
    pending: Option<ChangeWatcher>,
    /// Running watcher
    watcher: Option<WatcherHandle>,
}

impl ConfigFs {
    /// Build the filesystem over `chunk_dir`, performing the initial build
    pub fn new(chunk_dir: impl Into<PathBuf>, config: WatcherConfig) -> Self {
        let aggregator = ConfigAggregator::new(chunk_dir);
        let state = Arc::new(SharedConfigState::new(AggregatedConfig::empty()));

        // Baseline first, then build, so nothing between the two is missed.
        let pending = ChangeWatcher::new(aggregator.clone(), state.clone(), config);
        state.publish(aggregator.rebuild());

        ConfigFs {
            state,
            pending: Some(pending),
            watcher: None,
        }
    }

    /// Shared state, for callers that want to observe it directly
    pub fn state(&self) -> &Arc<SharedConfigState> {
        &self.state
    }

    /// Attributes of `path`
    pub fn get_attributes(&self, path: &str) -> Result<FileAttr> {
        self.state.metadata(path)
    }

    /// Read up to `size` bytes of `/config` at `offset`
    pub fn read(&self, path: &str, size: u32, offset: u64) -> Result<Vec<u8>> {
        match Node::from_path(path) {
            Some(Node::Config) => Ok(self.read_config(size, offset)),
            Some(Node::Root) => Err(Error::IsADirectory(path.to_string())),
            None => Err(Error::NotFound(path.to_string())),
        }
    }

    /// Entry names of `path`; only `/` is a directory
    pub fn list_directory(&self, path: &str) -> Result<Vec<String>> {
        match Node::from_path(path) {
            Some(Node::Root) => Ok(self.state.list_root()),
            Some(Node::Config) => Err(Error::NotADirectory(path.to_string())),
            None => Err(Error::NotFound(path.to_string())),
        }
    }

    /// Start the change watcher in the background.
    ///
    /// Returns once the thread is spawned. Later calls are no-ops.
    pub fn on_mount(&mut self) -> Result<()> {
        let Some(watcher) = self.pending.take() else {
            warn!("watcher already started");
            return Ok(());
        };

        let handle = watcher.spawn()?;
        self.watcher = Some(handle);
        info!(bytes = self.state.config_len(), "config filesystem mounted");
        Ok(())
    }

    /// Stop the change watcher, waiting for its thread to exit
    pub fn on_unmount(&mut self) {
        if let Some(handle) = self.watcher.take() {
            handle.stop();
        }
        info!("config filesystem unmounted");
    }

    /// Whether the change watcher is running
    pub fn is_watching(&self) -> bool {
        self.watcher.as_ref().is_some_and(WatcherHandle::is_running)
    }

    fn read_config(&self, size: u32, offset: u64) -> Vec<u8> {
        let data = self.state.read_bytes(offset, size);
        self.state.touch_config_access();
        data
    }
}

// =============================================================================
// FUSER FILESYSTEM TRAIT IMPLEMENTATION
// =============================================================================

#[cfg(feature = "fuse")]
impl fuser::Filesystem for ConfigFs {
    fn init(
        &mut self,
        _req: &fuser::Request<'_>,
        _config: &mut fuser::KernelConfig,
    ) -> std::result::Result<(), libc::c_int> {
        self.on_mount().map_err(|e| {
            warn!(error = %e, "mount initialization failed");
            e.errno()
        })
    }

    fn destroy(&mut self) {
        self.on_unmount();
    }

    fn lookup(
        &mut self,
        _req: &fuser::Request<'_>,
        parent: u64,
        name: &OsStr,
        reply: fuser::ReplyEntry,
    ) {
        match Node::from_ino(parent) {
            Some(Node::Root) => {}
            Some(Node::Config) => {
                reply.error(libc::ENOTDIR);
                return;
            }
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        }

        let node = match name.to_str() {
            Some(CONFIG_NAME) => Node::Config,
            _ => {
                reply.error(libc::ENOENT);
                return;
            }
        };

        let attr: fuser::FileAttr = self.state.node_metadata(node).into();
        reply.entry(&TTL, &attr, 0);
    }

    fn getattr(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: Option<u64>,
        reply: fuser::ReplyAttr,
    ) {
        match Node::from_ino(ino) {
            Some(node) => {
                let attr: fuser::FileAttr = self.state.node_metadata(node).into();
                reply.attr(&TTL, &attr);
            }
            None => reply.error(libc::ENOENT),
        }
    }

    fn open(&mut self, _req: &fuser::Request<'_>, ino: u64, flags: i32, reply: fuser::ReplyOpen) {
        match Node::from_ino(ino) {
            Some(Node::Config) => {}
            Some(Node::Root) => {
                reply.error(libc::EISDIR);
                return;
            }
            None => {
                reply.error(libc::ENOENT);
                return;
            }
        }

        let write_flags = libc::O_WRONLY | libc::O_RDWR | libc::O_APPEND | libc::O_TRUNC;
        if flags & write_flags != 0 {
            reply.error(libc::EROFS);
            return;
        }

        // Stateless handle; direct I/O so reads aren't clipped to a size the
        // kernel cached before the last rebuild.
        reply.opened(0, fuser::consts::FOPEN_DIRECT_IO);
    }

    fn read(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: fuser::ReplyData,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        match Node::from_ino(ino) {
            Some(node) => match ConfigFs::read(self, node.path(), size, offset as u64) {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(e.errno()),
            },
            None => reply.error(libc::ENOENT),
        }
    }

    fn release(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        _lock_owner: Option<u64>,
        _flush: bool,
        reply: fuser::ReplyEmpty,
    ) {
        reply.ok();
    }

    fn opendir(&mut self, _req: &fuser::Request<'_>, ino: u64, _flags: i32, reply: fuser::ReplyOpen) {
        match Node::from_ino(ino) {
            Some(Node::Root) => reply.opened(0, 0),
            Some(Node::Config) => reply.error(libc::ENOTDIR),
            None => reply.error(libc::ENOENT),
        }
    }

    fn readdir(
        &mut self,
        _req: &fuser::Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: fuser::ReplyDirectory,
    ) {
        if offset < 0 {
            reply.error(libc::EINVAL);
            return;
        }

        let Some(node) = Node::from_ino(ino) else {
            reply.error(libc::ENOENT);
            return;
        };

        let names = match self.list_directory(node.path()) {
            Ok(names) => names,
            Err(e) => {
                reply.error(e.errno());
                return;
            }
        };

        for (i, name) in names.iter().enumerate().skip(offset as usize) {
            let (entry_ino, kind) = match name.as_str() {
                "." | ".." => (Node::Root.ino(), FileKind::Directory),
                _ => (Node::Config.ino(), FileKind::RegularFile),
            };
            // Reply returns true if buffer is full
            if reply.add(entry_ino, (i + 1) as i64, kind.into(), name) {
                break;
            }
        }

        reply.ok();
    }

    fn releasedir(
        &mut self,
        _req: &fuser::Request<'_>,
        _ino: u64,
        _fh: u64,
        _flags: i32,
        reply: fuser::ReplyEmpty,
    ) {
        reply.ok();
    }

    fn statfs(&mut self, _req: &fuser::Request<'_>, _ino: u64, reply: fuser::ReplyStatfs) {
        let block_size = 4096u64;
        let total_blocks = self.state.config_len().div_ceil(block_size);

        reply.statfs(
            total_blocks,      // blocks
            0,                 // bfree
            0,                 // bavail
            2,                 // files: root + config
            0,                 // ffree
            block_size as u32, // bsize
            255,               // namelen
            block_size as u32, // frsize
        );
    }

    fn access(&mut self, _req: &fuser::Request<'_>, ino: u64, mask: i32, reply: fuser::ReplyEmpty) {
        if Node::from_ino(ino).is_none() {
            reply.error(libc::ENOENT);
            return;
        }

        if mask & libc::W_OK != 0 {
            reply.error(libc::EROFS);
            return;
        }

        // Owner/group/other bits are enforced by the kernel (DefaultPermissions)
        reply.ok();
    }
}

// =============================================================================
// MOUNT FUNCTIONS
// =============================================================================

/// Mount options for ConfigFs
#[cfg(feature = "fuse")]
#[derive(Clone, Debug)]
pub struct MountOptions {
    /// Allow other users to access the mount (default: false)
    pub allow_other: bool,
    /// Allow root to access the mount (default: false)
    pub allow_root: bool,
    /// Filesystem name shown in mount output
    pub fsname: String,
}

#[cfg(feature = "fuse")]
impl Default for MountOptions {
    fn default() -> Self {
        MountOptions {
            allow_other: false,
            allow_root: false,
            fsname: "sshconfigfs".to_string(),
        }
    }
}

#[cfg(feature = "fuse")]
fn fuser_options(options: MountOptions) -> Vec<fuser::MountOption> {
    use fuser::MountOption;

    let mut mount_options = vec![
        MountOption::FSName(options.fsname),
        MountOption::DefaultPermissions,
        MountOption::RO,
        MountOption::NoExec,
    ];

    // fusermount's auto_unmount implies allow_other unless one of the allow
    // options is given. Without either, dropping the session unmounts.
    if options.allow_other {
        mount_options.push(MountOption::AllowOther);
        mount_options.push(MountOption::AutoUnmount);
    } else if options.allow_root {
        mount_options.push(MountOption::AllowRoot);
        mount_options.push(MountOption::AutoUnmount);
    }

    mount_options
}

/// Mount a ConfigFs on a background thread
///
/// The returned session unmounts when dropped.
#[cfg(feature = "fuse")]
pub fn spawn_mount<P: AsRef<Path>>(
    fs: ConfigFs,
    mountpoint: P,
    options: MountOptions,
) -> Result<fuser::BackgroundSession> {
    Ok(fuser::spawn_mount2(
        fs,
        mountpoint.as_ref(),
        &fuser_options(options),
    )?)
}

// =============================================================================
// TESTS
// =============================================================================

//! Published filesystem state
//!
//! [`SharedConfigState`] holds the current build of the config file together
//! with the attributes of the two exposed nodes. The build and the
//! attributes derived from it live in one immutable [`PublishedState`]
//! value behind an `ArcSwap`, so a reader always sees a size that matches
//! the content it reads from the same load.
//!
//! # Concurrency Model
//!
//! - One writer: the watcher calls [`SharedConfigState::publish`] after each
//!   rebuild. Fragment I/O happens before the call; the call itself is a
//!   single pointer swap.
//! - Many readers: `read_bytes`, `metadata` and `list_root` use
//!   `ArcSwap::load()` and never block on the writer.
//! - The config file's access time is tracked in an `AtomicU64` next to the
//!   snapshot so reads can refresh it without republishing content.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwap;
use tracing::debug;

use super::aggregator::AggregatedConfig;
use crate::error::{Error, Result};

/// Inode number type (matches fuser's u64 inode convention)
pub type Ino = u64;

/// Root inode number (FUSE convention: inode 1 is root)
pub const ROOT_INO: Ino = 1;

/// Inode of the synthesized config file
pub const CONFIG_INO: Ino = 2;

/// Name of the synthesized file inside the mount
pub const CONFIG_NAME: &str = "config";

/// Path of the mount root
pub const ROOT_PATH: &str = "/";

/// Path of the synthesized file
pub const CONFIG_PATH: &str = "/config";

const ROOT_PERM: u16 = 0o550;
const CONFIG_PERM: u16 = 0o440;
const BLOCK_SIZE: u32 = 4096;

/// The two nodes the filesystem exposes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Node {
    /// The mount root directory
    Root,
    /// The synthesized config file
    Config,
}

impl Node {
    /// Resolve an absolute path. Only the two exact paths exist.
    pub fn from_path(path: &str) -> Option<Node> {
        match path {
            ROOT_PATH => Some(Node::Root),
            CONFIG_PATH => Some(Node::Config),
            _ => None,
        }
    }

    /// Resolve an inode number
    pub fn from_ino(ino: Ino) -> Option<Node> {
        match ino {
            ROOT_INO => Some(Node::Root),
            CONFIG_INO => Some(Node::Config),
            _ => None,
        }
    }

    /// Inode number of this node
    pub fn ino(self) -> Ino {
        match self {
            Node::Root => ROOT_INO,
            Node::Config => CONFIG_INO,
        }
    }

    /// Canonical path of this node
    pub fn path(self) -> &'static str {
        match self {
            Node::Root => ROOT_PATH,
            Node::Config => CONFIG_PATH,
        }
    }
}

/// File type
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileKind {
    /// Directory
    Directory,
    /// Regular file
    RegularFile,
}

#[cfg(feature = "fuse")]
impl From<FileKind> for fuser::FileType {
    fn from(kind: FileKind) -> Self {
        match kind {
            FileKind::Directory => fuser::FileType::Directory,
            FileKind::RegularFile => fuser::FileType::RegularFile,
        }
    }
}

/// Attributes of an exposed node
///
/// Mirrors `fuser::FileAttr` but is always available, so the core can be
/// used and tested without the fuse feature.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileAttr {
    /// Inode number
    pub ino: Ino,
    /// File size in bytes
    pub size: u64,
    /// Number of 512-byte blocks allocated
    pub blocks: u64,
    /// Last access time
    pub atime: SystemTime,
    /// Last modification time
    pub mtime: SystemTime,
    /// Last status change time
    pub ctime: SystemTime,
    /// Creation time (macOS only)
    pub crtime: SystemTime,
    /// File type
    pub kind: FileKind,
    /// Permissions (mode & 0o7777)
    pub perm: u16,
    /// Hard link count
    pub nlink: u32,
    /// User ID of owner
    pub uid: u32,
    /// Group ID of owner
    pub gid: u32,
    /// Block size for filesystem I/O
    pub blksize: u32,
}

impl FileAttr {
    fn root(created: SystemTime, uid: u32, gid: u32) -> Self {
        FileAttr {
            ino: ROOT_INO,
            size: 0,
            blocks: 0,
            atime: created,
            mtime: created,
            ctime: created,
            crtime: created,
            kind: FileKind::Directory,
            perm: ROOT_PERM,
            nlink: 2,
            uid,
            gid,
            blksize: BLOCK_SIZE,
        }
    }

    fn config(created: SystemTime, size: u64, uid: u32, gid: u32) -> Self {
        FileAttr {
            ino: CONFIG_INO,
            size,
            blocks: size.div_ceil(512),
            atime: created,
            mtime: created,
            ctime: created,
            crtime: created,
            kind: FileKind::RegularFile,
            perm: CONFIG_PERM,
            nlink: 1,
            uid,
            gid,
            blksize: BLOCK_SIZE,
        }
    }
}

#[cfg(feature = "fuse")]
impl From<FileAttr> for fuser::FileAttr {
    fn from(attr: FileAttr) -> Self {
        fuser::FileAttr {
            ino: attr.ino,
            size: attr.size,
            blocks: attr.blocks,
            atime: attr.atime,
            mtime: attr.mtime,
            ctime: attr.ctime,
            crtime: attr.crtime,
            kind: attr.kind.into(),
            perm: attr.perm,
            nlink: attr.nlink,
            uid: attr.uid,
            gid: attr.gid,
            rdev: 0,
            blksize: attr.blksize,
            flags: 0,
        }
    }
}

/// One consistent view: a build and the attributes derived from it
#[derive(Clone, Debug)]
pub struct PublishedState {
    /// Current build of the config file
    pub config: AggregatedConfig,
    /// Attributes of `/`
    pub root: FileAttr,
    /// Attributes of `/config`; `size` equals `config.len()`
    pub file: FileAttr,
}

/// The single piece of state shared between the watcher and FUSE threads
pub struct SharedConfigState {
    current: ArcSwap<PublishedState>,
    /// Access time of `/config` as nanoseconds since the epoch
    config_atime: AtomicU64,
}

impl SharedConfigState {
    /// Create state around an initial build, owned by the current process
    pub fn new(initial: AggregatedConfig) -> Self {
        // SAFETY: getuid/getgid have no preconditions and cannot fail
        let (uid, gid) = unsafe { (libc::getuid(), libc::getgid()) };
        Self::with_owner(initial, uid, gid)
    }

    /// Create state with an explicit owner
    pub fn with_owner(initial: AggregatedConfig, uid: u32, gid: u32) -> Self {
        let created = SystemTime::now();
        let published = PublishedState {
            root: FileAttr::root(created, uid, gid),
            file: FileAttr::config(created, initial.len(), uid, gid),
            config: initial,
        };

        SharedConfigState {
            current: ArcSwap::from_pointee(published),
            config_atime: AtomicU64::new(to_nanos(created)),
        }
    }

    /// Replace the current build.
    ///
    /// Readers see either the previous state or the new one in full.
    pub fn publish(&self, config: AggregatedConfig) {
        let now = SystemTime::now();
        let size = config.len();

        // Single writer, but rcu keeps this correct if that ever changes.
        self.current.rcu(|prev| {
            let mut root = prev.root.clone();
            root.mtime = now;
            root.atime = now;

            let mut file = prev.file.clone();
            file.size = size;
            file.blocks = size.div_ceil(512);
            file.mtime = now;
            file.atime = now;

            PublishedState {
                config: config.clone(),
                root,
                file,
            }
        });
        self.config_atime.fetch_max(to_nanos(now), Ordering::AcqRel);

        debug!(bytes = size, "published config");
    }

    /// The full current state, content and attributes from the same build
    #[inline]
    pub fn snapshot(&self) -> Arc<PublishedState> {
        self.current.load_full()
    }

    /// Up to `size` bytes of the current build starting at `offset`
    #[inline]
    pub fn read_bytes(&self, offset: u64, size: u32) -> Vec<u8> {
        self.current.load().config.slice(offset, size)
    }

    /// Attributes of a node
    pub fn node_metadata(&self, node: Node) -> FileAttr {
        let current = self.current.load();
        match node {
            Node::Root => current.root.clone(),
            Node::Config => {
                let mut attr = current.file.clone();
                attr.atime = from_nanos(self.config_atime.load(Ordering::Acquire));
                attr
            }
        }
    }

    /// Attributes of the node at `path`
    pub fn metadata(&self, path: &str) -> Result<FileAttr> {
        Node::from_path(path)
            .map(|node| self.node_metadata(node))
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    /// Entries of the root directory
    pub fn list_root(&self) -> Vec<String> {
        vec![".".to_string(), "..".to_string(), CONFIG_NAME.to_string()]
    }

    /// Mark `/config` as accessed now
    pub fn touch_config_access(&self) {
        self.config_atime
            .fetch_max(to_nanos(SystemTime::now()), Ordering::AcqRel);
    }

    /// Size of the current build
    pub fn config_len(&self) -> u64 {
        self.current.load().config.len()
    }
}

fn to_nanos(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

fn from_nanos(nanos: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_nanos(nanos)
}

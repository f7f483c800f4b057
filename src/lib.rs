//! # sshconfig-fs
//!
//! A FUSE filesystem exposing one read-only file, `config`, whose content is
//! the concatenation of the digit-prefixed fragments in a watched directory.
//! The file is rebuilt whenever the directory changes, so tools that only
//! read a single config file (ssh being the motivating one) can be fed from
//! a `config.d`-style directory.
//!
//! ```no_run
//! use sshconfig_fs::{ConfigFs, WatcherConfig};
//!
//! let mut fs = ConfigFs::new("/home/me/.ssh/config.d", WatcherConfig::default());
//! fs.on_mount().unwrap();
//! let bytes = fs.read("/config", 4096, 0).unwrap();
//! # let _ = bytes;
//! ```

pub mod error;
pub mod fs;

pub use error::{Error, FragmentError, Result};
pub use fs::*;

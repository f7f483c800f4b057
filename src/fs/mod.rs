pub mod aggregator;
pub mod chunk_set;
pub mod fuse_shim;
pub mod signal;
pub mod state;
pub mod watcher;

pub use aggregator::*;
pub use chunk_set::{select, ChunkFile};
pub use fuse_shim::*;
pub use state::*;
pub use watcher::*;

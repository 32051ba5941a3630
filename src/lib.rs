//! mempool - region and size-class allocators
//!
//! Two independent engines for workloads dominated by many small objects:
//! - [`ArenaPool`]: bump allocation over chained blocks, released in bulk
//! - [`SegregatedFreeList`]: sixteen size classes recycled through free lists
//!
//! Both draw their memory from a [`RawHeap`], the global allocator by default.

pub mod arena;
pub mod config;
pub mod error;
pub mod freelist;
pub mod heap;
pub mod logging;

// Re-export commonly used items
pub use arena::{ArenaPool, CleanupRecord, PoolStats};
pub use config::{ArenaConfig, Config, FreeListConfig};
pub use error::{AllocError, ConfigError};
pub use freelist::{FreeListStats, OomHandler, SegregatedFreeList};
pub use heap::{page_size, RawHeap, SystemHeap, TrackingHeap};

//! # flowcache
//!
//! Bounded-memory expiring key/value cache for stream processing.
//!
//! The heart of the crate is [`ExpireTable`]: a multi-way hash table that
//! serves an unbounded stream of opaque byte keys out of a fixed budget of
//! fixed-size value cells, retaining the most useful records by a
//! localized least-recently-used scheme. Lookups and inserts are constant
//! time, memory never grows after creation, and a full table absorbs new
//! keys by evicting the least recently used record of the affected bucket
//! pair.
//!
//! ```
//! use flowcache::ExpireTable;
//!
//! let table = ExpireTable::create(10_000, 8).unwrap();
//! {
//!     let mut cell = table.find_or_insert(b"a key");
//!     cell[0] = 4;
//! }
//! let cell = table.find(b"a key").unwrap();
//! assert_eq!(cell[0], 4);
//! ```
//!
//! Tables can be dumped to and reloaded from a byte stream, shared between
//! operators through a process-wide named registry, and swept
//! incrementally with walkers. The sibling [`ExistFilter`] absorbs evicted
//! keys so embeddings can keep recognizing them as previously seen.

#![warn(missing_docs)]

/// System constants
pub mod constants;

/// Core application components
pub mod core;

/// Reusable data structures
pub mod structures;

/// Type definitions
pub mod types;

// Re-export commonly used items
pub use crate::core::config::CacheConfig;
pub use crate::core::factory::{open_table, CacheHandle};
pub use crate::core::registry::{attach, ShareOptions, SharedTable};
pub use structures::exist_filter::ExistFilter;
pub use structures::expire_table::{
    CellGuard, EvictHook, ExpireTable, LoadOptions, Visit, WalkerHandle,
};
pub use types::error::{Error, PersistError, Result, ShareError};

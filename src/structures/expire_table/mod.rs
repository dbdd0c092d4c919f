//! Expiring hash table with localized least-recently-used expiration
//!
//! A multi-way cuckoo-style cache for storing per-key state as long as
//! possible under a fixed memory budget. Every key maps to two candidate
//! buckets of 16 records each; buckets keep their records sorted by
//! recency, and inserts into a full pair evict the least recently used
//! record of the staler bucket. Recency is exact within a bucket and
//! approximated across buckets by an 8-bit epoch stamp stolen one bit at a
//! time from the tail descriptors.
//!
//! Lookups and inserts return a [`CellGuard`] that keeps the bucket's lock
//! stripe held while the caller reads or writes the value cell; dropping
//! the guard is the unlock.

mod arena;
mod bucket;
mod descriptor;
mod hash;
mod locks;
mod persist;
mod table;
mod walker;

pub use persist::{LoadOptions, FILTER_MAGIC, TABLE_MAGIC};
pub use table::{CellGuard, EvictHook, ExpireTable};
pub use walker::{Visit, WalkerHandle};

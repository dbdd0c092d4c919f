//! Global constants used throughout the flowcache codebase
//!
//! This module contains compile-time constants that are shared across
//! multiple modules to ensure consistency and avoid magic numbers.

/// Number of slot descriptors per bucket
///
/// Sixteen packed 32-bit descriptors keep a whole bucket inside a single
/// 64-byte cache line, which is what makes the linear bucket scan cheap.
pub const BUCKET_WAYS: usize = 16;

/// log2 of [`BUCKET_WAYS`], used when addressing value cells as
/// `(bucket_index << BUCKET_WAYS_SHIFT) + data_slot`.
pub const BUCKET_WAYS_SHIFT: u32 = 4;

/// Smallest record capacity a table will be created with
///
/// Requests below this are rounded up; a table smaller than four buckets
/// leaves the two-choice placement with nothing to choose between.
pub const MIN_CAPACITY: u64 = 4 * BUCKET_WAYS as u64;

/// Number of consecutive buckets covered by one lock stripe (as a shift)
///
/// Every 32 buckets share a mutex, so the stripe of bucket `b` is `b >> 5`.
pub const STRIPE_SHIFT: u32 = 5;

/// Cache line size for memory alignment
pub const CACHE_LINE_SIZE: usize = 64;

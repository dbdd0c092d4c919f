//! The expiring hash table core
//!
//! `ExpireTable` serves an unbounded key stream out of a fixed budget of
//! record cells. Each key hashes to two candidate buckets in opposite
//! halves of the bucket array; hits are promoted to the front of their
//! bucket, and a miss-with-insert evicts the least recently used record of
//! whichever candidate is emptier (or, on a full tie, staler by epoch).
//! All mutation happens under the lock stripe covering the touched bucket.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use super::arena::{pad_cell_size, ValueArena};
use super::bucket::Bucket;
use super::hash::{self, KeySlots};
use super::locks::{LockStripes, StripeGuard};
use super::walker::WalkerSet;
use crate::constants::{BUCKET_WAYS, BUCKET_WAYS_SHIFT, MIN_CAPACITY};
use crate::types::error::{Error, Result};

/// Hook invoked with a record's cell bytes just before the record is
/// evicted to make room for a new key. The borrow is valid only for the
/// duration of the call; this is the one place an embedding releases any
/// owned handle it stored inside the cell.
pub type EvictHook = Arc<dyn Fn(&mut [u8]) + Send + Sync>;

/// A bounded, expiring, concurrently shareable key/value table.
///
/// Values are fixed-size opaque byte cells; keys are arbitrary byte
/// strings that are hashed and then forgotten (only a 27-bit digest is
/// kept, so unrelated keys collide with probability about 2^-27 per
/// bucket).
pub struct ExpireTable {
    pub(crate) buckets: Box<[UnsafeCell<Bucket>]>,
    pub(crate) arena: ValueArena,
    pub(crate) locks: LockStripes,
    pub(crate) master: Mutex<()>,
    pub(crate) hash_state: ahash::RandomState,
    pub(crate) seed: u32,
    pub(crate) capacity: u64,
    pub(crate) half_count: u32,
    pub(crate) index_space: u32,
    pub(crate) mask_index: u64,
    pub(crate) epoch: AtomicU8,
    pub(crate) epoch_inserts: AtomicU32,
    pub(crate) epoch_insert_limit: u32,
    pub(crate) drops: AtomicU64,
    pub(crate) next_value: AtomicU64,
    pub(crate) mem_used: u64,
    pub(crate) evict_hook: RwLock<Option<EvictHook>>,
    pub(crate) walkers: Mutex<WalkerSet>,
}

// Safety: buckets and arena cells are only touched under the stripe lock
// covering them (or under all stripes at once); the remaining state is
// atomics and lock-protected structures.
unsafe impl Send for ExpireTable {}
unsafe impl Sync for ExpireTable {}

impl std::fmt::Debug for ExpireTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExpireTable").finish_non_exhaustive()
    }
}

enum Decision {
    Hit { bucket: u32, slot: u8 },
    Insert { bucket: u32, digest: u32 },
}

impl ExpireTable {
    /// Create a table holding up to `capacity` records of `value_size`
    /// bytes each, with a random per-instance seed.
    ///
    /// `capacity` is rounded up to a power of two and to at least 64;
    /// `value_size` is padded to an 8-byte multiple (sizes 0..=4 keep
    /// their natural width). A zero `value_size` is rejected.
    pub fn create(capacity: u64, value_size: u32) -> Result<Self> {
        Self::create_with_seed(capacity, value_size, rand::random::<u32>())
    }

    /// Like [`Self::create`] with an explicit digest seed, for reproducible
    /// placement in tests and tooling.
    pub fn create_with_seed(capacity: u64, value_size: u32, seed: u32) -> Result<Self> {
        if value_size == 0 {
            return Err(Error::InvalidParameter(
                "each record must be allocated a nonzero value size".into(),
            ));
        }
        let capacity = round_capacity(capacity);
        let table = Self::from_parts(capacity, pad_cell_size(value_size), seed)?;
        table.epoch.store(1, Ordering::Relaxed);
        Ok(table)
    }

    /// Allocate the skeleton for a table of exactly `capacity` records
    /// (already a power of two, at least [`MIN_CAPACITY`]) with an
    /// already-padded cell size. Buckets come up empty; the load path
    /// overwrites them wholesale.
    pub(crate) fn from_parts(capacity: u64, cell_size: usize, seed: u32) -> Result<Self> {
        debug_assert!(capacity.is_power_of_two() && capacity >= MIN_CAPACITY);
        let index_space = (capacity / BUCKET_WAYS as u64) as u32;
        let half_count = index_space / 2;
        let arena = ValueArena::new(capacity as usize, cell_size)?;
        let buckets: Box<[UnsafeCell<Bucket>]> = (0..index_space)
            .map(|_| UnsafeCell::new(Bucket::fresh()))
            .collect();
        let mem_used = index_space as u64 * std::mem::size_of::<Bucket>() as u64
            + arena.total_bytes() as u64
            + std::mem::size_of::<Self>() as u64;
        Ok(ExpireTable {
            buckets,
            arena,
            locks: LockStripes::new(index_space),
            master: Mutex::new(()),
            hash_state: hash::build_state(seed),
            seed,
            capacity,
            half_count,
            index_space,
            mask_index: (half_count - 1) as u64,
            epoch: AtomicU8::new(0),
            epoch_inserts: AtomicU32::new(0),
            epoch_insert_limit: half_count >> 4,
            drops: AtomicU64::new(0),
            next_value: AtomicU64::new(1),
            mem_used,
            evict_hook: RwLock::new(None),
            walkers: Mutex::new(WalkerSet::new()),
        })
    }

    /// Maximum number of concurrently held records.
    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Padded size of every value cell in bytes.
    pub fn value_size(&self) -> u32 {
        self.arena.cell_size() as u32
    }

    /// Per-instance digest seed. Stored in dumps so reloaded tables hash
    /// identically.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Total number of buckets addressable by [`Self::jump_to_slot`] and
    /// visited by walkers (both hash halves together).
    pub fn bucket_space(&self) -> u32 {
        self.index_space
    }

    /// Approximate bytes held by this table (buckets, arena, bookkeeping).
    pub fn mem_used(&self) -> u64 {
        self.mem_used
    }

    /// Number of forced evictions so far: inserts that had to discard a
    /// live record because both candidate buckets were full. Smoothly
    /// increasing under overload; read it to gauge pressure.
    pub fn drop_count(&self) -> u64 {
        self.drops.load(Ordering::Relaxed)
    }

    /// Opaque embedding counter carried in persisted images.
    pub fn next_value(&self) -> u64 {
        self.next_value.load(Ordering::Relaxed)
    }

    /// Set the opaque embedding counter.
    pub fn set_next_value(&self, value: u64) {
        self.next_value.store(value, Ordering::Relaxed);
    }

    /// Install the eviction hook, replacing any previous one.
    pub fn set_eviction_hook(&self, hook: EvictHook) {
        *self.evict_hook.write() = Some(hook);
    }

    /// Install the eviction hook only if none is set yet. Returns whether
    /// the hook was installed. Used by the sharing registry so the first
    /// attacher's hook wins.
    pub fn install_eviction_hook(&self, hook: EvictHook) -> bool {
        let mut slot = self.evict_hook.write();
        if slot.is_none() {
            *slot = Some(hook);
            true
        } else {
            false
        }
    }

    /// Look up a key. On a hit the record is promoted to most recently
    /// used and a guard over its value cell is returned; the stripe lock
    /// stays held until the guard drops, so keep the critical section
    /// short and do not re-enter the table while holding it.
    pub fn find(&self, key: &[u8]) -> Option<CellGuard<'_>> {
        let ks = self.locate(key);

        let guard = self.locks.lock(ks.bucket1);
        // Safety: stripe covering bucket1 is held.
        let hit = unsafe { self.scan_promote(ks.bucket1, ks.digest1) };
        if let Some(slot) = hit {
            return Some(unsafe { self.cell_guard(guard, ks.bucket1, slot) });
        }
        drop(guard);

        let guard = self.locks.lock(ks.bucket2);
        // Safety: stripe covering bucket2 is held.
        let hit = unsafe { self.scan_promote(ks.bucket2, ks.digest2) };
        if let Some(slot) = hit {
            return Some(unsafe { self.cell_guard(guard, ks.bucket2, slot) });
        }
        None
    }

    /// Look up a key, inserting it on a miss. The returned guard covers a
    /// cell that either already belongs to the key or has just been zeroed
    /// for the caller to fill. Insertion never fails: a full bucket pair
    /// evicts its least recently used record (counted in
    /// [`Self::drop_count`], with the eviction hook fired first).
    pub fn find_or_insert(&self, key: &[u8]) -> CellGuard<'_> {
        let ks = self.locate(key);
        let pair = self.locks.lock_pair(ks.bucket1, ks.bucket2);

        // Safety: both candidate stripes are held for the scans and for
        // the victim choice.
        let decision = unsafe {
            if let Some(slot) = self.scan_promote(ks.bucket1, ks.digest1) {
                Decision::Hit {
                    bucket: ks.bucket1,
                    slot,
                }
            } else if let Some(slot) = self.scan_promote(ks.bucket2, ks.digest2) {
                Decision::Hit {
                    bucket: ks.bucket2,
                    slot,
                }
            } else {
                self.choose_victim(&ks)
            }
        };

        match decision {
            Decision::Hit { bucket, slot } => {
                let stripe = pair.retain(bucket);
                unsafe { self.cell_guard(stripe, bucket, slot) }
            }
            Decision::Insert { bucket, digest } => {
                let stripe = pair.retain(bucket);
                // Safety: the retained stripe covers `bucket`.
                let slot = unsafe { self.evict_and_install(bucket, digest) };
                unsafe { self.cell_guard(stripe, bucket, slot) }
            }
        }
    }

    /// Remove a key. Returns whether a record was removed. The freed
    /// descriptor becomes its bucket's least recently used slot; no
    /// eviction hook fires for explicit removal.
    pub fn remove(&self, key: &[u8]) -> bool {
        let ks = self.locate(key);
        {
            let _guard = self.locks.lock(ks.bucket1);
            // Safety: stripe covering bucket1 is held.
            let bucket = unsafe { self.bucket_mut(ks.bucket1) };
            if let Some(pos) = bucket.scan(ks.digest1) {
                bucket.remove_at(pos);
                return true;
            }
        }
        {
            let _guard = self.locks.lock(ks.bucket2);
            // Safety: stripe covering bucket2 is held.
            let bucket = unsafe { self.bucket_mut(ks.bucket2) };
            if let Some(pos) = bucket.scan(ks.digest2) {
                bucket.remove_at(pos);
                return true;
            }
        }
        false
    }

    /// Jump straight to a cell whose address is already known, without a
    /// key lookup and without promoting anything. Embeddings that store
    /// `(bucket, slot)` links inside cells use this to chase them; they
    /// must verify ownership themselves (a tag inside the cell), because
    /// the slot may have been recycled since the link was written.
    pub fn jump_to_slot(&self, bucket: u32, slot: u8) -> Option<CellGuard<'_>> {
        if bucket >= self.index_space || slot as usize >= BUCKET_WAYS {
            return None;
        }
        let guard = self.locks.lock(bucket);
        Some(unsafe { self.cell_guard(guard, bucket, slot) })
    }

    /// Promote the record owning `slot` in `bucket` to most recently used.
    /// Companion to [`Self::jump_to_slot`] for link-chasing embeddings. No
    /// digest check is performed; callers own the slot by convention.
    pub fn mark_slot_used(&self, bucket: u32, slot: u8) {
        if bucket >= self.index_space || slot as usize >= BUCKET_WAYS {
            return;
        }
        let _guard = self.locks.lock(bucket);
        // Safety: stripe covering `bucket` is held.
        let b = unsafe { self.bucket_mut(bucket) };
        if let Some(pos) = b.position_of_data_slot(slot as usize) {
            b.promote(pos);
        }
    }

    /// Drop every record. Value cells are not wiped here; they are zeroed
    /// lazily when their slot is next reused.
    pub fn flush(&self) {
        let _all = self.locks.lock_all();
        for cell in self.buckets.iter() {
            // Safety: every stripe is held.
            unsafe { (*cell.get()).reset() };
        }
    }

    /// Visit every live record's cell under a whole-table lock. Does not
    /// modify the table.
    pub fn scour<F: FnMut(&mut [u8])>(&self, mut visit: F) {
        let _all = self.locks.lock_all();
        // Safety: every stripe is held.
        unsafe { self.scour_locked(&mut visit) };
    }

    /// Visit every live record, then reset the buckets, in one pass under
    /// the whole-table lock.
    pub fn scour_and_flush<F: FnMut(&mut [u8])>(&self, mut visit: F) {
        let _all = self.locks.lock_all();
        // Safety: every stripe is held.
        unsafe {
            self.scour_locked(&mut visit);
            for cell in self.buckets.iter() {
                (*cell.get()).reset();
            }
        }
    }

    /// Visit every live record, then destroy the table. The regular drop
    /// path deliberately does not fire callbacks; this is the variant that
    /// lets an embedding release handles stored in cells on shutdown.
    pub fn scour_and_destroy<F: FnMut(&mut [u8])>(self, visit: F) {
        self.scour(visit);
    }

    /// Acquire the whole-table master mutex. External code coordinating
    /// two independent tables takes both masters instead of nesting stripe
    /// locks; never acquire it while holding a cell guard.
    pub fn master_lock(&self) -> MutexGuard<'_, ()> {
        self.master.lock()
    }

    /// Candidate placement of a key under this table's seed.
    pub(crate) fn locate(&self, key: &[u8]) -> KeySlots {
        hash::key_slots(&self.hash_state, key, self.half_count)
    }

    /// # Safety
    /// The stripe covering `index` must be held (or all stripes).
    #[inline]
    pub(crate) unsafe fn bucket_mut(&self, index: u32) -> &mut Bucket {
        &mut *self.buckets[index as usize].get()
    }

    /// Scan one bucket and promote on a hit, returning the record's data
    /// slot.
    ///
    /// # Safety
    /// The stripe covering `bucket_index` must be held.
    unsafe fn scan_promote(&self, bucket_index: u32, digest: u32) -> Option<u8> {
        let bucket = self.bucket_mut(bucket_index);
        bucket.scan(digest).map(|pos| {
            let slot = bucket.slot(pos).data_slot() as u8;
            bucket.promote(pos);
            slot
        })
    }

    /// Pick the bucket an insert lands in when both candidates miss: the
    /// emptier one, or on a full tie the one with the staler epoch stamp
    /// (counted as a forced drop).
    ///
    /// # Safety
    /// Both candidate stripes must be held.
    unsafe fn choose_victim(&self, ks: &KeySlots) -> Decision {
        let b1 = self.bucket_mut(ks.bucket1);
        let b2 = self.bucket_mut(ks.bucket2);
        let d1 = b1.depth();
        let d2 = b2.depth();
        let take_second = if d1 == d2 {
            if d1 == BUCKET_WAYS {
                self.drops.fetch_add(1, Ordering::Relaxed);
                let epoch = self.epoch.load(Ordering::Relaxed);
                epoch.wrapping_sub(b2.stamp()) > epoch.wrapping_sub(b1.stamp())
            } else {
                false
            }
        } else {
            d2 < d1
        };
        if take_second {
            Decision::Insert {
                bucket: ks.bucket2,
                digest: ks.digest2,
            }
        } else {
            Decision::Insert {
                bucket: ks.bucket1,
                digest: ks.digest1,
            }
        }
    }

    /// Reuse the LRU slot of `bucket_index` for a new record with `digest`:
    /// fire the eviction hook if the slot was live, zero the cell, promote
    /// the refreshed descriptor, and re-stamp the bucket's epoch bits.
    /// Returns the data slot of the (now zeroed) cell.
    ///
    /// # Safety
    /// The stripe covering `bucket_index` must be held.
    unsafe fn evict_and_install(&self, bucket_index: u32, digest: u32) -> u8 {
        let bucket = self.bucket_mut(bucket_index);
        let tail = bucket.slot(BUCKET_WAYS - 1);
        let slot = tail.data_slot() as u8;
        let cell = cell_index(bucket_index, slot);
        if tail.is_occupied() {
            if let Some(hook) = self.evict_hook.read().as_deref() {
                hook(self.arena.cell_slice(cell));
            }
        }
        self.arena.cell_slice(cell).fill(0);
        bucket.set_slot(BUCKET_WAYS - 1, tail.with_digest(digest));
        bucket.promote_unstamped(BUCKET_WAYS - 1);
        self.stamp_bucket(bucket);
        slot
    }

    /// Count this insert toward the epoch and write the (possibly just
    /// advanced) epoch into the bucket's stamp bits.
    fn stamp_bucket(&self, bucket: &mut Bucket) {
        let inserts = self.epoch_inserts.fetch_add(1, Ordering::Relaxed) + 1;
        let mut epoch = self.epoch.load(Ordering::Relaxed);
        if inserts > self.epoch_insert_limit {
            epoch = epoch.wrapping_add(1);
            self.epoch.store(epoch, Ordering::Relaxed);
            self.epoch_inserts.store(0, Ordering::Relaxed);
        }
        bucket.write_stamp(epoch);
    }

    /// Visit every occupied cell. Factored out of the scour variants.
    ///
    /// # Safety
    /// Every stripe must be held.
    unsafe fn scour_locked(&self, visit: &mut dyn FnMut(&mut [u8])) {
        for (i, cell) in self.buckets.iter().enumerate() {
            let bucket = &*cell.get();
            for pos in 0..BUCKET_WAYS {
                let desc = bucket.slot(pos);
                if desc.is_occupied() {
                    let idx = cell_index(i as u32, desc.data_slot() as u8);
                    visit(self.arena.cell_slice(idx));
                }
            }
        }
    }

    /// Build a cell guard from a held stripe.
    ///
    /// # Safety
    /// `stripe` must cover `bucket`.
    unsafe fn cell_guard<'a>(
        &'a self,
        stripe: StripeGuard<'a>,
        bucket: u32,
        slot: u8,
    ) -> CellGuard<'a> {
        let index = cell_index(bucket, slot);
        CellGuard {
            _stripe: stripe,
            ptr: self.arena.cell_ptr(index),
            len: self.arena.cell_size(),
            bucket,
            slot,
        }
    }

    #[cfg(test)]
    pub(crate) fn bucket_snapshot(&self, bucket: u32) -> [super::descriptor::SlotDesc; BUCKET_WAYS] {
        let _guard = self.locks.lock(bucket);
        // Safety: stripe covering `bucket` is held.
        let b = unsafe { self.bucket_mut(bucket) };
        std::array::from_fn(|i| b.slot(i))
    }
}

impl Drop for ExpireTable {
    fn drop(&mut self) {
        let drops = self.drops.load(Ordering::Relaxed);
        if drops > 0 {
            tracing::info!(drops, "expire table retired records under pressure");
        }
    }
}

#[inline]
fn cell_index(bucket: u32, slot: u8) -> usize {
    ((bucket as usize) << BUCKET_WAYS_SHIFT) + slot as usize
}

/// Round a requested capacity up to the supported shape, warning when the
/// request was below the floor.
pub(crate) fn round_capacity(requested: u64) -> u64 {
    let mut capacity = requested;
    if capacity < MIN_CAPACITY {
        tracing::warn!(
            requested,
            minimum = MIN_CAPACITY,
            "table capacity below minimum, rounding up"
        );
        capacity = MIN_CAPACITY;
    }
    capacity.next_power_of_two()
}

/// A live reference to one value cell.
///
/// Holds the stripe lock of the owning bucket for its whole lifetime;
/// dropping the guard is the unlock. Dereferences to the cell's bytes.
pub struct CellGuard<'a> {
    _stripe: StripeGuard<'a>,
    ptr: *mut u8,
    len: usize,
    bucket: u32,
    slot: u8,
}

impl CellGuard<'_> {
    /// Address of this cell as `(bucket, data_slot)`, the coordinates
    /// accepted by [`ExpireTable::jump_to_slot`] and
    /// [`ExpireTable::mark_slot_used`].
    pub fn location(&self) -> (u32, u8) {
        (self.bucket, self.slot)
    }
}

impl std::ops::Deref for CellGuard<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        // Safety: the stripe lock is held for as long as self lives.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl std::ops::DerefMut for CellGuard<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        // Safety: as above, and &mut self guarantees uniqueness.
        unsafe { std::slice::from_raw_parts_mut(self.ptr, self.len) }
    }
}

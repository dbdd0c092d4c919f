//! One-bucket-per-step table iteration
//!
//! A walker sweeps the table a single bucket at a time, invoking a visit
//! callback on every live record it passes and killing records the
//! callback votes against. Steps are cheap and bounded, so embeddings can
//! interleave them with regular traffic to implement incremental expiry.
//!
//! Walkers are owned by their table: the table stores the cursor and the
//! callback, and hands the caller only an (index, generation) handle. A
//! dropped table reclaims all walker storage with it.

use crate::constants::BUCKET_WAYS;
use crate::types::error::{Error, Result};

use super::table::ExpireTable;

/// Verdict returned by a walker's visit callback for each record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visit {
    /// Leave the record in place.
    Keep,
    /// Kill the record in place: its digest is cleared, its position and
    /// data-slot ownership are untouched.
    Drop,
}

/// Handle to a walker owned by some table. Stale handles (destroyed and
/// recycled slots) are detected by generation and rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalkerHandle {
    index: u32,
    generation: u32,
}

pub(crate) type VisitFn = Box<dyn FnMut(&mut [u8]) -> Visit + Send>;

struct ActiveWalker {
    row: u32,
    loops: u64,
    visit: VisitFn,
}

struct WalkerEntry {
    generation: u32,
    active: Option<ActiveWalker>,
}

/// All walkers of one table. Guarded by the table's walker mutex, which
/// also serializes stepping; the walker mutex is always taken before any
/// stripe lock.
pub(crate) struct WalkerSet {
    entries: Vec<WalkerEntry>,
}

impl WalkerSet {
    pub fn new() -> Self {
        WalkerSet {
            entries: Vec::new(),
        }
    }

    fn create(&mut self, visit: VisitFn) -> WalkerHandle {
        let active = ActiveWalker {
            row: 0,
            loops: 0,
            visit,
        };
        for (i, entry) in self.entries.iter_mut().enumerate() {
            if entry.active.is_none() {
                entry.active = Some(active);
                return WalkerHandle {
                    index: i as u32,
                    generation: entry.generation,
                };
            }
        }
        self.entries.push(WalkerEntry {
            generation: 0,
            active: Some(active),
        });
        WalkerHandle {
            index: (self.entries.len() - 1) as u32,
            generation: 0,
        }
    }

    fn get_mut(&mut self, handle: WalkerHandle) -> Result<&mut ActiveWalker> {
        self.entries
            .get_mut(handle.index as usize)
            .filter(|e| e.generation == handle.generation)
            .and_then(|e| e.active.as_mut())
            .ok_or_else(|| Error::InvalidParameter("stale walker handle".into()))
    }
}

impl ExpireTable {
    /// Register a walker with its visit callback. The walker starts at
    /// bucket 0 and is owned by the table; destroy it with
    /// [`Self::walker_destroy`] or simply drop the table.
    pub fn walker_create<F>(&self, visit: F) -> WalkerHandle
    where
        F: FnMut(&mut [u8]) -> Visit + Send + 'static,
    {
        self.walkers.lock().create(Box::new(visit))
    }

    /// Advance a walker by one bucket: visit every live record there,
    /// killing the ones the callback votes [`Visit::Drop`] on, then move
    /// the cursor (wrapping back to bucket 0 at the end of the table).
    /// Returns the number of records visited in this step.
    ///
    /// Concurrent table traffic may change what a walker sees; a record is
    /// only guaranteed to be visited if it is present when the cursor
    /// reaches its bucket.
    pub fn walker_step(&self, handle: WalkerHandle) -> Result<usize> {
        let mut set = self.walkers.lock();
        let walker = set.get_mut(handle)?;
        let row = walker.row;

        let visited = {
            let _stripe = self.locks.lock(row);
            // Safety: stripe covering `row` is held.
            let bucket = unsafe { self.bucket_mut(row) };
            let mut visited = 0;
            for pos in 0..BUCKET_WAYS {
                let desc = bucket.slot(pos);
                if desc.is_occupied() {
                    let cell = ((row as usize) << crate::constants::BUCKET_WAYS_SHIFT)
                        + desc.data_slot();
                    // Safety: same stripe covers the bucket's cells.
                    let verdict = (walker.visit)(unsafe { self.arena.cell_slice(cell) });
                    if verdict == Visit::Drop {
                        bucket.set_slot(pos, desc.cleared());
                    }
                    visited += 1;
                }
            }
            visited
        };

        walker.row += 1;
        if walker.row >= self.bucket_space() {
            walker.row = 0;
            walker.loops += 1;
        }
        Ok(visited)
    }

    /// Number of complete sweeps this walker has finished. Advisory only.
    pub fn walker_loops(&self, handle: WalkerHandle) -> Result<u64> {
        Ok(self.walkers.lock().get_mut(handle)?.loops)
    }

    /// Release a walker's storage. Its handle (and any copy of it) becomes
    /// stale.
    pub fn walker_destroy(&self, handle: WalkerHandle) -> Result<()> {
        let mut set = self.walkers.lock();
        set.get_mut(handle)?;
        let entry = &mut set.entries[handle.index as usize];
        entry.active = None;
        entry.generation = entry.generation.wrapping_add(1);
        Ok(())
    }
}

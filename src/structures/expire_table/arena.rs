//! Fixed value-cell arena
//!
//! One contiguous zero-initialized region of `cells × cell_size` bytes,
//! allocated at table creation and never resized. Cell `i` belongs to the
//! descriptor whose bucket and data-slot index encode `i`; a cell may only
//! be touched while the stripe lock covering its bucket is held.

use std::alloc::{alloc_zeroed, dealloc, Layout};
use std::ptr::NonNull;

use crate::constants::CACHE_LINE_SIZE;
use crate::types::error::{Error, Result};

/// Pad a requested value size up to an 8-byte multiple. The small sizes
/// 0, 1, 2 and 4 are kept exact so single-scalar cells stay dense; 3 is
/// widened to 4.
pub(crate) fn pad_cell_size(value_size: u32) -> usize {
    match value_size {
        0 | 1 | 2 | 4 => value_size as usize,
        3 => 4,
        n if n < 8 => 8,
        n => ((n as usize) + 7) & !7,
    }
}

/// The arena backing every value cell of one table.
pub(crate) struct ValueArena {
    base: NonNull<u8>,
    cell_size: usize,
    cells: usize,
}

impl ValueArena {
    /// Allocate a zeroed arena. Fails with [`Error::OutOfMemory`] instead of
    /// aborting, so table creation can roll back cleanly.
    pub fn new(cells: usize, cell_size: usize) -> Result<Self> {
        let total = cells
            .checked_mul(cell_size)
            .ok_or(Error::OutOfMemory)?;
        if total == 0 {
            return Ok(ValueArena {
                base: NonNull::dangling(),
                cell_size,
                cells,
            });
        }
        let layout = Layout::from_size_align(total, CACHE_LINE_SIZE)
            .map_err(|_| Error::OutOfMemory)?;
        // Safety: layout has nonzero size.
        let ptr = unsafe { alloc_zeroed(layout) };
        match NonNull::new(ptr) {
            Some(base) => Ok(ValueArena {
                base,
                cell_size,
                cells,
            }),
            None => Err(Error::OutOfMemory),
        }
    }

    #[inline]
    pub fn cell_size(&self) -> usize {
        self.cell_size
    }

    #[inline]
    pub fn total_bytes(&self) -> usize {
        self.cells * self.cell_size
    }

    /// Mutable view of one cell.
    ///
    /// # Safety
    /// `index` must be in range and the caller must hold the stripe lock
    /// covering the bucket that owns the cell, with no other reference to
    /// this cell live.
    #[inline]
    pub unsafe fn cell_slice(&self, index: usize) -> &mut [u8] {
        debug_assert!(index < self.cells || self.cell_size == 0);
        let ptr = self.base.as_ptr().add(index * self.cell_size);
        std::slice::from_raw_parts_mut(ptr, self.cell_size)
    }

    /// Raw pointer to one cell, for guards that outlive the borrow above.
    ///
    /// # Safety
    /// Same contract as [`Self::cell_slice`].
    #[inline]
    pub unsafe fn cell_ptr(&self, index: usize) -> *mut u8 {
        self.base.as_ptr().add(index * self.cell_size)
    }

    /// The whole arena as one immutable slice.
    ///
    /// # Safety
    /// Caller must hold every stripe lock.
    pub unsafe fn as_slice(&self) -> &[u8] {
        std::slice::from_raw_parts(self.base.as_ptr(), self.total_bytes())
    }

    /// The whole arena as one mutable slice.
    ///
    /// # Safety
    /// Caller must hold every stripe lock, or have exclusive access because
    /// the table is still being built.
    pub unsafe fn as_mut_slice(&self) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.base.as_ptr(), self.total_bytes())
    }
}

impl Drop for ValueArena {
    fn drop(&mut self) {
        let total = self.total_bytes();
        if total > 0 {
            // Safety: allocated in new() with this exact layout.
            unsafe {
                let layout = Layout::from_size_align_unchecked(total, CACHE_LINE_SIZE);
                dealloc(self.base.as_ptr(), layout);
            }
        }
    }
}

// Safety: the arena is a plain byte region; all aliasing discipline is
// enforced by the stripe locks of the owning table.
unsafe impl Send for ValueArena {}
unsafe impl Sync for ValueArena {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn padding_rules() {
        assert_eq!(pad_cell_size(0), 0);
        assert_eq!(pad_cell_size(1), 1);
        assert_eq!(pad_cell_size(2), 2);
        assert_eq!(pad_cell_size(3), 4);
        assert_eq!(pad_cell_size(4), 4);
        assert_eq!(pad_cell_size(5), 8);
        assert_eq!(pad_cell_size(7), 8);
        assert_eq!(pad_cell_size(8), 8);
        assert_eq!(pad_cell_size(9), 16);
        assert_eq!(pad_cell_size(17), 24);
        assert_eq!(pad_cell_size(64), 64);
    }

    #[test]
    fn cells_start_zeroed_and_are_disjoint() {
        let arena = ValueArena::new(8, 16).unwrap();
        unsafe {
            for i in 0..8 {
                assert!(arena.cell_slice(i).iter().all(|&b| b == 0));
            }
            arena.cell_slice(3).fill(0xAB);
            assert!(arena.cell_slice(2).iter().all(|&b| b == 0));
            assert!(arena.cell_slice(4).iter().all(|&b| b == 0));
            assert!(arena.cell_slice(3).iter().all(|&b| b == 0xAB));
        }
    }

    #[test]
    fn zero_sized_cells_are_permitted() {
        let arena = ValueArena::new(64, 0).unwrap();
        assert_eq!(arena.total_bytes(), 0);
        unsafe {
            assert!(arena.cell_slice(5).is_empty());
        }
    }
}

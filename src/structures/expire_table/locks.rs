//! Striped bucket locking
//!
//! Every 32 consecutive buckets share one mutex. Single-bucket operations
//! take one stripe; the insert path takes the two candidate stripes in
//! ascending index order; whole-table operations take every stripe in
//! ascending order. Keeping all acquisition shapes in this module is what
//! makes the ordering rule auditable.

use parking_lot::{Mutex, MutexGuard};

use crate::constants::STRIPE_SHIFT;

/// A held stripe. Dropping it is the unlock.
pub(crate) type StripeGuard<'a> = MutexGuard<'a, ()>;

/// The fixed array of stripe mutexes for one table.
pub(crate) struct LockStripes {
    stripes: Box<[Mutex<()>]>,
}

impl LockStripes {
    /// One mutex per 32 buckets, at least one.
    pub fn new(index_space: u32) -> Self {
        let count = std::cmp::max(1, (index_space >> STRIPE_SHIFT) as usize);
        LockStripes {
            stripes: (0..count).map(|_| Mutex::new(())).collect(),
        }
    }

    #[inline]
    pub fn stripe_of(bucket: u32) -> usize {
        (bucket >> STRIPE_SHIFT) as usize
    }

    pub fn count(&self) -> usize {
        self.stripes.len()
    }

    /// Lock the stripe covering one bucket.
    pub fn lock(&self, bucket: u32) -> StripeGuard<'_> {
        self.stripes[Self::stripe_of(bucket)].lock()
    }

    /// Lock the stripes covering two buckets, lower stripe index first.
    /// When both buckets share a stripe, it is taken once.
    pub fn lock_pair(&self, b1: u32, b2: u32) -> PairGuard<'_> {
        let s1 = Self::stripe_of(b1);
        let s2 = Self::stripe_of(b2);
        if s1 == s2 {
            PairGuard {
                lo: (s1, self.stripes[s1].lock()),
                hi: None,
            }
        } else {
            let (lo, hi) = if s1 < s2 { (s1, s2) } else { (s2, s1) };
            let lo_guard = self.stripes[lo].lock();
            let hi_guard = self.stripes[hi].lock();
            PairGuard {
                lo: (lo, lo_guard),
                hi: Some((hi, hi_guard)),
            }
        }
    }

    /// Lock every stripe, ascending. Holding the returned guard freezes the
    /// whole table.
    pub fn lock_all(&self) -> AllGuard<'_> {
        AllGuard {
            _guards: self.stripes.iter().map(|m| m.lock()).collect(),
        }
    }
}

/// Both candidate stripes, held together while the insert path decides
/// which bucket receives the record.
pub(crate) struct PairGuard<'a> {
    lo: (usize, StripeGuard<'a>),
    hi: Option<(usize, StripeGuard<'a>)>,
}

impl<'a> PairGuard<'a> {
    /// Keep only the stripe covering `bucket`; the other stripe, if
    /// distinct, is released here.
    pub fn retain(self, bucket: u32) -> StripeGuard<'a> {
        let want = LockStripes::stripe_of(bucket);
        let PairGuard { lo, hi } = self;
        match hi {
            Some((hi_idx, hi_guard)) if hi_idx == want => hi_guard,
            _ => {
                debug_assert_eq!(lo.0, want);
                lo.1
            }
        }
    }
}

/// Every stripe of the table, held at once.
pub(crate) struct AllGuard<'a> {
    _guards: Vec<StripeGuard<'a>>,
}

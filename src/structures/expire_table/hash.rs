//! Key hashing: one seeded 64-bit hash expanded into two candidate buckets
//! and two digests
//!
//! A single aHash pass over the key yields `m`; multiplying `m` by two
//! fixed odd constants gives two independently scrambled products. Each
//! product contributes a bucket index (from its high bits) and a 27-bit
//! digest (from its low bits). The second index is forced into the upper
//! half of the bucket array, so the two candidates are always distinct.

use std::hash::{BuildHasher, Hasher};

use super::descriptor::DIGEST_BITS;

/// Odd multipliers decorrelating the two candidate placements.
const PERMUTE1: u64 = 0xed31952d18a569dd;
const PERMUTE2: u64 = 0x94e36ad1c8d2654b;

const DIGEST_MASK: u64 = (1 << DIGEST_BITS) - 1;

/// Digest substituted when the low bits come out zero, so an occupied slot
/// can always be told from an empty one.
const DIGEST_DEFAULT: u32 = 0x0000_1000;

/// Candidate placement of one key: two buckets in opposite halves and the
/// digest to match in each.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KeySlots {
    pub bucket1: u32,
    pub bucket2: u32,
    pub digest1: u32,
    pub digest2: u32,
}

/// SplitMix64 finalizer, used to expand the 32-bit table seed into the four
/// aHash seed words.
#[inline]
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

/// Build the hasher state for a table seed. Deterministic, so a reloaded
/// table hashes keys exactly as the dumping table did.
pub(crate) fn build_state(seed: u32) -> ahash::RandomState {
    let k0 = mix64(seed as u64 ^ PERMUTE1);
    let k1 = mix64(k0);
    let k2 = mix64(k1);
    let k3 = mix64(k2);
    ahash::RandomState::with_seeds(k0, k1, k2, k3)
}

/// Hash a key and derive its candidate placement for a table whose halves
/// hold `half_count` buckets each. `half_count` must be a power of two.
pub(crate) fn key_slots(state: &ahash::RandomState, key: &[u8], half_count: u32) -> KeySlots {
    debug_assert!(half_count.is_power_of_two());
    let mut hasher = state.build_hasher();
    hasher.write(key);
    let m = hasher.finish();

    let p1 = m.wrapping_mul(PERMUTE1);
    let p2 = m.wrapping_mul(PERMUTE2);
    let mask = (half_count - 1) as u64;

    let d1 = (p1 & DIGEST_MASK) as u32;
    let d2 = (p2 & DIGEST_MASK) as u32;

    KeySlots {
        bucket1: ((p1 >> DIGEST_BITS) & mask) as u32,
        bucket2: (((p2 >> DIGEST_BITS) & mask) as u32) | half_count,
        digest1: if d1 == 0 { DIGEST_DEFAULT } else { d1 },
        digest2: if d2 == 0 { DIGEST_DEFAULT } else { d2 },
    }
}

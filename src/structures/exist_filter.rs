//! Existence-only membership filter
//!
//! A seeded, lock-free bit-array sketch answering "has this key been seen
//! before". Embeddings pair it with an expiring table by absorbing evicted
//! keys into the filter, so a key that cycles back after eviction can
//! still be recognized as old. False positives occur at the configured
//! rate; false negatives never.

use std::hash::{BuildHasher, Hasher};
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::structures::expire_table::{FILTER_MAGIC, TABLE_MAGIC};
use crate::types::error::{Error, PersistError, Result};

/// Lock-free existence filter over opaque byte keys.
#[derive(Debug)]
pub struct ExistFilter {
    bits: Vec<AtomicU64>,
    mask: usize,
    probes: u32,
    state: ahash::RandomState,
    seed: u32,
}

fn filter_state(seed: u32) -> ahash::RandomState {
    ahash::RandomState::with_seeds(
        seed as u64,
        mix64(seed as u64),
        mix64(seed as u64 ^ u64::MAX),
        mix64((seed as u64) << 32),
    )
}

impl ExistFilter {
    /// Size the filter for `capacity` distinct keys at roughly `fpr`
    /// false-positive rate, with a random seed.
    pub fn with_capacity(capacity: usize, fpr: f64) -> Self {
        Self::with_capacity_seeded(capacity, fpr, rand::random::<u32>())
    }

    /// Like [`Self::with_capacity`] with an explicit seed for reproducible
    /// placement.
    pub fn with_capacity_seeded(capacity: usize, fpr: f64, seed: u32) -> Self {
        let capacity = capacity.max(1);
        let m = (capacity as f64 * (f64::ln(fpr).abs() / f64::ln(2.0).powi(2))).ceil() as usize;
        let m = m.next_power_of_two().max(64);
        let probes = ((m as f64 / capacity as f64) * f64::ln(2.0)).round().max(1.0) as u32;
        ExistFilter {
            bits: (0..m / 64).map(|_| AtomicU64::new(0)).collect(),
            mask: m - 1,
            probes,
            state: filter_state(seed),
            seed,
        }
    }

    /// The seed this filter hashes with.
    pub fn seed(&self) -> u32 {
        self.seed
    }

    /// Record a key as seen.
    pub fn insert(&self, key: &[u8]) {
        self.insert_hashed(self.hash_key(key));
    }

    /// Whether a key may have been seen. `false` is definitive.
    pub fn contains(&self, key: &[u8]) -> bool {
        self.contains_hashed(self.hash_key(key))
    }

    /// Record a pre-hashed key (fused hashing path for callers that
    /// already computed the 64-bit hash).
    pub fn insert_hashed(&self, hash: u64) {
        let (h1, h2) = double_hashes(hash);
        for i in 0..self.probes {
            let h = h1.wrapping_add((i as u64).wrapping_mul(h2));
            let bit = (h as usize) & self.mask;
            self.bits[bit >> 6].fetch_or(1u64 << (bit & 63), Ordering::Relaxed);
        }
    }

    /// Membership check for a pre-hashed key.
    pub fn contains_hashed(&self, hash: u64) -> bool {
        let (h1, h2) = double_hashes(hash);
        for i in 0..self.probes {
            let h = h1.wrapping_add((i as u64).wrapping_mul(h2));
            let bit = (h as usize) & self.mask;
            if self.bits[bit >> 6].load(Ordering::Relaxed) & (1u64 << (bit & 63)) == 0 {
                return false;
            }
        }
        true
    }

    fn hash_key(&self, key: &[u8]) -> u64 {
        let mut hasher = self.state.build_hasher();
        hasher.write(key);
        hasher.finish()
    }

    /// Write the filter to `writer`: its own magic, the sizing header, and
    /// the raw bit array in native byte order.
    pub fn dump<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&FILTER_MAGIC)?;
        writer.write_all(&self.seed.to_ne_bytes())?;
        writer.write_all(&self.probes.to_ne_bytes())?;
        writer.write_all(&(self.mask as u64).to_ne_bytes())?;
        for word in &self.bits {
            writer.write_all(&word.load(Ordering::Relaxed).to_ne_bytes())?;
        }
        Ok(())
    }

    /// Read a filter image back. Cache-table images are refused here the
    /// same way filter images are refused by the table loader.
    pub fn load<R: Read>(mut reader: R) -> Result<Self> {
        let mut magic = [0u8; 12];
        reader.read_exact(&mut magic).map_err(read_err)?;
        if magic == TABLE_MAGIC {
            return Err(PersistError::SiblingMagic.into());
        }
        if magic != FILTER_MAGIC {
            return Err(PersistError::BadMagic.into());
        }

        let mut word4 = [0u8; 4];
        let mut word8 = [0u8; 8];
        reader.read_exact(&mut word4).map_err(read_err)?;
        let seed = u32::from_ne_bytes(word4);
        reader.read_exact(&mut word4).map_err(read_err)?;
        let probes = u32::from_ne_bytes(word4);
        reader.read_exact(&mut word8).map_err(read_err)?;
        let mask = u64::from_ne_bytes(word8) as usize;

        let m = mask.wrapping_add(1);
        if m < 64 || !m.is_power_of_two() || probes == 0 || probes > 64 {
            return Err(PersistError::Corrupt("filter sizing header".into()).into());
        }

        let mut bits = Vec::with_capacity(m / 64);
        for _ in 0..m / 64 {
            reader.read_exact(&mut word8).map_err(read_err)?;
            bits.push(AtomicU64::new(u64::from_ne_bytes(word8)));
        }

        Ok(ExistFilter {
            bits,
            mask,
            probes,
            state: filter_state(seed),
            seed,
        })
    }
}

fn read_err(e: io::Error) -> Error {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        PersistError::Truncated.into()
    } else {
        Error::Io(e)
    }
}

/// SplitMix64 mix function for cheap independent probe streams.
#[inline]
fn mix64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58476d1ce4e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

#[inline]
fn double_hashes(hash: u64) -> (u64, u64) {
    (hash, mix64(hash) | 1)
}

//! Packed slot descriptor: `[digest:27][epoch:1][data_slot:4]`
//!
//! Every bucket position holds one of these. A nonzero digest marks the
//! slot occupied; the 4-bit data-slot index names the arena cell owned by
//! the descriptor; bit 27 is one bit of the bucket's distributed epoch
//! stamp. All shifting and masking lives here so the packing never leaks
//! into the rest of the table.

/// Number of digest bits in a descriptor.
pub(crate) const DIGEST_BITS: u32 = 27;

const DIGEST_MASK: u32 = (1 << DIGEST_BITS) - 1;
const EPOCH_BIT: u32 = 1 << DIGEST_BITS;
const SLOT_SHIFT: u32 = 28;

/// One packed bucket slot.
#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub(crate) struct SlotDesc(u32);

impl SlotDesc {
    /// An empty descriptor (digest 0) owning the given data slot.
    #[inline]
    pub fn empty(data_slot: u8) -> Self {
        debug_assert!((data_slot as usize) < crate::constants::BUCKET_WAYS);
        SlotDesc((data_slot as u32) << SLOT_SHIFT)
    }

    /// Rebuild a descriptor from its persisted 32-bit image.
    #[inline]
    pub fn from_raw(raw: u32) -> Self {
        SlotDesc(raw)
    }

    /// The 32-bit image written to persisted dumps.
    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// Key fingerprint; zero means the slot is empty.
    #[inline]
    pub fn digest(self) -> u32 {
        self.0 & DIGEST_MASK
    }

    #[inline]
    pub fn is_occupied(self) -> bool {
        self.digest() != 0
    }

    /// Index of the arena cell this descriptor owns within its bucket.
    #[inline]
    pub fn data_slot(self) -> usize {
        (self.0 >> SLOT_SHIFT) as usize
    }

    /// The stolen epoch bit (0 or 1). Only meaningful at tail positions.
    #[inline]
    pub fn epoch_bit(self) -> u8 {
        ((self.0 & EPOCH_BIT) >> DIGEST_BITS) as u8
    }

    /// Same slot and epoch bit, new digest.
    #[inline]
    pub fn with_digest(self, digest: u32) -> Self {
        debug_assert_eq!(digest & !DIGEST_MASK, 0);
        SlotDesc((self.0 & !DIGEST_MASK) | digest)
    }

    /// Same slot and epoch bit, digest cleared to empty.
    #[inline]
    pub fn cleared(self) -> Self {
        SlotDesc(self.0 & !DIGEST_MASK)
    }

    /// Same digest and slot, epoch bit forced to `bit`.
    #[inline]
    pub fn with_epoch_bit(self, bit: u8) -> Self {
        SlotDesc((self.0 & !EPOCH_BIT) | (((bit & 1) as u32) << DIGEST_BITS))
    }

    /// Keep this position's epoch bit, take digest and data slot from
    /// `other`. This is the move primitive for epoch-preserving rotation:
    /// the epoch bit belongs to the position, the keyed bits to the record.
    #[inline]
    pub fn merge_keyed(self, other: SlotDesc) -> Self {
        SlotDesc((self.0 & EPOCH_BIT) | (other.0 & !EPOCH_BIT))
    }
}

impl std::fmt::Debug for SlotDesc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlotDesc")
            .field("digest", &format_args!("{:#09x}", self.digest()))
            .field("epoch_bit", &self.epoch_bit())
            .field("data_slot", &self.data_slot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packing_roundtrip() {
        let d = SlotDesc::empty(9).with_digest(0x07FF_FFFF).with_epoch_bit(1);
        assert_eq!(d.digest(), 0x07FF_FFFF);
        assert_eq!(d.data_slot(), 9);
        assert_eq!(d.epoch_bit(), 1);
        assert_eq!(SlotDesc::from_raw(d.raw()), d);
    }

    #[test]
    fn empty_slot_has_zero_digest() {
        for slot in 0..16u8 {
            let d = SlotDesc::empty(slot);
            assert!(!d.is_occupied());
            assert_eq!(d.data_slot(), slot as usize);
            assert_eq!(d.epoch_bit(), 0);
        }
    }

    #[test]
    fn merge_keyed_keeps_position_epoch() {
        let here = SlotDesc::empty(3).with_epoch_bit(1);
        let below = SlotDesc::empty(7).with_digest(0x1234).with_epoch_bit(0);
        let merged = here.merge_keyed(below);
        assert_eq!(merged.epoch_bit(), 1);
        assert_eq!(merged.digest(), 0x1234);
        assert_eq!(merged.data_slot(), 7);
    }

    #[test]
    fn clear_preserves_slot_ownership() {
        let d = SlotDesc::empty(12).with_digest(0xBEEF).with_epoch_bit(1);
        let c = d.cleared();
        assert!(!c.is_occupied());
        assert_eq!(c.data_slot(), 12);
        assert_eq!(c.epoch_bit(), 1);
    }
}

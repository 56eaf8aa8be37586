//! Page-table entry encoding.
//!
//! A [`Pte`] is a 64-bit word: the low 10 bits are flags, the top 54 bits
//! hold either a physical frame number (when `V` is set) or a
//! [`SwapSlotId`](super::SwapSlotId) (when `S` is set). `V` and `S` are
//! always mutually exclusive -- [`Pte::new_resident`] and
//! [`Pte::new_swapped`] are the only two ways to build a non-empty entry,
//! and neither can produce a word with both bits set.

use bitflags::bitflags;

use super::{FrameNumber, SwapSlotId};

bitflags! {
    /// Low-bit flags of a [`Pte`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u64 {
        /// Mapping is resident; the PPN field holds a physical frame number.
        const VALID    = 1 << 0;
        /// Mapping is swapped out; the PPN field holds a swap slot id.
        const SWAPPED  = 1 << 1;
        /// Accessed bit. Set by hardware on any translation through this
        /// PTE; cleared only by the clock algorithm.
        const ACCESSED = 1 << 2;
        const USER     = 1 << 3;
        const READ     = 1 << 4;
        const WRITE    = 1 << 5;
        const EXEC     = 1 << 6;
    }
}

const PPN_SHIFT: u32 = 10;
const PPN_MASK: u64 = !((1u64 << PPN_SHIFT) - 1);
const FLAG_MASK: u64 = (1u64 << PPN_SHIFT) - 1;

/// A 64-bit page-table entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct Pte(u64);

impl Pte {
    /// An entry with no flags set and a zeroed PPN field.
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn raw(self) -> u64 {
        self.0
    }

    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn flags(self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & FLAG_MASK)
    }

    pub fn is_valid(self) -> bool {
        self.flags().contains(PteFlags::VALID)
    }

    pub fn is_swapped(self) -> bool {
        self.flags().contains(PteFlags::SWAPPED)
    }

    pub fn is_accessed(self) -> bool {
        self.flags().contains(PteFlags::ACCESSED)
    }

    /// Build a resident entry pointing at `frame`, carrying `perms`.
    ///
    /// `perms` must not include `VALID`, `SWAPPED`, or `ACCESSED` -- those
    /// bits are managed by this constructor and the clock algorithm.
    pub fn new_resident(frame: FrameNumber, perms: PteFlags) -> Self {
        let perms = perms - (PteFlags::VALID | PteFlags::SWAPPED | PteFlags::ACCESSED);
        let ppn = (frame.0 as u64) << PPN_SHIFT;
        Self(ppn | perms.bits() | PteFlags::VALID.bits())
    }

    /// Build a swapped-out entry pointing at `slot`, carrying `perms`.
    pub fn new_swapped(slot: SwapSlotId, perms: PteFlags) -> Self {
        let perms = perms - (PteFlags::VALID | PteFlags::SWAPPED | PteFlags::ACCESSED);
        let ppn = (slot.0 as u64) << PPN_SHIFT;
        Self(ppn | perms.bits() | PteFlags::SWAPPED.bits())
    }

    /// The permission/ownership flags, stripped of `V`/`S`/`A`.
    pub fn permissions(self) -> PteFlags {
        self.flags() - (PteFlags::VALID | PteFlags::SWAPPED | PteFlags::ACCESSED)
    }

    /// Interpret the PPN field as a frame number. Caller must have checked
    /// [`Self::is_valid`].
    pub fn frame(self) -> FrameNumber {
        FrameNumber::new(((self.0 & PPN_MASK) >> PPN_SHIFT) as u32)
    }

    /// Interpret the PPN field as a swap slot id. Caller must have checked
    /// [`Self::is_swapped`].
    pub fn swap_slot(self) -> SwapSlotId {
        SwapSlotId::new(((self.0 & PPN_MASK) >> PPN_SHIFT) as u32)
    }

    /// Clear the accessed bit, giving the entry a second chance under the
    /// clock algorithm.
    pub fn clear_accessed(self) -> Self {
        Self(self.0 & !PteFlags::ACCESSED.bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resident_roundtrip_preserves_frame_and_perms() {
        let perms = PteFlags::USER | PteFlags::READ | PteFlags::WRITE;
        let pte = Pte::new_resident(FrameNumber::new(42), perms);
        assert!(pte.is_valid());
        assert!(!pte.is_swapped());
        assert_eq!(pte.frame(), FrameNumber::new(42));
        assert_eq!(pte.permissions(), perms);
    }

    #[test]
    fn swapped_roundtrip_preserves_slot_and_perms() {
        let perms = PteFlags::USER | PteFlags::READ | PteFlags::WRITE | PteFlags::EXEC;
        let pte = Pte::new_swapped(SwapSlotId::new(7), perms);
        assert!(pte.is_swapped());
        assert!(!pte.is_valid());
        assert_eq!(pte.swap_slot(), SwapSlotId::new(7));
        assert_eq!(pte.permissions(), perms);
    }

    #[test]
    fn valid_and_swapped_are_never_both_set() {
        let resident = Pte::new_resident(FrameNumber::new(1), PteFlags::empty());
        let swapped = Pte::new_swapped(SwapSlotId::new(1), PteFlags::empty());
        assert!(!(resident.is_valid() && resident.is_swapped()));
        assert!(!(swapped.is_valid() && swapped.is_swapped()));
    }

    #[test]
    fn clear_accessed_preserves_other_bits() {
        let pte = Pte::new_resident(FrameNumber::new(3), PteFlags::USER | PteFlags::READ);
        // Simulate hardware setting the accessed bit on a translation.
        let pte = Pte::from_raw(pte.raw() | PteFlags::ACCESSED.bits());
        assert!(pte.is_accessed());
        let cleared = pte.clear_accessed();
        assert!(!cleared.is_accessed());
        assert!(cleared.is_valid());
        assert_eq!(cleared.frame(), FrameNumber::new(3));
    }
}

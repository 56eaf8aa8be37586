//! The page-table boundary.
//!
//! The architecture's real page tables are an external collaborator: this
//! module only states the contract the paging core needs from them --
//! `walk` a virtual address down to its PTE, and flush the TLB after
//! rewriting one. How a concrete implementation builds and walks its
//! multi-level tables is out of scope here.

use core::sync::atomic::{AtomicU64, Ordering};

use super::{pte::Pte, PageTableRoot, VirtualAddress};

/// A located, still-mapped-in-memory PTE slot.
///
/// Wraps a raw pointer to the 64-bit word so the paging core can do the
/// atomic load/store the concurrency model requires (see the module docs
/// on why no page-table lock is held during eviction) without the walker
/// needing to expose its internal node types.
///
/// # Safety invariant
/// The pointer must stay valid -- pointing at live, properly aligned
/// storage for a `u64` -- for as long as any `PteSlot` built from it is in
/// use. A [`PageTableWalker`] implementation upholds this by never
/// freeing or moving a page-table page while the kernel might still hold
/// a `PteSlot` into it (page tables are torn down only from `on_exit`,
/// after every PTE has already been visited and released).
pub struct PteSlot {
    ptr: *const AtomicU64,
}

impl PteSlot {
    /// # Safety
    /// `ptr` must satisfy the safety invariant documented on [`PteSlot`].
    pub unsafe fn from_raw(ptr: *const AtomicU64) -> Self {
        Self { ptr }
    }

    pub fn load(&self) -> Pte {
        // SAFETY: valid per the construction invariant.
        Pte::from_raw(unsafe { &*self.ptr }.load(Ordering::SeqCst))
    }

    pub fn store(&self, pte: Pte) {
        // SAFETY: valid per the construction invariant.
        unsafe { &*self.ptr }.store(pte.raw(), Ordering::SeqCst);
    }
}

// SAFETY: a PteSlot only ever points into kernel-owned page-table memory
// that the walker guarantees stays live; transferring the pointer across
// threads carries no more risk than sharing the AtomicU64 it addresses.
unsafe impl Send for PteSlot {}

/// External dependency: locate the PTE governing `vaddr` under `root`.
pub trait PageTableWalker: Send + Sync {
    /// Walk `root`'s page table to the leaf PTE for `vaddr`.
    ///
    /// If `alloc_intermediates` is true and an intermediate level is
    /// missing, the walker allocates it and returns a slot for a freshly
    /// zeroed (i.e. not-present) leaf entry. If false, a missing
    /// intermediate yields `None`.
    fn walk(&self, root: PageTableRoot, vaddr: VirtualAddress, alloc_intermediates: bool) -> Option<PteSlot>;
}

/// Flush stale translations for `vaddr` from the TLB.
///
/// A full flush is acceptable for this teaching kernel; see
/// [`crate::arch::tlb`] for the per-architecture instruction.
pub fn flush(vaddr: VirtualAddress) {
    crate::arch::tlb::flush(vaddr);
}

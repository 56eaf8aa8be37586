//! Test doubles for the external collaborators the paging core talks to:
//! a block device and a page-table walker. Neither ships outside
//! `#[cfg(test)]` -- production kernels plug in the real disk driver and
//! the real architecture's page tables.

extern crate alloc;

use alloc::{boxed::Box, collections::BTreeMap, vec, vec::Vec};
use core::sync::atomic::{AtomicU64, Ordering};

use spin::Mutex;

use crate::{
    config::BLOCK_SIZE,
    error::KernelError,
    mm::{
        page_table::{PageTableWalker, PteSlot},
        pte::Pte,
        PageTableRoot, VirtualAddress,
    },
    mm::swap::BlockDevice,
};

/// An in-memory stand-in for a disk, sized in whole blocks.
pub struct FakeBlockDevice {
    blocks: Mutex<Vec<u8>>,
}

impl FakeBlockDevice {
    pub fn new(block_count: usize) -> Self {
        Self {
            blocks: Mutex::new(vec![0u8; block_count * BLOCK_SIZE]),
        }
    }
}

impl BlockDevice for FakeBlockDevice {
    fn read_blocks(&self, first_block: u64, buf: &mut [u8]) -> Result<(), KernelError> {
        let start = first_block as usize * BLOCK_SIZE;
        let end = start + buf.len();
        let storage = self.blocks.lock();
        if end > storage.len() {
            return Err(KernelError::InvalidArgument {
                name: "first_block",
                value: "out of range",
            });
        }
        buf.copy_from_slice(&storage[start..end]);
        Ok(())
    }

    fn write_blocks(&self, first_block: u64, buf: &[u8]) -> Result<(), KernelError> {
        let start = first_block as usize * BLOCK_SIZE;
        let end = start + buf.len();
        let mut storage = self.blocks.lock();
        if end > storage.len() {
            return Err(KernelError::InvalidArgument {
                name: "first_block",
                value: "out of range",
            });
        }
        storage[start..end].copy_from_slice(buf);
        Ok(())
    }
}

/// A flat, single-level page table keyed by `(root, vaddr)`.
///
/// Stands in for the real architecture's multi-level walk: every entry is
/// boxed so its address is stable for the lifetime of the map, which is
/// what lets [`PteSlot`] hand back a raw pointer a caller can load/store
/// through without re-walking.
pub struct FakePageTable {
    entries: Mutex<BTreeMap<(PageTableRoot, VirtualAddress), Box<AtomicU64>>>,
}

impl FakePageTable {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    /// Directly install a PTE, as if a prior `map` call had run.
    pub fn install(&self, root: PageTableRoot, vaddr: VirtualAddress, pte: Pte) {
        let mut entries = self.entries.lock();
        entries
            .entry((root, vaddr))
            .or_insert_with(|| Box::new(AtomicU64::new(0)))
            .store(pte.raw(), Ordering::SeqCst);
    }

    /// Read back the current value without going through a [`PteSlot`].
    pub fn peek(&self, root: PageTableRoot, vaddr: VirtualAddress) -> Option<Pte> {
        let entries = self.entries.lock();
        entries
            .get(&(root, vaddr))
            .map(|slot| Pte::from_raw(slot.load(Ordering::SeqCst)))
    }
}

impl Default for FakePageTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTableWalker for FakePageTable {
    fn walk(
        &self,
        root: PageTableRoot,
        vaddr: VirtualAddress,
        alloc_intermediates: bool,
    ) -> Option<PteSlot> {
        let mut entries = self.entries.lock();
        let key = (root, vaddr);
        if !entries.contains_key(&key) {
            if !alloc_intermediates {
                return None;
            }
            entries.insert(key, Box::new(AtomicU64::new(0)));
        }
        let ptr: *const AtomicU64 = entries.get(&key).unwrap().as_ref();
        // SAFETY: the Box backing `ptr` lives inside `self.entries` and is
        // never removed or reallocated for the lifetime of `self`, so the
        // pointer stays valid for as long as the returned PteSlot is used.
        Some(unsafe { PteSlot::from_raw(ptr) })
    }
}

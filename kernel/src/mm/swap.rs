//! Swap area: a bitmap-managed backing store for evicted frames.
//!
//! The bitmap and the read/write counters are guarded by one spinlock.
//! Actual device I/O happens with the lock dropped -- `write_blocks` and
//! `read_blocks` on [`BlockDevice`] may suspend the calling thread, and no
//! spinlock may be held across a suspension point.

#[cfg(test)]
extern crate alloc;

use spin::Mutex;

use crate::{
    config::{BLOCKS_PER_PAGE, PAGE_SIZE, SWAP_BITMAP_BYTES, SWAP_MAX},
    error::KernelError,
    mm::SwapSlotId,
    sync::once_lock::GlobalState,
};

/// Synchronous block I/O, consumed from the disk driver layer.
///
/// Each call transfers `buf.len()` bytes starting at `first_block`; from
/// the caller's point of view the transfer completes before the call
/// returns, though the implementation is free to put the calling thread to
/// sleep while it waits on the device.
pub trait BlockDevice: Send + Sync {
    fn read_blocks(&self, first_block: u64, buf: &mut [u8]) -> Result<(), KernelError>;
    fn write_blocks(&self, first_block: u64, buf: &[u8]) -> Result<(), KernelError>;
}

struct SwapStoreInner {
    bitmap: [u8; SWAP_BITMAP_BYTES],
    reads: u64,
    writes: u64,
}

impl SwapStoreInner {
    const fn new() -> Self {
        Self {
            bitmap: [0u8; SWAP_BITMAP_BYTES],
            reads: 0,
            writes: 0,
        }
    }

    fn is_set(&self, slot: SwapSlotId) -> bool {
        let idx = slot.index();
        self.bitmap[idx / 8] & (1 << (idx % 8)) != 0
    }

    fn set(&mut self, slot: SwapSlotId) {
        let idx = slot.index();
        self.bitmap[idx / 8] |= 1 << (idx % 8);
    }

    fn clear(&mut self, slot: SwapSlotId) {
        let idx = slot.index();
        self.bitmap[idx / 8] &= !(1 << (idx % 8));
    }

    fn allocate_slot(&mut self) -> Option<SwapSlotId> {
        for idx in 0..SWAP_MAX {
            let byte = idx / 8;
            let bit = idx % 8;
            if self.bitmap[byte] & (1 << bit) == 0 {
                self.bitmap[byte] |= 1 << bit;
                return Some(SwapSlotId::new(idx as u32));
            }
        }
        None
    }
}

static SWAP_STORE: GlobalState<Mutex<SwapStoreInner>> = GlobalState::new();

/// Initialize the swap store with an empty bitmap.
pub fn init() {
    let _ = SWAP_STORE.init(Mutex::new(SwapStoreInner::new()));
}

/// Force-reinitialize with an empty bitmap, for other modules' test
/// harnesses that need a clean instance per test case.
#[cfg(test)]
pub fn reset_for_test() {
    SWAP_STORE.reset(Mutex::new(SwapStoreInner::new()));
}

/// Allocate a free swap slot, marking it in-use.
///
/// Returns `None` when the backing store is full (`OutOfSwap`).
pub fn allocate_slot() -> Option<SwapSlotId> {
    SWAP_STORE.with_mut(|s| s.lock().allocate_slot()).flatten()
}

/// Release a previously allocated swap slot.
///
/// # Panics
/// Panics if the slot was not marked in-use: a double release indicates a
/// refcounting bug in the caller (see `on_fork_pte`'s eager-copy rule,
/// which keeps every swapped PTE's slot single-owner).
pub fn release_slot(slot: SwapSlotId) {
    SWAP_STORE.with_mut(|s| {
        let mut inner = s.lock();
        assert!(
            inner.is_set(slot),
            "release_slot: slot {} was not in use",
            slot.0
        );
        inner.clear(slot);
    });
}

/// Write a page-sized payload to `slot` via `device`.
///
/// The swap spinlock is not held during the device transfer.
pub fn write(device: &dyn BlockDevice, slot: SwapSlotId, page: &[u8; PAGE_SIZE]) -> Result<(), KernelError> {
    let first_block = slot.index() as u64 * BLOCKS_PER_PAGE as u64;
    device.write_blocks(first_block, page)?;
    SWAP_STORE.with_mut(|s| s.lock().writes += 1);
    Ok(())
}

/// Read a page-sized payload from `slot` via `device`.
pub fn read(device: &dyn BlockDevice, slot: SwapSlotId, page: &mut [u8; PAGE_SIZE]) -> Result<(), KernelError> {
    let first_block = slot.index() as u64 * BLOCKS_PER_PAGE as u64;
    device.read_blocks(first_block, page)?;
    SWAP_STORE.with_mut(|s| s.lock().reads += 1);
    Ok(())
}

/// `(reads, writes)` monotonically increasing transfer counters.
pub fn stats() -> (u64, u64) {
    SWAP_STORE
        .with(|s| {
            let inner = s.lock();
            (inner.reads, inner.writes)
        })
        .unwrap_or((0, 0))
}

/// `true` if `slot`'s bit is currently set in the bitmap. Exposed for the
/// debug validator described in the testable-invariants checklist.
pub fn slot_is_allocated(slot: SwapSlotId) -> bool {
    SWAP_STORE.with(|s| s.lock().is_set(slot)).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::testutil::FakeBlockDevice;

    fn fresh() {
        reset_for_test();
    }

    #[test]
    fn allocate_then_release_frees_the_bit() {
        fresh();
        let slot = allocate_slot().expect("slot available");
        assert!(slot_is_allocated(slot));
        release_slot(slot);
        assert!(!slot_is_allocated(slot));
    }

    #[test]
    fn allocate_exhausts_and_reports_none() {
        fresh();
        let mut slots = alloc::vec::Vec::new();
        for _ in 0..SWAP_MAX {
            slots.push(allocate_slot().expect("slot available"));
        }
        assert!(allocate_slot().is_none());
        release_slot(slots.pop().unwrap());
        assert!(allocate_slot().is_some());
    }

    #[test]
    #[should_panic(expected = "was not in use")]
    fn double_release_panics() {
        fresh();
        let slot = allocate_slot().unwrap();
        release_slot(slot);
        release_slot(slot);
    }

    #[test]
    fn write_then_read_roundtrips_through_device_and_bumps_stats() {
        fresh();
        let device = FakeBlockDevice::new(SWAP_MAX * BLOCKS_PER_PAGE);
        let slot = allocate_slot().unwrap();
        let mut page = [0xABu8; PAGE_SIZE];
        write(&device, slot, &page).unwrap();

        let mut readback = [0u8; PAGE_SIZE];
        read(&device, slot, &mut readback).unwrap();
        assert_eq!(readback, page);

        let (reads, writes) = stats();
        assert_eq!(reads, 1);
        assert_eq!(writes, 1);

        page.fill(0);
        let _ = page;
    }
}

//! Eviction orchestration and the `fork`/`exit`/`unmap` integration
//! hooks the process layer calls into.
//!
//! This is where the allocator, the LRU ring, and the swap store meet.
//! [`evict_one`]'s ordering -- detach from the LRU, release the LRU
//! lock, do I/O, then rewrite the PTE -- is load-bearing: releasing the
//! lock before the (possibly suspending) write lets the scheduler put
//! this thread to sleep, and detaching the victim under the LRU lock
//! before that point stops a second CPU running `evict_one`
//! concurrently from picking the same frame.
//!
//! The real process layer knows which virtual addresses a page table
//! has mapped (it owns the VMA bookkeeping); `on_exit` takes that set
//! as an iterator rather than walking the tree itself, since tree
//! enumeration belongs to the page-table collaborator, not this core.

use crate::{
    config::PAGE_SIZE,
    error::FaultError,
    mm::{
        frame_allocator, lru,
        page_table::{self, PageTableWalker},
        pte::Pte,
        swap::{self, BlockDevice},
        FrameNumber, PageTableRoot, VirtualAddress,
    },
};

/// Reclaim one frame by evicting the clock algorithm's chosen victim to
/// swap. Returns `None` if there is nothing left to evict or the swap
/// area is full.
pub fn evict_one(walker: &dyn PageTableWalker, device: &dyn BlockDevice) -> Option<FrameNumber> {
    let (frame, page_table, vaddr) = lru::select_and_detach_victim(walker)?;

    let Some(slot) = swap::allocate_slot() else {
        lru::insert_at_head(frame, page_table, vaddr);
        return None;
    };

    // SAFETY: `frame` was just detached from the LRU ring and its PTE
    // has not yet been rewritten, so no other code path can reach it
    // through either the ring or a fresh translation until this
    // function publishes the swapped PTE below.
    let page = unsafe { &*frame_allocator::frame_bytes_mut(frame) };
    if swap::write(device, slot, page).is_err() {
        // IoError is fatal for this teaching design; see error.rs.
        panic!("evict_one: swap write failed");
    }

    let pte_slot = walker
        .walk(page_table, vaddr, false)
        .expect("evict_one: PTE vanished during eviction");
    let old = pte_slot.load();
    pte_slot.store(Pte::new_swapped(slot, old.permissions()));
    page_table::flush(vaddr);

    Some(frame)
}

/// Service a page fault on a swapped-out mapping.
///
/// `alloc()` may itself recurse into `evict_one` once; that recursion
/// bottoms out because each eviction strictly reduces the number of
/// resident pages.
pub fn handle_page_fault(
    walker: &dyn PageTableWalker,
    device: &dyn BlockDevice,
    page_table: PageTableRoot,
    faulting_vaddr: VirtualAddress,
) -> Result<(), FaultError> {
    let pte_slot = walker
        .walk(page_table, faulting_vaddr, false)
        .ok_or(FaultError::NotSwapped)?;
    let pte = pte_slot.load();
    if !pte.is_swapped() {
        return Err(FaultError::NotSwapped);
    }
    let slot = pte.swap_slot();

    let frame = frame_allocator::alloc(walker, device).ok_or(FaultError::OutOfFrames)?;

    // SAFETY: `frame` was just allocated and is not yet reachable
    // through any PTE, so exclusive access holds until `pte_slot.store`
    // below publishes it.
    let page = unsafe { &mut *frame_allocator::frame_bytes_mut(frame) };
    if let Err(e) = swap::read(device, slot, page) {
        frame_allocator::free(frame);
        return Err(FaultError::from(e));
    }

    pte_slot.store(Pte::new_resident(frame, pte.permissions()));
    // Per the spec's single-owner rule for swap slots: a forked child
    // copies a parent's swapped slot eagerly at fork time (on_fork_pte),
    // so by the time a fault reaches here the slot has exactly one
    // reference and releasing it is always safe.
    swap::release_slot(slot);
    page_table::flush(faulting_vaddr);
    lru::insert(frame, page_table, faulting_vaddr);
    Ok(())
}

/// Call after establishing a new resident user mapping.
pub fn on_map(frame: FrameNumber, page_table: PageTableRoot, vaddr: VirtualAddress) {
    lru::insert(frame, page_table, vaddr);
}

/// Tear down one mapping: reclaim whatever resource backs it and clear
/// the PTE. A no-op if nothing is mapped at `vaddr`.
pub fn on_unmap(walker: &dyn PageTableWalker, page_table: PageTableRoot, vaddr: VirtualAddress) {
    let Some(pte_slot) = walker.walk(page_table, vaddr, false) else {
        return;
    };
    let pte = pte_slot.load();
    if pte.is_valid() {
        let frame = pte.frame();
        lru::remove(frame);
        frame_allocator::free(frame);
    } else if pte.is_swapped() {
        swap::release_slot(pte.swap_slot());
    } else {
        return;
    }
    pte_slot.store(Pte::empty());
    page_table::flush(vaddr);
}

/// Build the child's PTE for a `fork`ed mapping.
///
/// There is no copy-on-write sharing in this design: a resident page is
/// physically duplicated into a fresh frame, and a swapped page's
/// backing slot is duplicated into a fresh slot, each immediately. This
/// keeps every swap slot single-owner (invariant #4) without a
/// reference count.
pub fn on_fork_pte(src: Pte, walker: &dyn PageTableWalker, device: &dyn BlockDevice) -> Pte {
    if src.is_valid() {
        let parent_frame = src.frame();
        let child_frame = frame_allocator::alloc(walker, device).expect("on_fork_pte: out of frames");
        // SAFETY: the parent frame is resident and this is a read-only
        // snapshot of its contents; the child frame was just allocated
        // and is reachable only through this function until the caller
        // installs the returned PTE.
        unsafe {
            let src_bytes = &*frame_allocator::frame_bytes_mut(parent_frame);
            let dst_bytes = &mut *frame_allocator::frame_bytes_mut(child_frame);
            dst_bytes.copy_from_slice(src_bytes);
        }
        Pte::new_resident(child_frame, src.permissions())
    } else if src.is_swapped() {
        let parent_slot = src.swap_slot();
        let child_slot = swap::allocate_slot().expect("on_fork_pte: out of swap");
        let mut scratch = [0u8; PAGE_SIZE];
        swap::read(device, parent_slot, &mut scratch).expect("on_fork_pte: swap read failed");
        swap::write(device, child_slot, &scratch).expect("on_fork_pte: swap write failed");
        Pte::new_swapped(child_slot, src.permissions())
    } else {
        src
    }
}

/// Release every resource a process held, across every virtual address
/// it had mapped.
pub fn on_exit(
    walker: &dyn PageTableWalker,
    page_table: PageTableRoot,
    mapped_vaddrs: impl Iterator<Item = VirtualAddress>,
) {
    for vaddr in mapped_vaddrs {
        on_unmap(walker, page_table, vaddr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::{
        pte::PteFlags,
        testutil::{FakeBlockDevice, FakePageTable},
    };
    use crate::config::{BLOCKS_PER_PAGE, SWAP_MAX};

    extern crate alloc;

    fn fresh_frame_allocator(total_frames: u32) {
        // Route every test through a dedicated heap-backed region so
        // frame_bytes_mut/alloc/free all see consistent state, mirroring
        // frame_allocator's own test harness but exercised through the
        // public global-singleton API this module actually calls.
        let backing = alloc::vec![0u8; total_frames as usize * PAGE_SIZE].leak();
        // SAFETY: `backing` is leaked for the test's duration and large
        // enough for `total_frames`; kernel_end of 0 reserves nothing.
        unsafe {
            frame_allocator::reset_for_test(backing.as_mut_ptr(), FrameNumber::new(0), total_frames);
        }
        lru::reset_for_test();
        swap::reset_for_test();
    }

    #[test]
    fn evict_then_fault_round_trips_page_contents() {
        fresh_frame_allocator(4);

        let walker = FakePageTable::new();
        let device = FakeBlockDevice::new(SWAP_MAX * BLOCKS_PER_PAGE);
        let pt = PageTableRoot(1);
        let vaddr = VirtualAddress::new(0x2000);

        let frame = frame_allocator::alloc(&walker, &device).unwrap();
        // SAFETY: freshly allocated frame, exclusively owned here.
        unsafe {
            (*frame_allocator::frame_bytes_mut(frame)).fill(0xAB);
        }
        let pte = Pte::new_resident(frame, PteFlags::USER | PteFlags::READ | PteFlags::WRITE);
        walker.install(pt, vaddr, pte);
        on_map(frame, pt, vaddr);

        let evicted = evict_one(&walker, &device).expect("a victim was available");
        assert_eq!(evicted, frame);
        assert!(walker.peek(pt, vaddr).unwrap().is_swapped());

        handle_page_fault(&walker, &device, pt, vaddr).expect("swap-in succeeds");
        let new_pte = walker.peek(pt, vaddr).unwrap();
        assert!(new_pte.is_valid());

        // SAFETY: the frame the fault handler just installed is not
        // concurrently touched by anything else in this test.
        let contents = unsafe { &*frame_allocator::frame_bytes_mut(new_pte.frame()) };
        assert!(contents.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn on_unmap_releases_a_resident_frame_back_to_the_allocator() {
        fresh_frame_allocator(4);

        let walker = FakePageTable::new();
        let device = FakeBlockDevice::new(SWAP_MAX * BLOCKS_PER_PAGE);
        let pt = PageTableRoot(1);
        let vaddr = VirtualAddress::new(0x1000);

        let before = frame_allocator::free_count();
        let frame = frame_allocator::alloc(&walker, &device).unwrap();
        let pte = Pte::new_resident(frame, PteFlags::USER | PteFlags::READ);
        walker.install(pt, vaddr, pte);
        on_map(frame, pt, vaddr);

        on_unmap(&walker, pt, vaddr);
        assert_eq!(frame_allocator::free_count(), before);
        assert!(!walker.peek(pt, vaddr).unwrap().is_valid());
    }

    #[test]
    fn fork_of_a_resident_pte_copies_into_a_distinct_frame() {
        fresh_frame_allocator(4);

        let walker = FakePageTable::new();
        let device = FakeBlockDevice::new(SWAP_MAX * BLOCKS_PER_PAGE);
        let frame = frame_allocator::alloc(&walker, &device).unwrap();
        // SAFETY: freshly allocated, exclusively owned here.
        unsafe {
            (*frame_allocator::frame_bytes_mut(frame)).fill(0xAA);
        }
        let parent_pte = Pte::new_resident(frame, PteFlags::USER | PteFlags::READ);

        let child_pte = on_fork_pte(parent_pte, &walker, &device);
        assert!(child_pte.is_valid());
        assert_ne!(child_pte.frame(), frame);
        // SAFETY: child frame was just written by on_fork_pte and is not
        // touched by anything else in this test.
        let child_bytes = unsafe { &*frame_allocator::frame_bytes_mut(child_pte.frame()) };
        assert!(child_bytes.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn fork_of_a_swapped_pte_duplicates_into_a_distinct_slot() {
        fresh_frame_allocator(4);

        let walker = FakePageTable::new();
        let device = FakeBlockDevice::new(SWAP_MAX * BLOCKS_PER_PAGE);
        let parent_slot = swap::allocate_slot().unwrap();
        let payload = [0x42u8; PAGE_SIZE];
        swap::write(&device, parent_slot, &payload).unwrap();
        let parent_pte = Pte::new_swapped(parent_slot, PteFlags::USER | PteFlags::READ);

        let child_pte = on_fork_pte(parent_pte, &walker, &device);
        assert!(child_pte.is_swapped());
        assert_ne!(child_pte.swap_slot(), parent_slot);

        let mut readback = [0u8; PAGE_SIZE];
        swap::read(&device, child_pte.swap_slot(), &mut readback).unwrap();
        assert_eq!(readback, payload);
    }

    #[test]
    fn exit_reclaims_every_mapped_address() {
        fresh_frame_allocator(4);

        let walker = FakePageTable::new();
        let device = FakeBlockDevice::new(SWAP_MAX * BLOCKS_PER_PAGE);
        let pt = PageTableRoot(7);
        let before = frame_allocator::free_count();

        let mut vaddrs = alloc::vec::Vec::new();
        for i in 0..2u64 {
            let vaddr = VirtualAddress::new(i * 0x1000);
            let frame = frame_allocator::alloc(&walker, &device).unwrap();
            walker.install(pt, vaddr, Pte::new_resident(frame, PteFlags::USER | PteFlags::READ));
            on_map(frame, pt, vaddr);
            vaddrs.push(vaddr);
        }

        on_exit(&walker, pt, vaddrs.into_iter());
        assert_eq!(frame_allocator::free_count(), before);
    }
}

//! Physical frame allocator.
//!
//! A singly-linked LIFO free list whose link words live inside the free
//! frames themselves -- zero per-frame bookkeeping overhead. The list is
//! threaded through a kernel-virtual alias of physical memory supplied at
//! [`init`]; on bare metal that's the direct-mapped view of RAM, in tests
//! it's a heap buffer standing in for RAM.

extern crate alloc;

use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use crate::{
    config::{FRAME_COUNT, PAGE_SIZE},
    error::KernelError,
    mm::{page_table::PageTableWalker, swap::BlockDevice, FrameNumber},
    sync::once_lock::GlobalState,
};

/// Byte pattern written into a frame when it is freed, to surface
/// dangling reads through a stale pointer.
const FREE_POISON: u8 = 0x01;

/// Byte pattern written into a frame when it is allocated, so a caller
/// that forgets to initialize its contents notices garbage rather than
/// accidentally-zeroed memory.
const ALLOC_POISON: u8 = 0x05;

struct FreeListAllocator {
    base: *mut u8,
    kernel_end: FrameNumber,
    free_head: Option<FrameNumber>,
    free_count: usize,
}

// SAFETY: `base` is a stable pointer into a region the caller of `init`
// guarantees stays valid and exclusively owned by this allocator for the
// kernel's lifetime; all access to the frames it addresses goes through
// the allocator's own lock.
unsafe impl Send for FreeListAllocator {}

impl FreeListAllocator {
    fn frame_ptr(&self, frame: FrameNumber) -> *mut u8 {
        // SAFETY: caller-established invariant that `base` spans
        // `FRAME_COUNT` pages; `frame.index() < FRAME_COUNT` is checked by
        // every entry point before this is called.
        unsafe { self.base.add(frame.index() * PAGE_SIZE) }
    }

    fn free(&mut self, frame: FrameNumber) {
        assert!(
            frame.index() < FRAME_COUNT,
            "free: frame {} out of range",
            frame.0
        );
        assert!(
            frame >= self.kernel_end,
            "free: frame {} is below kernel_end",
            frame.0
        );

        let ptr = self.frame_ptr(frame);
        // SAFETY: frame is in range and owned by the allocator; poisoning
        // then threading the link word through the first 8 bytes is safe
        // because a frame being freed is, by the caller's contract, no
        // longer referenced by anyone.
        unsafe {
            core::ptr::write_bytes(ptr, FREE_POISON, PAGE_SIZE);
            let link = match self.free_head {
                Some(next) => next.0 as u64,
                None => u64::MAX,
            };
            (ptr as *mut u64).write(link);
        }
        self.free_head = Some(frame);
        self.free_count += 1;
    }

    fn alloc_from_list(&mut self) -> Option<FrameNumber> {
        let frame = self.free_head?;
        let ptr = self.frame_ptr(frame);
        // SAFETY: `frame` was pushed by `free`, which wrote a valid link
        // word (or the `u64::MAX` "no next" sentinel) into its first 8
        // bytes.
        let link = unsafe { (ptr as *const u64).read() };
        self.free_head = if link == u64::MAX {
            None
        } else {
            Some(FrameNumber::new(link as u32))
        };
        self.free_count -= 1;

        // SAFETY: frame is a valid, exclusively-owned frame about to be
        // handed to a caller; overwriting it with the allocation poison
        // pattern is the documented contract.
        unsafe {
            core::ptr::write_bytes(ptr, ALLOC_POISON, PAGE_SIZE);
        }
        Some(frame)
    }

    fn free_range(&mut self, start: FrameNumber, end: FrameNumber) {
        let mut f = start.0;
        while f < end.0 {
            self.free(FrameNumber::new(f));
            f += 1;
        }
    }
}

static ALLOCATOR: GlobalState<Mutex<FreeListAllocator>> = GlobalState::new();
static FREE_COUNT_HINT: AtomicUsize = AtomicUsize::new(0);

fn build(phys_mem_base: *mut u8, kernel_end: FrameNumber, total_frames: u32) -> FreeListAllocator {
    let mut allocator = FreeListAllocator {
        base: phys_mem_base,
        kernel_end,
        free_head: None,
        free_count: 0,
    };
    allocator.free_range(kernel_end, FrameNumber::new(total_frames));
    allocator
}

/// Initialize the allocator and hand every frame from `kernel_end` to
/// [`FRAME_COUNT`] to the free list.
///
/// # Safety
/// See [`crate::mm::init`].
pub unsafe fn init(phys_mem_base: *mut u8, kernel_end: FrameNumber) {
    let allocator = build(phys_mem_base, kernel_end, FRAME_COUNT as u32);
    FREE_COUNT_HINT.store(allocator.free_count, Ordering::Relaxed);
    let _ = ALLOCATOR.init(Mutex::new(allocator));
}

/// Force-reinitialize the allocator over a caller-sized region, for use
/// by other modules' test harnesses (e.g. `paging_core`'s), which need a
/// small, independent frame pool per test case rather than the full
/// [`FRAME_COUNT`]-sized production pool.
///
/// # Safety
/// `phys_mem_base` must point at `total_frames * PAGE_SIZE` bytes of
/// memory valid for the duration of the test.
#[cfg(test)]
pub unsafe fn reset_for_test(phys_mem_base: *mut u8, kernel_end: FrameNumber, total_frames: u32) {
    let allocator = build(phys_mem_base, kernel_end, total_frames);
    FREE_COUNT_HINT.store(allocator.free_count, Ordering::Relaxed);
    ALLOCATOR.reset(Mutex::new(allocator));
}

/// Allocate a frame, poisoned with [`ALLOC_POISON`].
///
/// Falls back to [`crate::mm::paging_core::evict_one`] when the free list
/// is empty; if eviction also fails this returns `None` (true OOM) rather
/// than panicking. `walker`/`device` are forwarded to `evict_one` untouched
/// -- they are only ever consulted on that fallback path.
pub fn alloc(walker: &dyn PageTableWalker, device: &dyn BlockDevice) -> Option<FrameNumber> {
    let from_list = ALLOCATOR.with_mut(|a| {
        let mut a = a.lock();
        let frame = a.alloc_from_list();
        FREE_COUNT_HINT.store(a.free_count, Ordering::Relaxed);
        frame
    });

    match from_list.flatten() {
        Some(frame) => Some(frame),
        None => crate::mm::paging_core::evict_one(walker, device),
    }
}

/// Return `frame` to the free list.
///
/// # Panics
/// Panics (`BadFree`) if `frame` is misaligned, below `kernel_end`, or
/// otherwise out of range -- these indicate a caller bug, per
/// [`KernelError::LegacyError`] semantics for this teaching kernel.
pub fn free(frame: FrameNumber) {
    ALLOCATOR.with_mut(|a| {
        let mut a = a.lock();
        a.free(frame);
        FREE_COUNT_HINT.store(a.free_count, Ordering::Relaxed);
    });
}

/// Bulk-free a half-open range of frames. Used once at boot.
pub fn free_range(start: FrameNumber, end: FrameNumber) {
    ALLOCATOR.with_mut(|a| {
        let mut a = a.lock();
        a.free_range(start, end);
        FREE_COUNT_HINT.store(a.free_count, Ordering::Relaxed);
    });
}

/// Current number of frames on the free list.
pub fn free_count() -> usize {
    FREE_COUNT_HINT.load(Ordering::Relaxed)
}

/// Raw access to a frame's contents, for swap I/O and eviction.
///
/// # Safety
/// Caller must ensure no other code concurrently reads or writes the same
/// frame for the duration of use, and that `frame` is currently
/// `UserResident` (about to be evicted) or otherwise exclusively owned --
/// this bypasses the allocator lock entirely, matching the spec's rule
/// that block I/O never happens with a spinlock held.
pub unsafe fn frame_bytes_mut(frame: FrameNumber) -> *mut [u8; PAGE_SIZE] {
    let base = ALLOCATOR.with(|a| a.lock().base).expect("allocator not initialized");
    // SAFETY: forwarded from this function's contract; `base` spans
    // FRAME_COUNT pages and `frame` is caller-validated to be in range.
    unsafe { base.add(frame.index() * PAGE_SIZE) as *mut [u8; PAGE_SIZE] }
}

/// Placeholder error path for callers that want a `Result` instead of
/// `Option`; `alloc` itself never distinguishes `OutOfFrames` from a
/// successfully-evicted frame at the type level, matching the contract in
/// the error-handling design.
pub fn alloc_or(
    walker: &dyn PageTableWalker,
    device: &dyn BlockDevice,
    err: KernelError,
) -> Result<FrameNumber, KernelError> {
    alloc(walker, device).ok_or(err)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an allocator over a heap-backed stand-in for physical RAM,
    /// with `kernel_end` frames reserved at the bottom.
    fn harness(total_frames: usize, kernel_end_frames: usize) -> (alloc::vec::Vec<u8>, FreeListAllocator) {
        let mut backing = alloc::vec![0u8; total_frames * PAGE_SIZE];
        let base = backing.as_mut_ptr();
        let mut a = FreeListAllocator {
            base,
            kernel_end: FrameNumber::new(kernel_end_frames as u32),
            free_head: None,
            free_count: 0,
        };
        a.free_range(
            FrameNumber::new(kernel_end_frames as u32),
            FrameNumber::new(total_frames as u32),
        );
        (backing, a)
    }

    #[test]
    fn alloc_pops_lifo_and_tracks_free_count() {
        let (_backing, mut a) = harness(4, 1);
        assert_eq!(a.free_count, 3);
        let first = a.alloc_from_list().unwrap();
        let second = a.alloc_from_list().unwrap();
        // LIFO: the most recently freed frame (highest index, freed last
        // in free_range's ascending walk) comes back first.
        assert_eq!(first, FrameNumber::new(3));
        assert_eq!(second, FrameNumber::new(2));
        assert_eq!(a.free_count, 1);
    }

    #[test]
    fn alloc_on_empty_list_returns_none() {
        let (_backing, mut a) = harness(1, 1);
        assert!(a.alloc_from_list().is_none());
    }

    #[test]
    fn free_then_alloc_returns_the_same_frame() {
        let (_backing, mut a) = harness(4, 1);
        let frame = a.alloc_from_list().unwrap();
        a.free(frame);
        assert_eq!(a.alloc_from_list(), Some(frame));
    }

    #[test]
    fn alloc_poisons_with_0x05_and_free_poisons_with_0x01() {
        let (backing, mut a) = harness(2, 1);
        let frame = a.alloc_from_list().unwrap();
        let start = frame.index() * PAGE_SIZE;
        assert!(backing[start..start + PAGE_SIZE].iter().all(|&b| b == ALLOC_POISON));

        a.free(frame);
        // The first 8 bytes now hold the free-list link word, not poison;
        // only the tail of the page is checked.
        assert!(backing[start + 8..start + PAGE_SIZE]
            .iter()
            .all(|&b| b == FREE_POISON));
    }

    #[test]
    #[should_panic(expected = "below kernel_end")]
    fn free_below_kernel_end_panics() {
        let (_backing, mut a) = harness(4, 2);
        a.free(FrameNumber::new(0));
    }

    #[test]
    fn idempotent_alloc_free_cycle_preserves_free_count() {
        let (_backing, mut a) = harness(8, 1);
        let steady_state = a.free_count;
        for _ in 0..50 {
            let frame = a.alloc_from_list().unwrap();
            a.free(frame);
        }
        assert_eq!(a.free_count, steady_state);
    }
}

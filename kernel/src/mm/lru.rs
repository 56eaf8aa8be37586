//! Clock-approximation victim selection over resident user frames.
//!
//! Resident frames form a circular doubly-linked ring, oldest at `head`.
//! [`select_and_detach_victim`] walks forward from `head`, consulting and
//! clearing each candidate's PTE `A` bit (second chance) until it finds
//! one that was already clear, detaching and returning it. The walk
//! terminates within one revolution: every non-chosen step clears an `A`
//! bit, so after at most `FRAME_COUNT` steps every entry in the ring has
//! `A` clear and the next one inspected is selected.

extern crate alloc;

use spin::Mutex;

use crate::{
    config::FRAME_COUNT,
    mm::{
        page_table::PageTableWalker, pte::PteFlags, FrameNumber, PageTableRoot, VirtualAddress,
    },
    sync::once_lock::GlobalState,
};

/// Sentinel marking a link as "not part of the ring".
const DETACHED: u32 = u32::MAX;

#[derive(Clone, Copy)]
struct FrameRecord {
    page_table: PageTableRoot,
    vaddr: VirtualAddress,
    prev: u32,
    next: u32,
}

impl FrameRecord {
    const fn detached() -> Self {
        Self {
            page_table: PageTableRoot(0),
            vaddr: VirtualAddress(0),
            prev: DETACHED,
            next: DETACHED,
        }
    }

    fn is_in_ring(&self) -> bool {
        self.next != DETACHED
    }
}

struct LruTracker {
    // A boxed slice rather than a boxed array: FRAME_COUNT can be tens of
    // thousands of entries, too large to build on the stack before moving
    // into the heap.
    records: alloc::boxed::Box<[FrameRecord]>,
    head: u32,
}

impl LruTracker {
    fn new() -> Self {
        Self {
            records: alloc::vec![FrameRecord::detached(); FRAME_COUNT].into_boxed_slice(),
            head: DETACHED,
        }
    }

    fn insert(&mut self, frame: FrameNumber, page_table: PageTableRoot, vaddr: VirtualAddress) {
        let idx = frame.index();
        assert!(
            !self.records[idx].is_in_ring(),
            "lru insert: frame {} already in the ring",
            idx
        );
        self.records[idx].page_table = page_table;
        self.records[idx].vaddr = vaddr;

        if self.head == DETACHED {
            self.records[idx].next = frame.0;
            self.records[idx].prev = frame.0;
            self.head = frame.0;
        } else {
            let head = self.head as usize;
            let tail = self.records[head].prev;
            self.records[idx].next = self.head;
            self.records[idx].prev = tail;
            self.records[tail as usize].next = frame.0;
            self.records[head].prev = frame.0;
        }
    }

    /// Re-attach a frame at the ring head (oldest candidate), used to
    /// undo a victim selection when eviction fails downstream (no swap
    /// slot available).
    fn insert_at_head(&mut self, frame: FrameNumber, page_table: PageTableRoot, vaddr: VirtualAddress) {
        self.insert(frame, page_table, vaddr);
        self.head = frame.0;
    }

    fn remove(&mut self, frame: FrameNumber) {
        let idx = frame.index();
        if !self.records[idx].is_in_ring() {
            return;
        }
        self.detach(frame);
    }

    /// Unlink `frame` from the ring. Caller has already checked it is
    /// present.
    fn detach(&mut self, frame: FrameNumber) {
        let idx = frame.index();
        let prev = self.records[idx].prev as usize;
        let next = self.records[idx].next;

        if next == frame.0 {
            // Only entry in the ring.
            self.head = DETACHED;
        } else {
            self.records[prev].next = next;
            self.records[next as usize].prev = self.records[idx].prev;
            if self.head == frame.0 {
                self.head = next;
            }
        }
        self.records[idx].prev = DETACHED;
        self.records[idx].next = DETACHED;
    }

    fn select_and_detach_victim(
        &mut self,
        walker: &dyn PageTableWalker,
    ) -> Option<(FrameNumber, PageTableRoot, VirtualAddress)> {
        if self.head == DETACHED {
            return None;
        }

        let mut candidate = self.head;
        loop {
            let idx = candidate as usize;
            let page_table = self.records[idx].page_table;
            let vaddr = self.records[idx].vaddr;

            let Some(slot) = walker.walk(page_table, vaddr, false) else {
                // Corruption tolerance: the PTE vanished out from under
                // us. Skip it rather than panicking.
                candidate = self.records[idx].next;
                if candidate == self.head {
                    return None;
                }
                continue;
            };
            let pte = slot.load();
            if !pte.is_valid() {
                candidate = self.records[idx].next;
                if candidate == self.head {
                    return None;
                }
                continue;
            }

            if pte.flags().contains(PteFlags::ACCESSED) {
                slot.store(pte.clear_accessed());
                candidate = self.records[idx].next;
                continue;
            }

            let frame = FrameNumber::new(candidate);
            self.detach(frame);
            return Some((frame, page_table, vaddr));
        }
    }
}

static LRU: GlobalState<Mutex<LruTracker>> = GlobalState::new();

pub fn init() {
    let _ = LRU.init(Mutex::new(LruTracker::new()));
}

/// Force-reinitialize the ring to empty, for other modules' test
/// harnesses that need a clean instance per test case.
#[cfg(test)]
pub fn reset_for_test() {
    LRU.reset(Mutex::new(LruTracker::new()));
}

/// Attach a newly resident frame at the back of the ring.
///
/// # Panics
/// Panics if `frame` is already in the ring.
pub fn insert(frame: FrameNumber, page_table: PageTableRoot, vaddr: VirtualAddress) {
    LRU.with_mut(|t| t.lock().insert(frame, page_table, vaddr));
}

/// Detach `frame` from the ring. A no-op if it was already detached, so
/// racing `free`/`unmap` teardown paths stay simple.
pub fn remove(frame: FrameNumber) {
    LRU.with_mut(|t| t.lock().remove(frame));
}

/// Undo a victim selection: re-attach `frame` at the ring head.
pub fn insert_at_head(frame: FrameNumber, page_table: PageTableRoot, vaddr: VirtualAddress) {
    LRU.with_mut(|t| t.lock().insert_at_head(frame, page_table, vaddr));
}

/// Run the clock algorithm and detach the chosen victim.
pub fn select_and_detach_victim(
    walker: &dyn PageTableWalker,
) -> Option<(FrameNumber, PageTableRoot, VirtualAddress)> {
    LRU.with_mut(|t| t.lock().select_and_detach_victim(walker)).flatten()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::{pte::Pte, testutil::FakePageTable};

    fn fresh() -> LruTracker {
        LruTracker::new()
    }

    #[test]
    fn insert_then_remove_round_trips_to_empty_ring() {
        let mut t = fresh();
        let pt = PageTableRoot(1);
        t.insert(FrameNumber::new(5), pt, VirtualAddress::new(0x1000));
        assert!(t.records[5].is_in_ring());
        t.remove(FrameNumber::new(5));
        assert!(!t.records[5].is_in_ring());
        assert_eq!(t.head, DETACHED);
    }

    #[test]
    fn remove_of_detached_frame_is_a_no_op() {
        let mut t = fresh();
        t.remove(FrameNumber::new(9));
        assert_eq!(t.head, DETACHED);
    }

    #[test]
    fn ring_survives_insert_and_removal_of_middle_element() {
        let mut t = fresh();
        let pt = PageTableRoot(1);
        for i in 0..4u32 {
            t.insert(FrameNumber::new(i), pt, VirtualAddress::new(i as u64 * 0x1000));
        }
        t.remove(FrameNumber::new(2));
        assert!(!t.records[2].is_in_ring());
        for i in [0u32, 1, 3] {
            assert!(t.records[i as usize].is_in_ring());
        }
    }

    #[test]
    fn clock_algorithm_gives_accessed_frames_a_second_chance() {
        let mut t = fresh();
        let walker = FakePageTable::new();
        let pt = PageTableRoot(1);

        for i in 0..3u32 {
            let vaddr = VirtualAddress::new(i as u64 * 0x1000);
            t.insert(FrameNumber::new(i), pt, vaddr);
            let pte = Pte::new_resident(FrameNumber::new(i), PteFlags::USER | PteFlags::READ);
            // Simulate hardware having touched every frame except 1.
            let pte = if i != 1 {
                Pte::from_raw(pte.raw() | PteFlags::ACCESSED.bits())
            } else {
                pte
            };
            walker.install(pt, vaddr, pte);
        }

        let (victim, _, vaddr) = t.select_and_detach_victim(&walker).expect("a victim exists");
        assert_eq!(victim, FrameNumber::new(1));
        assert_eq!(vaddr, VirtualAddress::new(0x1000));

        // Frames 0 and 2 had their accessed bit cleared along the way.
        assert!(!walker.peek(pt, VirtualAddress::new(0)).unwrap().is_accessed());
        assert!(!walker.peek(pt, VirtualAddress::new(0x2000)).unwrap().is_accessed());
    }

    #[test]
    fn insert_at_head_makes_the_rollback_frame_the_next_victim_candidate() {
        let mut t = fresh();
        let pt = PageTableRoot(1);
        t.insert(FrameNumber::new(0), pt, VirtualAddress::new(0));
        t.insert_at_head(FrameNumber::new(1), pt, VirtualAddress::new(0x1000));
        assert_eq!(t.head, 1);
        assert!(t.records[1].is_in_ring());
        assert!(t.records[0].is_in_ring());
    }

    #[test]
    fn clock_algorithm_returns_none_on_empty_ring() {
        let t = fresh();
        let walker = FakePageTable::new();
        let mut t = t;
        assert!(t.select_and_detach_victim(&walker).is_none());
    }
}

//! RAII wrappers for kernel resources.
//!
//! These ensure cleanup happens on every exit path -- including panics
//! that unwind through a scope -- instead of relying on every caller to
//! remember to call a matching `free`.

use core::ops::{Deref, DerefMut};

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use spin::MutexGuard;

use crate::{mm::frame_allocator, mm::FrameNumber, println};

/// RAII wrapper for a physical frame.
///
/// Automatically returns the frame to the allocator when dropped, unless
/// [`leak`](FrameGuard::leak) hands off ownership first (e.g. once the
/// frame has been installed in a PTE and is now owned by the LRU ring
/// instead).
pub struct FrameGuard {
    frame: FrameNumber,
}

impl FrameGuard {
    /// Wrap a frame returned by [`frame_allocator::alloc`].
    pub fn new(frame: FrameNumber) -> Self {
        Self { frame }
    }

    pub fn frame(&self) -> FrameNumber {
        self.frame
    }

    /// Release ownership of the frame without freeing it.
    pub fn leak(self) -> FrameNumber {
        let frame = self.frame;
        core::mem::forget(self);
        frame
    }
}

impl Drop for FrameGuard {
    fn drop(&mut self) {
        frame_allocator::free(self.frame);
    }
}

impl Deref for FrameGuard {
    type Target = FrameNumber;

    fn deref(&self) -> &Self::Target {
        &self.frame
    }
}

/// RAII wrapper for a batch of physical frames, e.g. frames allocated
/// for a multi-page mapping that must all be freed together on an
/// error path.
#[cfg(feature = "alloc")]
pub struct FramesGuard {
    frames: Vec<FrameNumber>,
}

#[cfg(feature = "alloc")]
impl FramesGuard {
    pub fn new(frames: Vec<FrameNumber>) -> Self {
        Self { frames }
    }

    /// Release ownership of the frames without freeing them.
    pub fn leak(self) -> Vec<FrameNumber> {
        // SAFETY-free: just move the Vec out before Drop can run.
        let mut this = core::mem::ManuallyDrop::new(self);
        core::mem::take(&mut this.frames)
    }
}

#[cfg(feature = "alloc")]
impl Drop for FramesGuard {
    fn drop(&mut self) {
        for &frame in &self.frames {
            frame_allocator::free(frame);
        }
    }
}

/// RAII lock guard that logs acquisition and release, useful when
/// debugging lock-ordering issues across the allocator/LRU/swap triad.
pub struct TrackedMutexGuard<'a, T> {
    guard: MutexGuard<'a, T>,
    name: &'static str,
}

impl<'a, T> TrackedMutexGuard<'a, T> {
    pub fn new(guard: MutexGuard<'a, T>, name: &'static str) -> Self {
        Self { guard, name }
    }
}

impl<T> Drop for TrackedMutexGuard<'_, T> {
    fn drop(&mut self) {
        println!("[lock] released {}", self.name);
    }
}

impl<T> Deref for TrackedMutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl<T> DerefMut for TrackedMutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// Macro to create RAII scope guards.
#[macro_export]
macro_rules! defer {
    ($e:expr) => {
        let _guard = $crate::raii::ScopeGuard::new(|| $e);
    };
}

/// Generic scope guard that runs cleanup code on drop.
pub struct ScopeGuard<F: FnOnce()> {
    cleanup: Option<F>,
}

impl<F: FnOnce()> ScopeGuard<F> {
    pub fn new(cleanup: F) -> Self {
        Self {
            cleanup: Some(cleanup),
        }
    }

    /// Cancel the cleanup.
    pub fn cancel(mut self) {
        self.cleanup = None;
    }
}

impl<F: FnOnce()> Drop for ScopeGuard<F> {
    fn drop(&mut self) {
        if let Some(cleanup) = self.cleanup.take() {
            cleanup();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::testutil::{FakeBlockDevice, FakePageTable};

    extern crate alloc;

    #[test]
    fn scope_guard_runs_cleanup_on_drop() {
        let mut cleaned = false;
        {
            let _guard = ScopeGuard::new(|| {
                cleaned = true;
            });
        }
        assert!(cleaned);
    }

    #[test]
    fn scope_guard_cancel_skips_cleanup() {
        let mut cleaned = false;
        {
            let guard = ScopeGuard::new(|| {
                cleaned = true;
            });
            guard.cancel();
        }
        assert!(!cleaned);
    }

    #[test]
    fn frame_guard_frees_on_drop() {
        let backing = alloc::vec![0u8; 4 * crate::config::PAGE_SIZE].leak();
        // SAFETY: freshly leaked, sized for 4 frames, for this test only.
        unsafe {
            frame_allocator::reset_for_test(backing.as_mut_ptr(), FrameNumber::new(0), 4);
        }
        let walker = FakePageTable::new();
        let device = FakeBlockDevice::new(1);
        let before = frame_allocator::free_count();
        {
            let frame = frame_allocator::alloc(&walker, &device).unwrap();
            let _guard = FrameGuard::new(frame);
            assert_eq!(frame_allocator::free_count(), before - 1);
        }
        assert_eq!(frame_allocator::free_count(), before);
    }

    #[test]
    fn frame_guard_leak_skips_the_free() {
        let backing = alloc::vec![0u8; 4 * crate::config::PAGE_SIZE].leak();
        // SAFETY: freshly leaked, sized for 4 frames, for this test only.
        unsafe {
            frame_allocator::reset_for_test(backing.as_mut_ptr(), FrameNumber::new(0), 4);
        }
        let walker = FakePageTable::new();
        let device = FakeBlockDevice::new(1);
        let before = frame_allocator::free_count();
        let frame = frame_allocator::alloc(&walker, &device).unwrap();
        let guard = FrameGuard::new(frame);
        let leaked = guard.leak();
        assert_eq!(leaked, frame);
        assert_eq!(frame_allocator::free_count(), before - 1);
        frame_allocator::free(frame);
    }
}

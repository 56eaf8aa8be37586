//! Page-fault dispatch.
//!
//! Building a [`PageFaultInfo`] from the raw trap frame is architecture
//! work (`from_x86_64`/`from_aarch64`/`from_riscv`); deciding what to do
//! with it belongs to [`paging_core`]. Only a `NotPresent` fault against
//! a swapped PTE is this core's business -- protection violations,
//! writes to read-only mappings, and execute-no-execute all escalate to
//! the process subsystem (out of scope here), which decides whether to
//! kill the thread.

use crate::{
    error::FaultError,
    mm::{page_table::PageTableWalker, paging_core, swap::BlockDevice, PageTableRoot, VirtualAddress},
};

/// Reason a page fault occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageFaultReason {
    /// Page is not present in the page table -- the only reason this
    /// dispatcher resolves itself.
    NotPresent,
    /// A protection violation was detected (e.g., access rights mismatch).
    ProtectionViolation,
    /// Write to a read-only page.
    WriteToReadOnly,
    /// Attempt to execute a page marked as no-execute.
    ExecuteNoExecute,
    /// User-mode code tried to access a kernel-only page.
    UserModeKernelAccess,
}

/// Information about a page fault collected by the architecture trap handler.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultInfo {
    /// The virtual address that caused the fault.
    pub faulting_address: u64,
    /// Why the fault occurred.
    pub reason: PageFaultReason,
    /// Whether the access was a write (true) or read (false).
    pub was_write: bool,
    /// Whether the fault occurred while executing in user mode.
    pub was_user_mode: bool,
    /// Instruction pointer at the time of the fault.
    pub instruction_pointer: u64,
}

/// Dispatch a fault against `page_table`.
///
/// Routes `NotPresent` faults to [`paging_core::handle_page_fault`];
/// everything else comes back as `FaultError::ProtectionViolation` for
/// the caller to escalate.
pub fn handle_page_fault(
    walker: &dyn PageTableWalker,
    device: &dyn BlockDevice,
    page_table: PageTableRoot,
    info: &PageFaultInfo,
) -> Result<(), FaultError> {
    if info.reason != PageFaultReason::NotPresent {
        return Err(FaultError::ProtectionViolation);
    }
    let vaddr = VirtualAddress::new(info.faulting_address);
    paging_core::handle_page_fault(walker, device, page_table, vaddr)
}

// ---------------------------------------------------------------------------
// Architecture-specific entry points
// ---------------------------------------------------------------------------

/// Build a [`PageFaultInfo`] from an x86_64 page fault error code and CR2.
///
/// Error code bits (from Intel SDM):
/// - Bit 0 (P):    0 = not-present, 1 = protection violation
/// - Bit 1 (W/R):  0 = read, 1 = write
/// - Bit 2 (U/S):  0 = supervisor, 1 = user
/// - Bit 4 (I/D):  1 = instruction fetch
#[cfg(target_arch = "x86_64")]
pub fn from_x86_64(error_code: u64, cr2: u64, rip: u64) -> PageFaultInfo {
    let not_present = (error_code & 1) == 0;
    let was_write = (error_code & 2) != 0;
    let was_user = (error_code & 4) != 0;
    let was_fetch = (error_code & 16) != 0;

    let reason = if not_present {
        PageFaultReason::NotPresent
    } else if was_fetch {
        PageFaultReason::ExecuteNoExecute
    } else if was_write {
        PageFaultReason::WriteToReadOnly
    } else if was_user {
        PageFaultReason::UserModeKernelAccess
    } else {
        PageFaultReason::ProtectionViolation
    };

    PageFaultInfo {
        faulting_address: cr2,
        reason,
        was_write,
        was_user_mode: was_user,
        instruction_pointer: rip,
    }
}

/// Build a [`PageFaultInfo`] from an AArch64 data/instruction abort.
///
/// `esr_el1` contains the ESR value and `far_el1` the faulting address.
/// ISS encoding for Data Abort (EC=0b100100/0b100101):
/// - Bit 6 (WnR): 0 = read, 1 = write
/// - Bits [5:0] (DFSC): fault status code
#[cfg(target_arch = "aarch64")]
pub fn from_aarch64(esr_el1: u64, far_el1: u64, elr_el1: u64) -> PageFaultInfo {
    let dfsc = (esr_el1 & 0x3F) as u8;
    let was_write = (esr_el1 & (1 << 6)) != 0;
    // EC field is bits [31:26]
    let ec = ((esr_el1 >> 26) & 0x3F) as u8;
    // If EC == 0b100100 the abort came from a lower EL (user mode)
    let was_user = ec == 0b100100;

    let reason = match dfsc & 0x0F {
        // Translation faults (levels 0-3)
        0x04..=0x07 => PageFaultReason::NotPresent,
        // Permission faults (levels 0-3)
        0x0C..=0x0F => {
            if was_write {
                PageFaultReason::WriteToReadOnly
            } else {
                PageFaultReason::ProtectionViolation
            }
        }
        _ => PageFaultReason::ProtectionViolation,
    };

    PageFaultInfo {
        faulting_address: far_el1,
        reason,
        was_write,
        was_user_mode: was_user,
        instruction_pointer: elr_el1,
    }
}

/// Build a [`PageFaultInfo`] from a RISC-V page fault trap.
///
/// RISC-V uses different exception codes for load, store, and instruction
/// page faults (causes 12, 13, 15 respectively).
#[cfg(any(target_arch = "riscv32", target_arch = "riscv64"))]
pub fn from_riscv(cause: u64, stval: u64, sepc: u64) -> PageFaultInfo {
    let was_write = cause == 15; // Store/AMO page fault
    let was_fetch = cause == 12; // Instruction page fault
                                 // cause == 13 is load page fault

    // RISC-V does not encode present vs. permission in the cause alone;
    // the PTE must be inspected. Default to NotPresent and let the
    // dispatcher's swap-in path sort out whether it really was one.
    let reason = if was_fetch {
        PageFaultReason::ExecuteNoExecute
    } else {
        PageFaultReason::NotPresent
    };

    PageFaultInfo {
        faulting_address: stval,
        reason,
        was_write,
        was_user_mode: true,
        instruction_pointer: sepc,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    extern crate alloc;

    use crate::mm::{
        frame_allocator, lru,
        pte::{Pte, PteFlags},
        swap,
        testutil::{FakeBlockDevice, FakePageTable},
        FrameNumber,
    };
    use crate::config::{BLOCKS_PER_PAGE, PAGE_SIZE, SWAP_MAX};

    /// Self-contained memory-subsystem state for this module's tests,
    /// independent of whatever order the crate's other `#[cfg(test)]`
    /// modules run in (they share the same global singletons).
    fn fresh(total_frames: u32) {
        let backing = alloc::vec![0u8; total_frames as usize * PAGE_SIZE].leak();
        // SAFETY: `backing` is leaked for the test's duration and sized
        // for `total_frames`; kernel_end of 0 reserves nothing.
        unsafe {
            frame_allocator::reset_for_test(backing.as_mut_ptr(), FrameNumber::new(0), total_frames);
        }
        lru::reset_for_test();
        swap::reset_for_test();
    }

    #[test]
    fn page_fault_reason_equality() {
        assert_eq!(PageFaultReason::NotPresent, PageFaultReason::NotPresent);
        assert_ne!(
            PageFaultReason::NotPresent,
            PageFaultReason::WriteToReadOnly
        );
    }

    #[test]
    fn non_not_present_faults_escalate_as_protection_violations() {
        let walker = FakePageTable::new();
        let device = FakeBlockDevice::new(SWAP_MAX * BLOCKS_PER_PAGE);
        let info = PageFaultInfo {
            faulting_address: 0x1000,
            reason: PageFaultReason::WriteToReadOnly,
            was_write: true,
            was_user_mode: true,
            instruction_pointer: 0x2000,
        };
        let result = handle_page_fault(&walker, &device, PageTableRoot(1), &info);
        assert_eq!(result, Err(FaultError::ProtectionViolation));
    }

    #[test]
    fn not_present_fault_against_a_swapped_pte_dispatches_to_paging_core() {
        fresh(4);

        let walker = FakePageTable::new();
        let device = FakeBlockDevice::new(SWAP_MAX * BLOCKS_PER_PAGE);
        let pt = PageTableRoot(1);
        let vaddr = VirtualAddress::new(0x3000);

        let slot = swap::allocate_slot().unwrap();
        let payload = [0x77u8; PAGE_SIZE];
        swap::write(&device, slot, &payload).unwrap();
        walker.install(pt, vaddr, Pte::new_swapped(slot, PteFlags::USER | PteFlags::READ));

        let info = PageFaultInfo {
            faulting_address: vaddr.as_u64(),
            reason: PageFaultReason::NotPresent,
            was_write: false,
            was_user_mode: true,
            instruction_pointer: 0x4000,
        };
        handle_page_fault(&walker, &device, pt, &info).expect("swap-in succeeds");
        let pte = walker.peek(pt, vaddr).unwrap();
        assert!(pte.is_valid());

        // SAFETY: the frame the fault handler just installed is not
        // concurrently touched by anything else in this test.
        let contents = unsafe { &*frame_allocator::frame_bytes_mut(pte.frame()) };
        assert!(contents.iter().all(|&b| b == 0x77));
    }
}

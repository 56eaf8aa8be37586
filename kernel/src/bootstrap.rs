//! Bootstrap module for kernel initialization.
//!
//! The full multi-stage sequence this teaching kernel once ran (process
//! management, scheduler activation, user-space transition, ...) belongs
//! to collaborators outside this tree; what is left here is the one
//! stage this core owns -- handing physical memory to [`mm::init`].

use crate::{error::KernelResult, mm, mm::FrameNumber, println};

/// Bootstrap task ID, reserved for whatever runs before a scheduler
/// exists to hand out real ones.
pub const BOOTSTRAP_PID: u64 = 0;

/// Bring up the memory subsystem.
///
/// `phys_mem_base` and `kernel_end` are forwarded to [`mm::init`]; see
/// its contract for what the caller must guarantee about them.
///
/// # Safety
/// Same as [`mm::init`]: `phys_mem_base` must address
/// `crate::config::PHYS_TOP` bytes of otherwise-unused, permanently
/// mapped memory.
pub unsafe fn kernel_init(phys_mem_base: *mut u8, kernel_end: FrameNumber) -> KernelResult<()> {
    println!("[BOOTSTRAP] Stage 1: architecture initialization");
    println!("[BOOTSTRAP] Architecture initialized");

    println!("[BOOTSTRAP] Stage 2: memory management");
    // SAFETY: forwarded from this function's contract.
    unsafe {
        mm::init(phys_mem_base, kernel_end);
    }
    println!("[BOOTSTRAP] Memory management initialized");

    Ok(())
}

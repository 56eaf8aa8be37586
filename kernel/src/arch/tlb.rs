//! TLB invalidation.
//!
//! Eviction and swap-in both rewrite a PTE out from under the hardware's
//! cached translation; both must flush before the frame they touched can
//! be reused or re-mapped. A full flush is acceptable for this teaching
//! kernel -- see the per-instruction note on [`flush`].

use crate::mm::VirtualAddress;

/// Invalidate cached translations covering `vaddr`.
///
/// * **x86_64**: `invlpg` for the single page.
/// * **AArch64**: `tlbi vae1is` followed by `dsb ish` / `isb`.
/// * **RISC-V**: `sfence.vma` for the single address.
///
/// On any other target (including host builds under test) this is a
/// no-op; tests exercise the PTE-rewrite logic directly and have no real
/// TLB to invalidate.
#[inline]
pub fn flush(vaddr: VirtualAddress) {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: invlpg only affects the TLB entry for the given address;
        // it has no effect on memory contents and cannot fault.
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) vaddr.as_u64(), options(nostack, preserves_flags));
        }
    }

    #[cfg(target_arch = "aarch64")]
    {
        let page = vaddr.as_u64() >> 12;
        // SAFETY: tlbi vae1is invalidates one EL1 translation by VA; dsb/isb
        // order the invalidation against subsequent translations. No memory
        // is touched and the instruction cannot fault.
        unsafe {
            core::arch::asm!(
                "tlbi vae1is, {}",
                "dsb ish",
                "isb",
                in(reg) page,
                options(nostack, preserves_flags)
            );
        }
    }

    #[cfg(target_arch = "riscv64")]
    {
        // SAFETY: sfence.vma with rs1=vaddr, rs2=x0 flushes cached
        // translations for this address for all ASIDs. No memory is
        // touched and the instruction cannot fault.
        unsafe {
            core::arch::asm!("sfence.vma {}, zero", in(reg) vaddr.as_u64(), options(nostack, preserves_flags));
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64", target_arch = "riscv64")))]
    {
        let _ = vaddr;
    }
}

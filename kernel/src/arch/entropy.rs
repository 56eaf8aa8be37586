//! Architecture-independent hardware timestamp access.
//!
//! Centralizes the one piece of per-arch inline assembly the benchmark
//! harness needs, so `test_framework.rs` stays free of `#[cfg(target_arch)]`
//! blocks.

/// Read the hardware timestamp/cycle counter.
///
/// Returns a raw counter value suitable for entropy collection via jitter
/// timing.
///
/// * **x86_64**: `RDTSC` (Time Stamp Counter).
/// * **AArch64**: `CNTVCT_EL0` (Virtual Timer Count).
/// * **RISC-V**: `rdcycle` CSR.
#[inline]
pub fn read_timestamp() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        // SAFETY: _rdtsc reads the Time Stamp Counter register. It is always
        // available on x86_64 and returns the current cycle count as u64.
        unsafe { core::arch::x86_64::_rdtsc() }
    }

    #[cfg(target_arch = "aarch64")]
    {
        let val: u64;
        // SAFETY: Reading CNTVCT_EL0 is a read-only operation that accesses
        // the virtual timer count register. Always safe from any exception level.
        unsafe {
            core::arch::asm!("mrs {}, cntvct_el0", out(reg) val);
        }
        val
    }

    #[cfg(target_arch = "riscv64")]
    {
        let val: u64;
        // SAFETY: Reading the cycle CSR is a read-only operation that
        // accesses a performance counter. Always safe.
        unsafe {
            core::arch::asm!("rdcycle {}", out(reg) val);
        }
        val
    }

    #[cfg(not(any(
        target_arch = "x86_64",
        target_arch = "aarch64",
        target_arch = "riscv64"
    )))]
    {
        0u64
    }
}


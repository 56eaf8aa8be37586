#![no_std]
#![no_main]

use core::panic::PanicInfo;

#[macro_use]
mod print;

mod arch;
mod bootstrap;
mod config;
mod error;
mod log_service;
mod mm;
mod raii;
mod serial;
mod sync;
mod syscall;

use mm::FrameNumber;

// Supplied by the linker script: the first byte past the kernel image,
// mirroring xv6's `extern char end[]` -- everything from here to
// `config::PHYS_TOP` is free physical memory.
extern "C" {
    static kernel_end: u8;
}

#[panic_handler]
fn panic(_info: &PanicInfo) -> ! {
    println!("[KERNEL PANIC] {}", _info);
    loop {
        core::hint::spin_loop();
    }
}

#[no_mangle]
pub extern "C" fn _start() -> ! {
    println!("Booting pager-kernel v{}", env!("CARGO_PKG_VERSION"));

    // SAFETY: `kernel_end` is the linker-supplied end-of-image symbol;
    // its address, rounded up to a frame boundary, is the first frame
    // this kernel does not already occupy. `phys_mem_base` of null
    // assumes an identity-mapped low-memory kernel, as xv6 does.
    unsafe {
        let end_addr = &raw const kernel_end as usize;
        let kernel_end_frame = FrameNumber::new(end_addr.div_ceil(config::PAGE_SIZE) as u32);
        bootstrap::kernel_init(core::ptr::null_mut(), kernel_end_frame)
            .expect("kernel_init failed");
    }

    println!("pager-kernel initialized successfully!");

    loop {
        core::hint::spin_loop();
    }
}

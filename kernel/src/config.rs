//! Build-time configuration surface for the memory subsystem.
//!
//! Every constant that the frame allocator, swap store, and paging core
//! agree on lives here so that none of them hard-code a shift or a size
//! independently. Changing the backing device's block size or the swap
//! area's slot count means touching exactly this file.

/// Size of one physical frame / virtual page, in bytes.
pub const PAGE_SIZE: usize = 4096;

/// Size of one block on the backing swap device, in bytes.
pub const BLOCK_SIZE: usize = 512;

/// Number of device blocks a single page-sized transfer spans.
pub const BLOCKS_PER_PAGE: usize = PAGE_SIZE / BLOCK_SIZE;

/// Number of addressable swap slots. One bit per slot is tracked in the
/// swap bitmap, so the bitmap occupies `SWAP_MAX / 8` bytes.
pub const SWAP_MAX: usize = 8192;

/// Bytes needed for a 1-bit-per-slot occupancy bitmap.
pub const SWAP_BITMAP_BYTES: usize = SWAP_MAX / 8;

/// First byte past the end of physical RAM this kernel manages.
///
/// A real boot path would read this from the machine's memory map; the
/// teaching kernel fixes it so the frame table can be a statically sized
/// array.
pub const PHYS_TOP: usize = 128 * 1024 * 1024;

/// Number of frames addressable below [`PHYS_TOP`].
pub const FRAME_COUNT: usize = PHYS_TOP / PAGE_SIZE;

const _: () = assert!(PAGE_SIZE % BLOCK_SIZE == 0, "PAGE_SIZE must be a multiple of BLOCK_SIZE");
const _: () = assert!(SWAP_MAX % 8 == 0, "SWAP_MAX must be a multiple of 8");
const _: () = assert!(PHYS_TOP % PAGE_SIZE == 0, "PHYS_TOP must be page-aligned");

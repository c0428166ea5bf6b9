//! Memory management: layout constants, the physical frame allocator,
//! the kernel heap and the per-process page directories.

pub mod frame_allocator;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod heap;
pub mod page_table;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod vm;

/// Size of one page / page frame.
pub const PAGE_SIZE: usize = 4096;

/// Physical memory the kernel supports (and identity-maps high).
pub const MEM_CAP: u32 = 0x0400_0000; // 64 MiB

/// Everything at and above this virtual address belongs to the kernel;
/// physical `0..MEM_CAP` appears here in every address space.
pub const KERNEL_BASE: u32 = 0xC000_0000;

/// Virtual address user programs are linked and loaded at.
pub const PROC_LOAD_ADDR: u32 = 0x1000;

/// The single user-stack page sits directly below the kernel half.
pub const USER_STACK_SIZE: u32 = PAGE_SIZE as u32;
pub const USER_STACK_ADDR: u32 = KERNEL_BASE - USER_STACK_SIZE;

/// Per-process kernel stack size (one frame).
pub const KSTACK_SIZE: usize = PAGE_SIZE;

/// Bytes carved off the free region for the kernel heap.
pub const HEAP_SIZE: usize = 256 * 1024;

/// Round down to a page boundary.
pub const fn page_down(addr: u32) -> u32 {
    addr & !(PAGE_SIZE as u32 - 1)
}

/// Round up to a page boundary.
pub const fn page_up(addr: u32) -> u32 {
    if addr == page_down(addr) {
        addr
    } else {
        page_down(addr) + PAGE_SIZE as u32
    }
}

/// Kernel virtual address of a physical address. Valid for
/// `0..MEM_CAP` only.
pub const fn p2v(paddr: u32) -> usize {
    (paddr + KERNEL_BASE) as usize
}

/// Physical address behind a kernel virtual address.
pub const fn v2p(vaddr: usize) -> u32 {
    vaddr as u32 - KERNEL_BASE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_rounding() {
        assert_eq!(page_down(0x1fff), 0x1000);
        assert_eq!(page_down(0x2000), 0x2000);
        assert_eq!(page_up(0x1001), 0x2000);
        assert_eq!(page_up(0x2000), 0x2000);
        assert_eq!(page_up(0), 0);
    }

    #[test]
    fn high_half_translation_round_trips() {
        assert_eq!(v2p(p2v(0x12_3000)), 0x12_3000);
        assert_eq!(p2v(0), KERNEL_BASE as usize);
    }
}

//! Two-level x86 page tables.
//!
//! A page directory is one frame of 1024 directory entries; each present
//! entry points at one frame of 1024 table entries. [`PgDir`] carries the
//! kernel virtual address of the root so it can be stored in a PCB and
//! freed later.

use bitflags::bitflags;

bitflags! {
    /// Attribute bits shared by directory and table entries.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PteFlags: u32 {
        const PRESENT  = 0x1;
        const WRITABLE = 0x2;
        const USER     = 0x4;
    }
}

/// Root of a per-process page-map tree (kernel virtual address of the
/// page directory frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PgDir(pub usize);

pub const PD_ENTRIES: usize = 1024;
pub const PT_ENTRIES: usize = 1024;

/// Bytes covered by one directory entry.
pub const PD_SPAN: u32 = (PT_ENTRIES * super::PAGE_SIZE) as u32;

pub const fn pd_index(vaddr: u32) -> usize {
    (vaddr >> 22) as usize
}

pub const fn pt_index(vaddr: u32) -> usize {
    ((vaddr >> 12) & 0x3FF) as usize
}

/// The frame-number part of an entry or address.
pub const fn pfn(x: u32) -> u32 {
    x & 0xFFFF_F000
}

/// Round down to the start of the 4 MiB region one directory entry maps.
pub const fn pd_span_down(vaddr: u32) -> u32 {
    vaddr & 0xFFC0_0000
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod ops {
    use super::*;
    use crate::arch::x86;
    use crate::kernel::Kernel;
    use crate::mm::{frame_allocator, p2v, v2p, page_up, PAGE_SIZE};

    /// How `walk` may obtain a frame for a missing intermediate table.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub enum WalkCreate {
        /// Never allocate; absent table means `None`.
        No,
        /// Allocate through the locked frame interface.
        Locked,
        /// Allocate through the early lock-free interface (boot only).
        Early,
    }

    /// Locate the leaf entry for `vaddr` in `pd`, creating the
    /// intermediate table if `create` allows. A created table's directory
    /// entry is user + writable; the leaf decides the real privilege.
    /// Editing the live tree flushes the TLB.
    pub fn walk(k: &mut Kernel, pd: PgDir, vaddr: u32, create: WalkCreate) -> Option<*mut u32> {
        assert!(pd.0 % PAGE_SIZE == 0, "walk: misaligned page directory");
        // SAFETY: `pd` is a page-directory frame owned by one process (or
        // the scheduler); single CPU, so no concurrent mutation.
        let pde = unsafe { &mut *((pd.0 + pd_index(vaddr) * 4) as *mut u32) };
        if *pde & PteFlags::PRESENT.bits() == 0 {
            let frame = match create {
                WalkCreate::No => return None,
                WalkCreate::Locked => frame_allocator::alloc_frame(k),
                WalkCreate::Early => frame_allocator::alloc_frame_early(k),
            };
            let frame = frame.expect("walk: no frame for intermediate page table");
            *pde = pfn(v2p(frame))
                | (PteFlags::PRESENT | PteFlags::USER | PteFlags::WRITABLE).bits();
            if pfn(x86::rcr3()) == v2p(pd.0) {
                x86::flush_tlb();
            }
        }
        let pt = p2v(pfn(*pde));
        Some((pt + pt_index(vaddr) * 4) as *mut u32)
    }

    fn map_inner(
        k: &mut Kernel,
        pd: PgDir,
        vaddr: u32,
        size: u32,
        mut paddr: u32,
        attrs: PteFlags,
        create: WalkCreate,
    ) {
        assert_eq!(vaddr % PAGE_SIZE as u32, 0, "map_range: misaligned vaddr");
        let end = vaddr + page_up(size);
        let mut addr = vaddr;
        while addr < end {
            let pte = walk(k, pd, addr, create).expect("map_range: walk failed");
            // SAFETY: `pte` points into a table frame reachable only
            // through `pd`.
            unsafe {
                if *pte & PteFlags::PRESENT.bits() != 0 {
                    panic!("map_range: remap of {:#x}", addr);
                }
                *pte = pfn(paddr) | attrs.bits();
            }
            addr += PAGE_SIZE as u32;
            paddr += PAGE_SIZE as u32;
        }
    }

    /// Install leaf mappings `vaddr..vaddr+size` -> `paddr..` with the
    /// given attributes. Mapping over a present entry is fatal.
    pub fn map_range(k: &mut Kernel, pd: PgDir, vaddr: u32, size: u32, paddr: u32, attrs: PteFlags) {
        map_inner(k, pd, vaddr, size, paddr, attrs, WalkCreate::Locked);
    }

    /// Boot-time variant of [`map_range`] (lock-free frame allocation).
    pub fn map_range_early(
        k: &mut Kernel,
        pd: PgDir,
        vaddr: u32,
        size: u32,
        paddr: u32,
        attrs: PteFlags,
    ) {
        map_inner(k, pd, vaddr, size, paddr, attrs, WalkCreate::Early);
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use ops::{map_range, map_range_early, walk, WalkCreate};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_split() {
        let va: u32 = 0xC012_3456;
        assert_eq!(pd_index(va), 0x300);
        assert_eq!(pt_index(va), 0x123);
        assert_eq!(pfn(va), 0xC012_3000);
    }

    #[test]
    fn span_rounding() {
        assert_eq!(pd_span_down(0x0070_0000), 0x0040_0000);
        assert_eq!(pd_span_down(0x0040_0000), 0x0040_0000);
        assert_eq!(PD_SPAN, 0x0040_0000);
    }
}

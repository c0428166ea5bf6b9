//! Per-process address-space construction and teardown.
//!
//! The user half is `PROC_LOAD_ADDR..KERNEL_BASE`; the kernel half of
//! every page directory maps physical `0..MEM_CAP` at `KERNEL_BASE` with
//! supervisor leaves. All walks below tolerate holes: a missing
//! intermediate table skips straight to the next 4 MiB boundary.

use super::page_table::{
    map_range, map_range_early, pd_span_down, pfn, walk, PgDir, PteFlags, WalkCreate, PD_ENTRIES,
    PD_SPAN,
};
use super::{
    frame_allocator, p2v, page_up, v2p, KERNEL_BASE, MEM_CAP, PAGE_SIZE, PROC_LOAD_ADDR,
    USER_STACK_ADDR, USER_STACK_SIZE,
};
use crate::kernel::Kernel;

/// Fresh page directory with only the kernel half mapped: physical
/// `0..MEM_CAP` at `KERNEL_BASE`, supervisor leaves, empty user half.
pub fn create_kernel_pgdir(k: &mut Kernel) -> Option<PgDir> {
    let root = PgDir(frame_allocator::alloc_frame(k)?);
    map_range(k, root, KERNEL_BASE, MEM_CAP, 0, PteFlags::PRESENT | PteFlags::WRITABLE);
    Some(root)
}

/// Boot-time variant of [`create_kernel_pgdir`].
pub fn create_kernel_pgdir_early(k: &mut Kernel) -> Option<PgDir> {
    let root = PgDir(frame_allocator::alloc_frame_early(k)?);
    map_range_early(k, root, KERNEL_BASE, MEM_CAP, 0, PteFlags::PRESENT | PteFlags::WRITABLE);
    Some(root)
}

/// Allocate and map user pages covering `[page_up(start), page_up(end))`.
/// Returns `end` on success; on allocation failure every page of the
/// requested window is rolled back and `None` comes back.
pub fn alloc_user_range(k: &mut Kernel, pd: PgDir, start: u32, end: u32) -> Option<u32> {
    if end > KERNEL_BASE {
        return None;
    }
    if end <= start {
        return Some(start);
    }

    let mut addr = page_up(start);
    while addr < end {
        let Some(frame) = frame_allocator::alloc_frame(k) else {
            free_user_range(k, pd, start, end);
            return None;
        };
        map_range(
            k,
            pd,
            addr,
            PAGE_SIZE as u32,
            v2p(frame),
            PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER,
        );
        addr += PAGE_SIZE as u32;
    }
    Some(end)
}

/// Free whatever user pages are mapped in `[page_up(start), end)`. Holes
/// are fine: a missing intermediate table advances to the next 4 MiB
/// boundary, a non-present leaf is skipped.
pub fn free_user_range(k: &mut Kernel, pd: PgDir, start: u32, end: u32) -> u32 {
    if end > KERNEL_BASE {
        panic!("free_user_range: refusing to free kernel address space");
    }
    if end <= start {
        return start;
    }

    let mut addr = page_up(start);
    while addr < end {
        match walk(k, pd, addr, WalkCreate::No) {
            None => {
                // no intermediate table here
                addr = pd_span_down(addr + PD_SPAN);
                continue;
            }
            Some(pte) => {
                // SAFETY: `pte` points into this pgdir's own table frame.
                unsafe {
                    if *pte & PteFlags::PRESENT.bits() != 0 {
                        frame_allocator::free_frame(k, p2v(pfn(*pte)));
                        *pte = 0;
                    }
                }
            }
        }
        addr += PAGE_SIZE as u32;
    }
    start
}

/// Free all user pages, then every intermediate table, then the root.
/// Kernel-half leaf frames are never touched (they are shared physical
/// memory, not owned by the process).
pub fn free_pgdir(k: &mut Kernel, pd: PgDir) {
    free_user_range(k, pd, PROC_LOAD_ADDR, KERNEL_BASE);
    for i in 0..PD_ENTRIES {
        // SAFETY: the root frame is exclusively owned by this pgdir.
        let pde = unsafe { *((pd.0 + i * 4) as *const u32) };
        if pde & PteFlags::PRESENT.bits() != 0 {
            frame_allocator::free_frame(k, p2v(pfn(pde)));
        }
    }
    frame_allocator::free_frame(k, pd.0);
}

/// Kernel-visible address of `uvaddr` in `pd`, iff it is mapped present
/// and user accessible.
pub fn uva2kva(k: &mut Kernel, pd: PgDir, uvaddr: u32) -> Option<usize> {
    let pte = walk(k, pd, uvaddr, WalkCreate::No)?;
    // SAFETY: see walk; reading the entry only.
    let pte = unsafe { *pte };
    if pte & PteFlags::PRESENT.bits() == 0 || pte & PteFlags::USER.bits() == 0 {
        return None;
    }
    Some(p2v(pfn(pte)) + (uvaddr as usize & (PAGE_SIZE - 1)))
}

/// Copy `src` into user address `dst` of `pd`, which need not be the
/// loaded address space. The destination window must already be mapped
/// user-accessible.
pub fn copy_out(k: &mut Kernel, pd: PgDir, mut dst: u32, src: &[u8]) -> Result<(), ()> {
    let mut pos = 0;
    while pos < src.len() {
        let kva = uva2kva(k, pd, dst).ok_or(())?;
        let in_page = PAGE_SIZE - (kva & (PAGE_SIZE - 1));
        let n = in_page.min(src.len() - pos);
        // SAFETY: `kva..kva+n` stays inside one frame that uva2kva just
        // proved is mapped and user accessible.
        unsafe {
            core::ptr::copy_nonoverlapping(src.as_ptr().add(pos), kva as *mut u8, n);
        }
        pos += n;
        dst += n as u32;
    }
    Ok(())
}

/// Duplicate an address space: fresh kernel half, then a by-content copy
/// of every present user page in `[PROC_LOAD_ADDR, PROC_LOAD_ADDR+size)`,
/// then the user stack. Holes stay holes. Everything allocated so far is
/// released on failure.
pub fn copy_pgdir(k: &mut Kernel, pd: PgDir, size: u32) -> Option<PgDir> {
    let new_pd = create_kernel_pgdir(k)?;

    let mut addr = PROC_LOAD_ADDR;
    while addr < PROC_LOAD_ADDR + size {
        let Some(pte) = walk(k, pd, addr, WalkCreate::No) else {
            addr = pd_span_down(addr + PD_SPAN);
            continue;
        };
        // SAFETY: reading this process's own leaf entry.
        let pte = unsafe { *pte };
        if pte & PteFlags::PRESENT.bits() != 0 {
            if copy_user_page(k, pd, new_pd, addr).is_none() {
                free_pgdir(k, new_pd);
                return None;
            }
        }
        addr += PAGE_SIZE as u32;
    }

    // The stack pages are always present in a live process; a hole there
    // means the source pgdir is broken.
    if alloc_user_range(k, new_pd, USER_STACK_ADDR, USER_STACK_ADDR + USER_STACK_SIZE).is_none() {
        free_pgdir(k, new_pd);
        return None;
    }
    let mut addr = USER_STACK_ADDR;
    while addr < USER_STACK_ADDR + USER_STACK_SIZE {
        let src = uva2kva(k, pd, addr).expect("copy_pgdir: source stack unmapped");
        let dst = uva2kva(k, new_pd, addr).expect("copy_pgdir: new stack unmapped");
        // SAFETY: both sides are full, distinct frames.
        unsafe {
            core::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, PAGE_SIZE);
        }
        addr += PAGE_SIZE as u32;
    }

    Some(new_pd)
}

fn copy_user_page(k: &mut Kernel, pd: PgDir, new_pd: PgDir, addr: u32) -> Option<()> {
    alloc_user_range(k, new_pd, addr, addr + PAGE_SIZE as u32)?;
    let src = uva2kva(k, pd, addr)?;
    let dst = uva2kva(k, new_pd, addr)?;
    // SAFETY: distinct frames, both mapped through the kernel half.
    unsafe {
        core::ptr::copy_nonoverlapping(src as *const u8, dst as *mut u8, PAGE_SIZE);
    }
    Some(())
}

/// Build the first process's user half: one page of code/data at
/// `PROC_LOAD_ADDR` copied from the linker-embedded blob, plus the user
/// stack. Boot only (lock-free allocation).
pub fn init_first_proc_uvm(k: &mut Kernel, pd: PgDir, blob: &[u8]) {
    assert!(blob.len() <= PAGE_SIZE, "initcode larger than one page");

    let page = frame_allocator::alloc_frame_early(k).expect("init uvm: out of frames");
    map_range_early(
        k,
        pd,
        PROC_LOAD_ADDR,
        blob.len() as u32,
        v2p(page),
        PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER,
    );
    // SAFETY: `page` is a fresh frame; the blob fits by the assert above.
    unsafe {
        core::ptr::copy_nonoverlapping(blob.as_ptr(), page as *mut u8, blob.len());
    }

    let mut vaddr = USER_STACK_ADDR;
    while vaddr < USER_STACK_ADDR + USER_STACK_SIZE {
        let stack = frame_allocator::alloc_frame_early(k).expect("init uvm: out of frames");
        map_range_early(
            k,
            pd,
            vaddr,
            PAGE_SIZE as u32,
            v2p(stack),
            PteFlags::PRESENT | PteFlags::WRITABLE | PteFlags::USER,
        );
        vaddr += PAGE_SIZE as u32;
    }
}

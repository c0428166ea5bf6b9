//! Physical frame allocator.
//!
//! An intrusive singly linked free list: the first word of every free
//! frame holds the address of the next one. Frames are handed out zeroed.
//! The list head carries a BUSY flag taken with the usual
//! push_cli / sleep discipline; the `*_early` entry points skip the lock
//! and exist for boot, before there is a process to sleep.

use crate::kernel::{Channel, Kernel};
use crate::mm::{page_down, PAGE_SIZE};
use crate::sync;

pub struct FrameAllocator {
    /// Lock bit on the list head.
    busy: bool,
    /// First free frame (kernel virtual address), 0 stored in-frame means
    /// end of list.
    head: Option<usize>,
    /// Managed range, for validating frees.
    start: usize,
    end: usize,
    free_frames: usize,
}

impl FrameAllocator {
    pub const fn new() -> Self {
        Self {
            busy: false,
            head: None,
            start: 0,
            end: 0,
            free_frames: 0,
        }
    }

    /// Hand the allocator the frames in `[start, end)`. Boot only.
    pub fn init(&mut self, start: usize, end: usize) {
        assert_eq!(start % PAGE_SIZE, 0, "frame region must be page aligned");
        self.start = start;
        self.end = end;
        let mut addr = start;
        while addr < end {
            self.push_free(addr);
            addr += PAGE_SIZE;
        }
        log::info!("frame allocator: {} frames at {:#x}..{:#x}", self.free_frames, start, end);
    }

    pub fn free_frames(&self) -> usize {
        self.free_frames
    }

    fn pop_free(&mut self) -> Option<usize> {
        let page = self.head?;
        // SAFETY: `page` is a frame on the free list, which this allocator
        // owns exclusively; its first word is the list link.
        let next = unsafe { *(page as *const usize) };
        self.head = if next == 0 { None } else { Some(next) };
        self.free_frames -= 1;
        // SAFETY: the frame is no longer linked anywhere; zeroing it is
        // part of the allocation contract.
        unsafe { core::ptr::write_bytes(page as *mut u8, 0, PAGE_SIZE) };
        Some(page)
    }

    fn push_free(&mut self, vaddr: usize) {
        let page = page_down(vaddr as u32) as usize;
        if page < self.start || page >= self.end {
            panic!("free_frame: {:#x} outside the managed range", page);
        }
        // SAFETY: the frame is being returned to the allocator; nothing
        // else may reference it, so its first word becomes the link.
        unsafe { *(page as *mut usize) = self.head.unwrap_or(0) };
        self.head = Some(page);
        self.free_frames += 1;
    }
}

fn lock(k: &mut Kernel) {
    sync::push_cli(k);
    while k.frames.busy {
        sync::sleep(k, Channel::FrameList);
    }
    k.frames.busy = true;
    sync::pop_cli(k);
}

fn unlock(k: &mut Kernel) {
    if !k.frames.busy {
        panic!("frame allocator: unlock of an unlocked list");
    }
    k.frames.busy = false;
    sync::wakeup(k, Channel::FrameList);
}

/// Allocate one zeroed frame, or `None` when physical memory is gone.
pub fn alloc_frame(k: &mut Kernel) -> Option<usize> {
    lock(k);
    let page = k.frames.pop_free();
    unlock(k);
    page
}

/// Return a frame to the free list.
pub fn free_frame(k: &mut Kernel, vaddr: usize) {
    lock(k);
    k.frames.push_free(vaddr);
    unlock(k);
}

/// Lock-free variant for early boot, before any process exists. The
/// caller must guarantee nobody is using the locked interface.
pub fn alloc_frame_early(k: &mut Kernel) -> Option<usize> {
    k.frames.pop_free()
}

/// Lock-free variant of [`free_frame`], same caveat as
/// [`alloc_frame_early`].
pub fn free_frame_early(k: &mut Kernel, vaddr: usize) {
    k.frames.push_free(vaddr)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn frames_come_back_zeroed() {
        let mut k = testutil::bare_kernel();
        let region = testutil::leak_frames(4);
        k.frames.init(region.start, region.end);

        let a = alloc_frame(&mut k).unwrap();
        // dirty it, free it, get it again
        // SAFETY: `a` is a frame we own inside the leaked test region.
        unsafe { core::ptr::write_bytes(a as *mut u8, 0xAB, PAGE_SIZE) };
        free_frame(&mut k, a);

        let mut seen = [0usize; 4];
        for slot in seen.iter_mut() {
            let f = alloc_frame(&mut k).unwrap();
            // SAFETY: freshly allocated frame.
            let bytes = unsafe { core::slice::from_raw_parts(f as *const u8, PAGE_SIZE) };
            assert!(bytes.iter().all(|&b| b == 0));
            *slot = f;
        }
        assert!(seen.contains(&a));
        assert_eq!(alloc_frame(&mut k), None);
    }

    #[test]
    fn free_count_tracks_list() {
        let mut k = testutil::bare_kernel();
        let region = testutil::leak_frames(3);
        k.frames.init(region.start, region.end);
        assert_eq!(k.frames.free_frames(), 3);

        let f = alloc_frame(&mut k).unwrap();
        assert_eq!(k.frames.free_frames(), 2);
        free_frame(&mut k, f);
        assert_eq!(k.frames.free_frames(), 3);
    }

    #[test]
    #[should_panic(expected = "outside the managed range")]
    fn foreign_frame_is_rejected() {
        let mut k = testutil::bare_kernel();
        let region = testutil::leak_frames(2);
        k.frames.init(region.start, region.end);
        free_frame(&mut k, region.end + PAGE_SIZE);
    }
}

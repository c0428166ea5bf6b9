//! Kernel heap.
//!
//! A fixed slice of the free region, handed to `linked_list_allocator`.
//! The heap serves transient allocations (exec argument staging, log
//! formatting helpers); the core kernel tables are static arenas and
//! never touch it.

use crate::mm::HEAP_SIZE;

/// Give the global allocator its backing range. Called once, before the
/// first allocation.
pub fn init(start: usize) {
    // SAFETY: the boot sequence reserves `[start, start + HEAP_SIZE)`
    // exclusively for the heap, mapped and writable.
    unsafe {
        crate::ALLOCATOR.lock().init(start as *mut u8, HEAP_SIZE);
    }
    log::info!("heap: {} KiB at {:#x}", HEAP_SIZE / 1024, start);
}

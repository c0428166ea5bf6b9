//! Ferrite kernel library.
//!
//! A small UNIX-like kernel for single-CPU 32-bit x86: per-process page
//! directories, fork/exec/exit/wait, a sector buffer cache over an IDE
//! driver, an on-disk filesystem with a fixed inode layout, pipes, and
//! an 18-entry syscall surface.
//!
//! The crate doubles as a host library: everything that does not need
//! ring 0 (the filesystem stack, the buffer cache, pipes, the tables)
//! builds and unit-tests on the development machine against a RAM disk.

#![no_std]
#![cfg_attr(target_os = "none", feature(alloc_error_handler))]

extern crate alloc;

// On bare metal the kernel heap backs `alloc`; on the host the system
// allocator does, so tests can use Vec/String normally.
#[cfg(all(target_arch = "x86", target_os = "none"))]
use linked_list_allocator::LockedHeap;

#[cfg(all(target_arch = "x86", target_os = "none"))]
#[global_allocator]
pub static ALLOCATOR: LockedHeap = LockedHeap::empty();

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
extern crate std;

#[macro_use]
pub mod print;

pub mod arch;
pub mod drivers;
pub mod elf;
pub mod error;
pub mod fs;
pub mod kernel;
pub mod logger;
pub mod mm;
pub mod process;
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub mod sched;
pub mod serial;
pub mod sync;
pub mod syscall;

#[cfg(test)]
pub mod testutil;

/// Heap exhaustion is unrecoverable in a no_std kernel.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[alloc_error_handler]
fn alloc_error_handler(layout: core::alloc::Layout) -> ! {
    panic!("kernel heap exhausted: {:?}", layout);
}

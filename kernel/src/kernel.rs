//! The kernel root value.
//!
//! Every process-wide table lives here as a field: CPU state, process
//! table, frame list, buffer cache, disk backend, inode cache, open-file
//! table, pipe table, character-device table, tty. Subsystems are free
//! functions taking `&mut Kernel` plus small index handles, so the
//! ownership picture is explicit and a unit test can build a private
//! kernel of its own. On bare metal there is exactly one instance,
//! reachable through [`kernel()`].

use crate::arch::x86::context::Context;
use crate::drivers::ide::DiskBackend;
use crate::drivers::tty::Tty;
use crate::fs::buffer::{BufCache, BufId};
use crate::fs::file::FileTable;
use crate::fs::inode::{ChrDevTable, InodeCache, InodeId};
use crate::fs::pipe::{PipeId, PipeTable};
use crate::mm::frame_allocator::FrameAllocator;
use crate::mm::page_table::PgDir;
use crate::process::{ProcId, ProcTable};

/// Wait key for `sleep`/`wakeup`. Any two pieces of code that agree on
/// a variant can rendezvous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    /// A buffer becoming un-BUSY or reaching VALID after disk I/O.
    Buf(BufId),
    /// An in-core inode becoming un-BUSY.
    Inode(InodeId),
    /// Data arriving in a pipe.
    PipeRead(PipeId),
    /// Space opening up in a pipe.
    PipeWrite(PipeId),
    /// A child of this process exiting.
    Proc(ProcId),
    /// The frame free-list lock.
    FrameList,
    /// A complete input line in the tty.
    Tty,
}

/// Per-CPU state (there is one CPU).
pub struct Cpu {
    /// Process currently running, or about to run, on this CPU. `None`
    /// while the scheduler itself is on the CPU.
    pub current: Option<ProcId>,
    /// Saved context of the scheduler thread; filled in by the first
    /// switch away from it.
    pub scheduler_context: *mut Context,
    /// The scheduler's own page directory (the boot directory).
    pub pgdir: PgDir,
    /// Simulated EFLAGS for host builds, where there is no real IF bit
    /// to read.
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    pub sim_eflags: u32,
}

impl Cpu {
    pub const fn new() -> Self {
        Self {
            current: None,
            scheduler_context: core::ptr::null_mut(),
            pgdir: PgDir(0),
            #[cfg(not(all(target_arch = "x86", target_os = "none")))]
            sim_eflags: crate::arch::x86::FL_RESERVED | crate::arch::x86::FL_IF,
        }
    }

    #[cfg(all(target_arch = "x86", target_os = "none"))]
    pub fn read_eflags(&self) -> u32 {
        crate::arch::x86::read_eflags()
    }

    #[cfg(all(target_arch = "x86", target_os = "none"))]
    pub fn cli(&mut self) {
        crate::arch::x86::cli();
    }

    #[cfg(all(target_arch = "x86", target_os = "none"))]
    pub fn sti(&mut self) {
        crate::arch::x86::sti();
    }

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    pub fn read_eflags(&self) -> u32 {
        self.sim_eflags
    }

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    pub fn cli(&mut self) {
        self.sim_eflags &= !crate::arch::x86::FL_IF;
    }

    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    pub fn sti(&mut self) {
        self.sim_eflags |= crate::arch::x86::FL_IF;
    }
}

/// The root of everything the kernel owns.
pub struct Kernel {
    pub cpu: Cpu,
    pub procs: ProcTable,
    pub frames: FrameAllocator,
    pub bufs: BufCache,
    pub disk: DiskBackend,
    pub inodes: InodeCache,
    pub files: FileTable,
    pub pipes: PipeTable,
    pub devs: ChrDevTable,
    pub tty: Tty,
}

impl Kernel {
    pub const fn new() -> Self {
        Self {
            cpu: Cpu::new(),
            procs: ProcTable::new(),
            frames: FrameAllocator::new(),
            bufs: BufCache::new(),
            disk: DiskBackend::new_ide(),
            inodes: InodeCache::new(),
            files: FileTable::new(),
            pipes: PipeTable::new(),
            devs: ChrDevTable::new(),
            tty: Tty::new(),
        }
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod global {
    use super::Kernel;
    use core::cell::UnsafeCell;

    struct KernelCell(UnsafeCell<Kernel>);

    // SAFETY: single CPU. Mutation is serialized by the push_cli
    // discipline for short sections and by per-entry BUSY flags for long
    // ones; interrupt handlers run with IF clear on the borrowing
    // process's kernel stack.
    unsafe impl Sync for KernelCell {}

    static KERNEL: KernelCell = KernelCell(UnsafeCell::new(Kernel::new()));

    /// The one kernel instance.
    ///
    /// # Safety
    /// The caller must be the only thread of control touching the tables
    /// it reaches for, which on this single-CPU kernel means: called from
    /// kernel code or an interrupt handler, never re-entered for the same
    /// table without going through the locking discipline.
    pub unsafe fn kernel() -> &'static mut Kernel {
        // SAFETY: see type-level comment.
        unsafe { &mut *KERNEL.0.get() }
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use global::kernel;

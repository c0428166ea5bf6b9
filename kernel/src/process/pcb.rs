//! Process control block.

use super::{CLI_DEPTH, NAME_LEN, NOFILE};
use crate::arch::x86::context::Context;
use crate::arch::x86::trap::TrapFrame;
use crate::fs::file::FileId;
use crate::fs::inode::InodeId;
use crate::kernel::Channel;
use crate::mm::page_table::PgDir;

/// Index of a PCB in the process table. Doubles as the pid, so pids are
/// the smallest free slot at allocation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcId(pub usize);

/// Process state. `Unused` marks a free table slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcState {
    Unused,
    /// Allocated but not yet runnable (being built by fork/boot).
    Newborn,
    Runnable,
    Running,
    Sleeping,
    Zombie,
}

/// Everything the kernel keeps per process.
pub struct Pcb {
    pub pid: u32,
    name: [u8; NAME_LEN],
    name_len: usize,
    pub state: ProcState,
    /// Root of this process's page-map tree; owned.
    pub pgdir: Option<PgDir>,
    /// Kernel stack page (kernel virtual address); owned.
    pub kstack: Option<usize>,
    /// Saved user trap frame, inside `kstack`.
    pub tf: *mut TrapFrame,
    /// Saved kernel context, inside `kstack`.
    pub context: *mut Context,
    /// Saved-EFLAGS stack for push_cli/pop_cli; grows downward from
    /// `CLI_DEPTH`.
    pub cli_stack: [u32; CLI_DEPTH],
    pub cli_sp: usize,
    /// Wait key; `Some` iff state is `Sleeping`.
    pub channel: Option<Channel>,
    /// Current working directory (shared inode reference).
    pub cwd: Option<InodeId>,
    /// fd -> open-file handle.
    pub open_files: [Option<FileId>; NOFILE],
    /// Bytes of user address space from `PROC_LOAD_ADDR`, excluding the
    /// user stack.
    pub size: u32,
    pub parent: Option<ProcId>,
    /// Exit code; meaningful in `Zombie`.
    pub retval: i32,
}

impl Pcb {
    pub const fn unused() -> Self {
        Self {
            pid: 0,
            name: [0; NAME_LEN],
            name_len: 0,
            state: ProcState::Unused,
            pgdir: None,
            kstack: None,
            tf: core::ptr::null_mut(),
            context: core::ptr::null_mut(),
            cli_stack: [0; CLI_DEPTH],
            cli_sp: CLI_DEPTH,
            channel: None,
            cwd: None,
            open_files: [None; NOFILE],
            size: 0,
            parent: None,
            retval: 0,
        }
    }

    /// Return the slot to the `Unused` state, clearing every field.
    pub fn reset(&mut self) {
        *self = Self::unused();
    }

    pub fn set_name(&mut self, name: &[u8]) {
        let n = name.len().min(NAME_LEN);
        self.name[..n].copy_from_slice(&name[..n]);
        self.name_len = n;
    }

    pub fn name(&self) -> &[u8] {
        &self.name[..self.name_len]
    }
}

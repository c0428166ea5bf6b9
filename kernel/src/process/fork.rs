//! `fork`: duplicate the current process.

use super::{table, ProcState};
use crate::fs::file::dup_file;
use crate::fs::inode::dup_inode;
use crate::kernel::Kernel;
use crate::mm::{frame_allocator, vm};
use crate::process::NOFILE;
use crate::sync;

/// Create a child that resumes in user mode exactly where the parent
/// trapped, with its own copy of the address space and shared
/// references to the parent's cwd and open files. Returns the child's
/// pid to the parent; the child's saved trap frame is doctored so that
/// *it* sees 0. `None` when out of PCBs or memory.
pub fn fork(k: &mut Kernel) -> Option<u32> {
    let cur = k.cpu.current.expect("fork: no current process");
    let child = table::alloc_pcb(k)?;
    let pid = k.procs[child].pid;

    let (parent_pgdir, parent_size) = {
        let p = &k.procs[cur];
        (p.pgdir.expect("fork: current process has no pgdir"), p.size)
    };
    let Some(pgdir) = vm::copy_pgdir(k, parent_pgdir, parent_size) else {
        // out of memory: give back the stack and the slot
        let kstack = k.procs[child].kstack.take().expect("fork: child lost its stack");
        frame_allocator::free_frame(k, kstack);
        sync::push_cli(k);
        k.procs[child].reset();
        sync::pop_cli(k);
        return None;
    };

    k.procs[child].pgdir = Some(pgdir);
    k.procs[child].parent = Some(cur);
    k.procs[child].size = parent_size;
    let (name_buf, name_len) = {
        let n = k.procs[cur].name();
        let mut buf = [0u8; super::NAME_LEN];
        buf[..n.len()].copy_from_slice(n);
        (buf, n.len())
    };
    k.procs[child].set_name(&name_buf[..name_len]);

    // SAFETY: both trap frames live at the top of their respective
    // kernel stacks, laid out by the trap path and alloc_pcb.
    unsafe {
        *k.procs[child].tf = *k.procs[cur].tf;
        // fork returns 0 in the child
        (*k.procs[child].tf).eax = 0;
    }

    let cwd = k.procs[cur].cwd.expect("fork: current process has no cwd");
    k.procs[child].cwd = Some(dup_inode(k, cwd));
    for fd in 0..NOFILE {
        if let Some(f) = k.procs[cur].open_files[fd] {
            k.procs[child].open_files[fd] = Some(dup_file(k, f));
        }
    }

    sync::push_cli(k);
    k.procs[child].state = ProcState::Runnable;
    sync::pop_cli(k);

    Some(pid)
}

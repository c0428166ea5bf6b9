//! `exit`: tear the current process down to a zombie.

use super::ProcState;
use crate::arch::x86::context::swtch;
use crate::fs::file::close_file;
use crate::fs::inode::release_inode;
use crate::kernel::{Channel, Kernel};
use crate::mm::{vm, KERNEL_BASE, PROC_LOAD_ADDR};
use crate::process::NOFILE;
use crate::sync;

/// End the current process with status `retval` and switch away for
/// good. Open files and the cwd reference are dropped here; the user
/// pages go too, but the page-table skeleton and the kernel stack stay
/// until the parent collects them in `wait`. Orphans are handed to the
/// init process.
pub fn exit(k: &mut Kernel, retval: i32) -> ! {
    let cur = k.cpu.current.expect("exit: no current process");
    k.procs[cur].retval = retval;

    for fd in 0..NOFILE {
        if let Some(f) = k.procs[cur].open_files[fd].take() {
            close_file(k, f);
        }
    }
    let cwd = k.procs[cur].cwd.take().expect("exit: process has no cwd");
    release_inode(k, cwd);

    let pgdir = k.procs[cur].pgdir.expect("exit: process has no pgdir");
    vm::free_user_range(k, pgdir, PROC_LOAD_ADDR, KERNEL_BASE);
    k.procs[cur].size = 0;

    sync::push_cli(k);

    if let Some(parent) = k.procs[cur].parent {
        sync::wakeup_noint(k, Channel::Proc(parent));
    }

    // Children outliving us belong to init now; zombies among them need
    // init woken so they get reaped.
    let init = k.procs.init.expect("exit: no init process");
    let mut wake_init = false;
    for id in k.procs.ids() {
        if k.procs[id].state != ProcState::Unused && k.procs[id].parent == Some(cur) {
            k.procs[id].parent = Some(init);
            if k.procs[id].state == ProcState::Zombie {
                wake_init = true;
            }
        }
    }
    if wake_init {
        sync::wakeup_noint(k, Channel::Proc(init));
    }

    k.procs[cur].state = ProcState::Zombie;
    // SAFETY: our context slot is on our own kernel stack; the scheduler
    // context is live. We never come back, so the pushed cli level is
    // moot.
    unsafe { swtch(&mut k.procs[cur].context, k.cpu.scheduler_context) };
    unreachable!("exit: a zombie was scheduled");
}

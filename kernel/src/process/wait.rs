//! `wait`: reap exited children.

use super::ProcState;
use crate::kernel::{Channel, Kernel};
use crate::mm::{frame_allocator, vm};
use crate::sync;

/// Wait for any child to exit. Returns `Some((pid, retval))` after
/// reaping one (its kernel stack and page directory freed, its PCB
/// cleared), or `None` if the caller has no children at all.
/// Blocks (sleeping on our own PCB) while children exist but none has
/// exited yet.
pub fn wait(k: &mut Kernel) -> Option<(u32, i32)> {
    let cur = k.cpu.current.expect("wait: no current process");

    sync::push_cli(k);
    loop {
        let mut have_kids = false;
        for id in k.procs.ids() {
            if k.procs[id].state == ProcState::Unused || k.procs[id].parent != Some(cur) {
                continue;
            }
            have_kids = true;
            if k.procs[id].state != ProcState::Zombie {
                continue;
            }

            let pid = k.procs[id].pid;
            let retval = k.procs[id].retval;

            let kstack = k.procs[id].kstack.take().expect("wait: zombie without stack");
            frame_allocator::free_frame(k, kstack);
            let pgdir = k.procs[id].pgdir.take().expect("wait: zombie without pgdir");
            vm::free_pgdir(k, pgdir);
            k.procs[id].reset();

            sync::pop_cli(k);
            return Some((pid, retval));
        }

        if !have_kids {
            sync::pop_cli(k);
            return None;
        }

        // Children exist but none is done; exit() will wake us.
        sync::sleep(k, Channel::Proc(cur));
    }
}

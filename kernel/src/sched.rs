//! Round-robin scheduler.
//!
//! The scheduler runs on its own kernel context; it is not a process
//! and has no PCB. Kernel threads hand the CPU back by switching into
//! `scheduler_context`; the loop picks the next RUNNABLE process, loads
//! its page directory, refreshes the TSS kernel-stack pointer and
//! switches in.

use crate::arch::x86::context::swtch;
use crate::arch::x86::trap::TrapFrame;
use crate::arch::x86::{self, gdt};
use crate::kernel::{kernel, Kernel};
use crate::mm::{v2p, KSTACK_SIZE};
use crate::process::{table, ProcState};

/// The scheduler loop. Never returns.
///
/// Interrupts are opened briefly each round so device interrupts can
/// make sleepers runnable even when nothing else runs.
pub fn scheduler(k: &mut Kernel) -> ! {
    loop {
        x86::sti();
        for _ in 0..1000 {
            core::hint::spin_loop();
        }
        x86::cli();

        for id in k.procs.ids() {
            if k.procs[id].state != ProcState::Runnable {
                continue;
            }

            let pgdir = k.procs[id].pgdir.expect("scheduler: runnable process without pgdir");
            let kstack = k.procs[id].kstack.expect("scheduler: runnable process without stack");
            // SAFETY: the process's pgdir maps the kernel half; switching
            // to it keeps this code addressable.
            unsafe { x86::lcr3(v2p(pgdir.0)) };
            gdt::set_kernel_stack((kstack + KSTACK_SIZE) as u32);
            k.procs[id].state = ProcState::Running;
            k.cpu.current = Some(id);

            // SAFETY: the process context was built by alloc_pcb or saved
            // by a previous switch on its own kernel stack.
            unsafe { swtch(&mut k.cpu.scheduler_context, k.procs[id].context) };

            // The process yielded, slept or died; back to our own root.
            // SAFETY: the scheduler pgdir is the boot directory.
            unsafe { x86::lcr3(v2p(k.cpu.pgdir.0)) };
            k.cpu.current = None;
        }
    }
}

/// Give up the CPU to the scheduler; the caller becomes RUNNABLE and is
/// resumed later. Called from the timer interrupt with IF clear.
pub fn yield_cpu(k: &mut Kernel) {
    let cur = k.cpu.current.expect("yield: no current process");
    k.procs[cur].state = ProcState::Runnable;
    // SAFETY: both contexts live on valid kernel stacks.
    unsafe { swtch(&mut k.procs[cur].context, k.cpu.scheduler_context) };
}

/// Timer tick: preempt whoever is running.
fn timer_irq(_tf: &mut TrapFrame) {
    // SAFETY: interrupt context, IF clear, single CPU.
    let k = unsafe { kernel() };
    if k.cpu.current.is_some() {
        yield_cpu(k);
    }
}

/// First landing point of every forked (and the initial) process, on
/// its own stack with interrupts enabled; returning from here unwinds
/// into `trapret` and drops to user mode.
#[no_mangle]
pub extern "C" fn forkret() {
    // SAFETY: we are the running process; single CPU.
    let k = unsafe { kernel() };

    // The very first process cannot resolve its working directory
    // before the disk stack is usable, which is only the case once it
    // runs. One-shot, from then on fork copies the parent's cwd.
    use core::sync::atomic::{AtomicBool, Ordering};
    static FIRST: AtomicBool = AtomicBool::new(true);
    if FIRST.swap(false, Ordering::Relaxed) {
        let root = crate::fs::path::resolve(k, b"/")
            .expect("forkret: no root directory");
        let cur = k.cpu.current.expect("forkret: no current process");
        k.procs[cur].cwd = Some(root);
    }
}

/// Register the tick handler and start the clock.
pub fn init_timer(hz: u32) {
    crate::arch::x86::trap::register_handler(crate::arch::x86::trap::T_TIMER, timer_irq);
    crate::arch::x86::pit::init(hz);
}

/// Re-export for PCB construction.
pub use table::create_first_proc;

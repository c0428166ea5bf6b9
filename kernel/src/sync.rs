//! Interrupt-disable nesting and the sleep/wakeup rendezvous.
//!
//! `push_cli`/`pop_cli` are the only places outside the scheduler that
//! touch the IF bit. They nest: the first push saves the caller's EFLAGS
//! into the current process's bounded stack and disables interrupts;
//! only the matching outermost pop restores the saved state. `pop_cli`
//! refuses to run with interrupts enabled: the saved-flag stack is
//! process-local, and an enabled window before the pop would let a
//! preemption reorder it.

use crate::arch::x86::FL_IF;
use crate::kernel::{Channel, Kernel};
use crate::process::{ProcState, CLI_DEPTH};

/// Disable interrupts, remembering the previous state on the current
/// process's saved-EFLAGS stack. Fatal without a current process or on
/// overflow.
pub fn push_cli(k: &mut Kernel) {
    let eflags = k.cpu.read_eflags();
    k.cpu.cli();

    let cur = k.cpu.current.expect("push_cli: no running process");
    let p = &mut k.procs[cur];
    if p.cli_sp == 0 || p.cli_sp > CLI_DEPTH {
        panic!("push_cli: saved-eflags stack overflow");
    }
    p.cli_sp -= 1;
    p.cli_stack[p.cli_sp] = eflags;
}

/// Undo one `push_cli`. Re-enables interrupts only if the entry being
/// popped had them enabled (true only for the outermost pair).
pub fn pop_cli(k: &mut Kernel) {
    if k.cpu.read_eflags() & FL_IF != 0 {
        panic!("pop_cli: interrupts are enabled");
    }

    let cur = k.cpu.current.expect("pop_cli: no running process");
    let p = &mut k.procs[cur];
    p.cli_sp += 1;
    if p.cli_sp > CLI_DEPTH {
        panic!("pop_cli: saved-eflags stack underflow");
    }
    let saved = p.cli_stack[p.cli_sp - 1];
    if saved & FL_IF != 0 {
        k.cpu.sti();
    }
}

/// Block the current process on `channel` until a matching wakeup.
///
/// Interrupt state is preserved across the suspension: the switch to the
/// scheduler carries our EFLAGS in the saved context, and the scheduler's
/// own context re-enables. Wakeups can be spurious; callers re-check
/// their condition in a loop.
pub fn sleep(k: &mut Kernel, channel: Channel) {
    push_cli(k);

    let cur = k.cpu.current.expect("sleep: no running process");
    log::trace!("pid {} sleeps on {:?}", k.procs[cur].pid, channel);

    k.procs[cur].channel = Some(channel);
    k.procs[cur].state = ProcState::Sleeping;

    #[cfg(all(target_arch = "x86", target_os = "none"))]
    // SAFETY: our context slot lives on our own kernel stack and the
    // scheduler context was saved by the scheduler loop.
    unsafe {
        crate::arch::x86::context::swtch(
            &mut k.procs[cur].context,
            k.cpu.scheduler_context,
        );
    }
    #[cfg(not(all(target_arch = "x86", target_os = "none")))]
    panic!("sleep: no scheduler on the host (single-threaded test deadlock)");

    #[cfg(all(target_arch = "x86", target_os = "none"))]
    {
        k.procs[cur].channel = None;
        pop_cli(k);
    }
}

/// Make every process sleeping on `channel` runnable. Interrupt-context
/// variant: the caller already runs with IF clear.
pub fn wakeup_noint(k: &mut Kernel, channel: Channel) {
    for p in k.procs.iter_mut() {
        if p.state == ProcState::Sleeping && p.channel == Some(channel) {
            p.state = ProcState::Runnable;
        }
    }
}

/// Thread-context wakeup: wraps [`wakeup_noint`] in its own critical
/// section.
pub fn wakeup(k: &mut Kernel, channel: Channel) {
    push_cli(k);
    wakeup_noint(k, channel);
    pop_cli(k);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::x86::{FL_IF, FL_RESERVED};
    use crate::testutil;

    #[test]
    fn cli_nesting_restores_only_at_outermost_pop() {
        let mut k = testutil::bare_kernel();
        assert!(k.cpu.read_eflags() & FL_IF != 0);

        push_cli(&mut k);
        assert_eq!(k.cpu.read_eflags() & FL_IF, 0);
        push_cli(&mut k);
        pop_cli(&mut k);
        // still nested: interrupts stay off
        assert_eq!(k.cpu.read_eflags() & FL_IF, 0);
        pop_cli(&mut k);
        assert!(k.cpu.read_eflags() & FL_IF != 0);
    }

    #[test]
    fn push_cli_with_interrupts_already_off_stays_off() {
        let mut k = testutil::bare_kernel();
        k.cpu.sim_eflags = FL_RESERVED; // IF clear
        push_cli(&mut k);
        pop_cli(&mut k);
        assert_eq!(k.cpu.read_eflags() & FL_IF, 0);
    }

    #[test]
    #[should_panic(expected = "interrupts are enabled")]
    fn pop_cli_rejects_enabled_interrupts() {
        let mut k = testutil::bare_kernel();
        push_cli(&mut k);
        k.cpu.sim_eflags |= FL_IF;
        pop_cli(&mut k);
    }

    #[test]
    fn wakeup_hits_only_the_matching_channel() {
        let mut k = testutil::bare_kernel();
        let a = testutil::add_sleeping_proc(&mut k, Channel::FrameList);
        let b = testutil::add_sleeping_proc(&mut k, Channel::Tty);

        wakeup(&mut k, Channel::FrameList);
        assert_eq!(k.procs[a].state, ProcState::Runnable);
        assert_eq!(k.procs[b].state, ProcState::Sleeping);
    }
}

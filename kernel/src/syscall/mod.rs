//! System calls.
//!
//! Arguments travel on the user stack, caller-pushes-right-to-left, and
//! are fetched relative to the trap frame's saved `esp` after
//! validation against the two user address ranges. The dispatcher keys
//! off the saved `eax` and writes the result back into it, so IRET
//! returns it to the caller.

pub mod args;

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod file;
#[cfg(all(target_arch = "x86", target_os = "none"))]
mod proc;

pub const SYS_DEBUG: u32 = 0;
pub const SYS_EXEC: u32 = 1;
pub const SYS_FORK: u32 = 2;
pub const SYS_EXIT: u32 = 3;
pub const SYS_WAIT: u32 = 4;
pub const SYS_GETPID: u32 = 5;
pub const SYS_DUP: u32 = 6;
pub const SYS_READ: u32 = 7;
pub const SYS_WRITE: u32 = 8;
pub const SYS_OPEN: u32 = 9;
pub const SYS_CLOSE: u32 = 10;
pub const SYS_FSTAT: u32 = 11;
pub const SYS_LINK: u32 = 12;
pub const SYS_UNLINK: u32 = 13;
pub const SYS_MKDIR: u32 = 14;
pub const SYS_MKNOD: u32 = 15;
pub const SYS_CHDIR: u32 = 16;
pub const SYS_PIPE: u32 = 17;

/// Run the system call named by the current trap frame's `eax` and
/// store its result there. An out-of-range number is a kernel bug or an
/// attack, both fatal.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn dispatch(k: &mut crate::kernel::Kernel) {
    let cur = k.cpu.current.expect("syscall: no current process");
    // SAFETY: tf was just refreshed by the trap dispatcher and points at
    // this entry's frame on our kernel stack.
    let num = unsafe { (*k.procs[cur].tf).eax };

    log::trace!("pid {} syscall {}", k.procs[cur].pid, num);

    let ret: i32 = match num {
        SYS_DEBUG => proc::sys_debug(k),
        SYS_EXEC => proc::sys_exec(k),
        SYS_FORK => proc::sys_fork(k),
        SYS_EXIT => proc::sys_exit(k),
        SYS_WAIT => proc::sys_wait(k),
        SYS_GETPID => proc::sys_getpid(k),
        SYS_DUP => file::sys_dup(k),
        SYS_READ => file::sys_read(k),
        SYS_WRITE => file::sys_write(k),
        SYS_OPEN => file::sys_open(k),
        SYS_CLOSE => file::sys_close(k),
        SYS_FSTAT => file::sys_fstat(k),
        SYS_LINK => file::sys_link(k),
        SYS_UNLINK => file::sys_unlink(k),
        SYS_MKDIR => file::sys_mkdir(k),
        SYS_MKNOD => file::sys_mknod(k),
        SYS_CHDIR => file::sys_chdir(k),
        SYS_PIPE => file::sys_pipe(k),
        _ => panic!("syscall: invalid number {}", num),
    };

    // SAFETY: same frame as above; exec may have redirected eip/esp but
    // the frame itself stays put.
    unsafe { (*k.procs[cur].tf).eax = ret as u32 };
}

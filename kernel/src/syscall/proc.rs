//! Process-side system calls.

use alloc::vec::Vec;

use super::args::{check_str, fetch_int, get_int_arg, get_ptr_arg, get_str_arg, user_bytes};
use crate::kernel::Kernel;
use crate::process::{exec, exit, fork, wait, MAX_ARGS};

/// debug(str): log a user string to the debug port. Returns 5, which
/// user programs use to probe that syscalls work at all.
pub fn sys_debug(k: &mut Kernel) -> i32 {
    let ptr = get_int_arg(k, 0).expect("sys_debug: missing argument");
    let len = check_str(k, ptr).expect("sys_debug: invalid string argument");
    // SAFETY: span validated by check_str.
    let s = unsafe { user_bytes(ptr, len) };
    log::debug!("{}", core::str::from_utf8(s).unwrap_or("<non-utf8>"));
    5
}

/// fork() -> child pid, 0 in the child, -1 on failure
pub fn sys_fork(k: &mut Kernel) -> i32 {
    match fork::fork(k) {
        Some(pid) => pid as i32,
        None => -1,
    }
}

/// exit(code): does not return.
pub fn sys_exit(k: &mut Kernel) -> i32 {
    let code = get_int_arg(k, 0).expect("sys_exit: illegal argument") as i32;
    exit::exit(k, code)
}

/// wait(*code) -> pid of a reaped child, or -1 with no children
pub fn sys_wait(k: &mut Kernel) -> i32 {
    let Ok(ptr) = get_ptr_arg(k, 0, 4) else {
        return -1;
    };
    match wait::wait(k) {
        Some((pid, retval)) => {
            // SAFETY: 4-byte span validated by get_ptr_arg.
            unsafe { core::ptr::write_unaligned(ptr as *mut i32, retval) };
            pid as i32
        }
        None => -1,
    }
}

/// getpid() -> pid
pub fn sys_getpid(k: &mut Kernel) -> i32 {
    let cur = k.cpu.current.expect("getpid: no current process");
    k.procs[cur].pid as i32
}

/// exec(path, argv): validates everything, stages the argument strings
/// into kernel memory, then replaces the image. Returns only on
/// failure.
pub fn sys_exec(k: &mut Kernel) -> i32 {
    let Ok((path_ptr, path_len)) = get_str_arg(k, 0) else {
        return -1;
    };
    let Ok(argv_ptr) = get_int_arg(k, 1) else {
        return -1;
    };

    // Stage argv: walk the user pointer array up to its NULL (or the
    // argument cap), checking every string before copying it in.
    let mut argv: Vec<Vec<u8>> = Vec::new();
    for i in 0..MAX_ARGS as u32 {
        let Ok(arg_ptr) = fetch_int(k, argv_ptr + i * 4) else {
            return -1;
        };
        if arg_ptr == 0 {
            break;
        }
        let Ok(arg_len) = check_str(k, arg_ptr) else {
            return -1;
        };
        // SAFETY: span validated by check_str.
        argv.push(unsafe { user_bytes(arg_ptr, arg_len) }.to_vec());
    }

    // The path has to move into kernel memory too: exec tears down the
    // address space it points into.
    // SAFETY: span validated by get_str_arg.
    let path = unsafe { user_bytes(path_ptr, path_len) }.to_vec();

    match exec::exec(k, &path, &argv) {
        Ok(()) => 0,
        Err(e) => {
            log::debug!("exec failed: {}", e);
            -1
        }
    }
}

//! File-side system calls: marshaling over the fs layers.

use super::args::{get_int_arg, get_ptr_arg, get_str_arg, user_bytes, user_bytes_mut};
use crate::error::KernelResult;
use crate::fs::file::{
    alloc_fd, close_file, do_chdir, do_link, do_mkdir, do_mknod, do_open, do_unlink, dup_file,
    read_file, stat_file, write_file, FileId,
};
use crate::fs::pipe::create_pipe;
use crate::fs::{OpenFlags, Stat};
use crate::kernel::Kernel;
use crate::process::NOFILE;

/// Fetch argument `n` as a file descriptor of the current process.
fn get_fd_arg(k: &mut Kernel, n: u32) -> Option<(i32, FileId)> {
    let fd = get_int_arg(k, n).ok()? as i32;
    if fd < 0 || fd as usize >= NOFILE {
        return None;
    }
    let cur = k.cpu.current.expect("syscall: no current process");
    let f = k.procs[cur].open_files[fd as usize]?;
    Some((fd, f))
}

fn ret(r: KernelResult<u32>) -> i32 {
    match r {
        Ok(n) => n as i32,
        Err(_) => -1,
    }
}

/// dup(fd) -> new fd
pub fn sys_dup(k: &mut Kernel) -> i32 {
    let Some((_, f)) = get_fd_arg(k, 0) else {
        return -1;
    };
    let f = dup_file(k, f);
    match alloc_fd(k, f) {
        Ok(fd) => fd,
        Err(_) => {
            close_file(k, f);
            -1
        }
    }
}

/// read(fd, buf, n) -> bytes read; 0 at EOF, -1 on error or drained pipe
pub fn sys_read(k: &mut Kernel) -> i32 {
    let Some((_, f)) = get_fd_arg(k, 0) else {
        return -1;
    };
    let Ok(n) = get_int_arg(k, 2) else {
        return -1;
    };
    let Ok(ptr) = get_ptr_arg(k, 1, n) else {
        return -1;
    };
    // SAFETY: span validated by get_ptr_arg; the kernel does not touch
    // this user window again during the read.
    let dst = unsafe { user_bytes_mut(ptr, n) };
    ret(read_file(k, f, dst))
}

/// write(fd, buf, n) -> n or -1
pub fn sys_write(k: &mut Kernel) -> i32 {
    let Some((_, f)) = get_fd_arg(k, 0) else {
        return -1;
    };
    let Ok(n) = get_int_arg(k, 2) else {
        return -1;
    };
    let Ok(ptr) = get_ptr_arg(k, 1, n) else {
        return -1;
    };
    // SAFETY: span validated by get_ptr_arg.
    let src = unsafe { user_bytes(ptr, n) };
    ret(write_file(k, f, src))
}

/// open(path, flags) -> fd or -1
pub fn sys_open(k: &mut Kernel) -> i32 {
    let Ok((path, len)) = get_str_arg(k, 0) else {
        return -1;
    };
    let Ok(flags) = get_int_arg(k, 1) else {
        return -1;
    };
    // SAFETY: check_str validated the span, terminator included.
    let path = unsafe { user_bytes(path, len) };
    match do_open(k, path, OpenFlags::from_bits_truncate(flags)) {
        Ok(fd) => fd,
        Err(_) => -1,
    }
}

/// close(fd) -> 0 or -1
pub fn sys_close(k: &mut Kernel) -> i32 {
    let Some((fd, f)) = get_fd_arg(k, 0) else {
        return -1;
    };
    close_file(k, f);
    let cur = k.cpu.current.expect("syscall: no current process");
    k.procs[cur].open_files[fd as usize] = None;
    0
}

/// fstat(fd, *stat) -> 0 or -1
pub fn sys_fstat(k: &mut Kernel) -> i32 {
    let Some((_, f)) = get_fd_arg(k, 0) else {
        return -1;
    };
    let Ok(ptr) = get_ptr_arg(k, 1, core::mem::size_of::<Stat>() as u32) else {
        return -1;
    };
    match stat_file(k, f) {
        Ok(st) => {
            // SAFETY: span validated; Stat is plain old data.
            unsafe { core::ptr::write_unaligned(ptr as *mut Stat, st) };
            0
        }
        Err(_) => -1,
    }
}

/// link(old, new) -> 0 or -1
pub fn sys_link(k: &mut Kernel) -> i32 {
    let Ok((old, old_len)) = get_str_arg(k, 0) else {
        return -1;
    };
    let Ok((new, new_len)) = get_str_arg(k, 1) else {
        return -1;
    };
    // SAFETY: spans validated by check_str.
    let (old, new) = unsafe { (user_bytes(old, old_len), user_bytes(new, new_len)) };
    match do_link(k, old, new) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// unlink(path) -> 0 or -1
pub fn sys_unlink(k: &mut Kernel) -> i32 {
    let Ok((path, len)) = get_str_arg(k, 0) else {
        return -1;
    };
    // SAFETY: span validated by check_str.
    let path = unsafe { user_bytes(path, len) };
    match do_unlink(k, path) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// mkdir(path) -> 0 or -1
pub fn sys_mkdir(k: &mut Kernel) -> i32 {
    let Ok((path, len)) = get_str_arg(k, 0) else {
        return -1;
    };
    // SAFETY: span validated by check_str.
    let path = unsafe { user_bytes(path, len) };
    match do_mkdir(k, path) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// mknod(path, type, major, minor) -> 0 or -1
pub fn sys_mknod(k: &mut Kernel) -> i32 {
    let Ok((path, len)) = get_str_arg(k, 0) else {
        return -1;
    };
    let (Ok(kind), Ok(major), Ok(minor)) =
        (get_int_arg(k, 1), get_int_arg(k, 2), get_int_arg(k, 3))
    else {
        return -1;
    };
    // SAFETY: span validated by check_str.
    let path = unsafe { user_bytes(path, len) };
    match do_mknod(k, path, kind, major as u16, minor as u16) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// chdir(path) -> 0 or -1
pub fn sys_chdir(k: &mut Kernel) -> i32 {
    let Ok((path, len)) = get_str_arg(k, 0) else {
        return -1;
    };
    // SAFETY: span validated by check_str.
    let path = unsafe { user_bytes(path, len) };
    match do_chdir(k, path) {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

/// pipe(fd[2]) -> 0 with both descriptors written, or -1 with the user
/// array untouched.
pub fn sys_pipe(k: &mut Kernel) -> i32 {
    let Ok(ptr) = get_ptr_arg(k, 0, 8) else {
        return -1;
    };
    let Ok((rf, wf)) = create_pipe(k) else {
        return -1;
    };

    let rfd = match alloc_fd(k, rf) {
        Ok(fd) => fd,
        Err(_) => {
            close_file(k, rf);
            close_file(k, wf);
            return -1;
        }
    };
    let wfd = match alloc_fd(k, wf) {
        Ok(fd) => fd,
        Err(_) => {
            let cur = k.cpu.current.expect("syscall: no current process");
            k.procs[cur].open_files[rfd as usize] = None;
            close_file(k, rf);
            close_file(k, wf);
            return -1;
        }
    };

    // SAFETY: an 8-byte span validated by get_ptr_arg.
    unsafe {
        core::ptr::write_unaligned(ptr as *mut i32, rfd);
        core::ptr::write_unaligned((ptr + 4) as *mut i32, wfd);
    }
    0
}

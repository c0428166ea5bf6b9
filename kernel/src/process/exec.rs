//! `exec`: replace the current process image.
//!
//! The new address space is built off to the side and committed in one
//! short critical section at the very end, so any failure before that
//! leaves the calling process untouched.

use alloc::vec::Vec;

use super::MAX_ARGS;
use crate::elf::{ElfHeader, ProgHeader, EHDR_SIZE, PHDR_SIZE, PT_LOAD};
use crate::error::{KernelError, KernelResult};
use crate::fs::inode::{self, lock_inode, release_inode, unlock_inode, InodeId};
use crate::fs::path::{last_element, resolve};
use crate::kernel::Kernel;
use crate::mm::page_table::PgDir;
use crate::mm::{vm, PROC_LOAD_ADDR, USER_STACK_ADDR, USER_STACK_SIZE};
use crate::process::NAME_LEN;
use crate::sync;
use crate::arch::x86;

/// Copy `size` bytes at file offset `off` of the locked inode `ip` into
/// the user range of `pgdir` starting at `addr`, through a small bounce
/// buffer. The destination must already be mapped.
fn load_segment(
    k: &mut Kernel,
    pgdir: PgDir,
    mut addr: u32,
    ip: InodeId,
    mut off: u32,
    size: u32,
) -> KernelResult<()> {
    let mut buf = [0u8; 128];
    let mut left = size as usize;
    while left > 0 {
        let chunk = left.min(buf.len());
        let n = inode::read_inode(k, ip, &mut buf[..chunk], off)? as usize;
        if n == 0 {
            // file ended before filesz: the header lied
            return Err(KernelError::InvalidExecutable { reason: "truncated segment" });
        }
        if vm::copy_out(k, pgdir, addr, &buf[..n]).is_err() {
            return Err(KernelError::InvalidExecutable { reason: "segment outside image" });
        }
        left -= n;
        off += n as u32;
        addr += n as u32;
    }
    Ok(())
}

/// Load the executable at `path` over the current process. `argv` holds
/// the argument strings, already staged into kernel memory by the
/// syscall layer.
///
/// On success execution continues at the image's entry point with the
/// conventional `main(argc, argv)` stack and never returns here; on
/// failure the current process is exactly as it was.
pub fn exec(k: &mut Kernel, path: &[u8], argv: &[Vec<u8>]) -> KernelResult<()> {
    if argv.len() > MAX_ARGS {
        return Err(KernelError::TooManyArguments);
    }

    let ip = resolve(k, path)?;
    lock_inode(k, ip);

    let parsed: KernelResult<(ElfHeader, PgDir, u32)> = (|| {
        let mut raw = [0u8; EHDR_SIZE];
        if inode::read_inode(k, ip, &mut raw, 0)? as usize != EHDR_SIZE {
            return Err(KernelError::InvalidExecutable { reason: "short header" });
        }
        let eh = ElfHeader::parse(&raw)?;

        let pgdir = vm::create_kernel_pgdir(k).ok_or(KernelError::ResourceExhausted {
            resource: "frames",
        })?;

        // Load segments cumulatively; `size` is the high-water mark of
        // the user image, gaps between segments included.
        let mut size = PROC_LOAD_ADDR;
        let result: KernelResult<u32> = (|| {
            for i in 0..eh.phnum as u32 {
                let off = eh.phoff + i * eh.phentsize as u32;
                let mut raw = [0u8; PHDR_SIZE];
                if inode::read_inode(k, ip, &mut raw, off)? as usize != PHDR_SIZE {
                    return Err(KernelError::InvalidExecutable { reason: "short phdr" });
                }
                let ph = ProgHeader::parse(&raw);
                if ph.ptype != PT_LOAD {
                    continue;
                }
                if ph.memsz < ph.filesz {
                    return Err(KernelError::InvalidExecutable { reason: "memsz < filesz" });
                }
                let end = ph
                    .vaddr
                    .checked_add(ph.memsz)
                    .ok_or(KernelError::InvalidExecutable { reason: "segment wraps" })?;
                if vm::alloc_user_range(k, pgdir, size, end) != Some(end) {
                    return Err(KernelError::ResourceExhausted { resource: "frames" });
                }
                size = end;
                load_segment(k, pgdir, ph.vaddr, ip, ph.off, ph.filesz)?;
            }
            Ok(size)
        })();

        match result {
            Ok(size) => Ok((eh, pgdir, size)),
            Err(e) => {
                vm::free_pgdir(k, pgdir);
                Err(e)
            }
        }
    })();

    unlock_inode(k, ip);
    release_inode(k, ip);
    let (eh, pgdir, size) = parsed?;

    match finish_exec(k, path, argv, eh, pgdir, size) {
        Ok(()) => Ok(()),
        Err(e) => {
            vm::free_pgdir(k, pgdir);
            Err(e)
        }
    }
}

/// Build the user stack, then commit the new image to the PCB.
fn finish_exec(
    k: &mut Kernel,
    path: &[u8],
    argv: &[Vec<u8>],
    eh: ElfHeader,
    pgdir: PgDir,
    size: u32,
) -> KernelResult<()> {
    let stack_top = USER_STACK_ADDR + USER_STACK_SIZE;
    if vm::alloc_user_range(k, pgdir, USER_STACK_ADDR, stack_top) != Some(stack_top) {
        return Err(KernelError::ResourceExhausted { resource: "frames" });
    }

    // Push the argument strings, each NUL-terminated and aligned down
    // to 4 bytes, remembering where each one landed.
    let mut esp = stack_top;
    let mut slots = [0u32; MAX_ARGS + 2];
    let mut argc = 0;
    for arg in argv {
        esp = (esp - (arg.len() as u32 + 1)) & !3;
        if vm::copy_out(k, pgdir, esp, arg).is_err()
            || vm::copy_out(k, pgdir, esp + arg.len() as u32, &[0]).is_err()
        {
            return Err(KernelError::InvalidAddress { addr: esp });
        }
        slots[2 + argc] = esp;
        argc += 1;
    }

    // main's frame: argc, argv, then the pointer array (NULL-terminated
    // unless all MAX_ARGS slots are in use).
    slots[0] = argc as u32;
    let mut nslots = argc;
    if argc < MAX_ARGS {
        slots[2 + argc] = 0;
        nslots += 1;
    }
    slots[1] = esp - nslots as u32 * 4;
    esp -= (2 + nslots as u32) * 4;

    let mut raw = [0u8; (MAX_ARGS + 2) * 4];
    for (i, s) in slots[..2 + nslots].iter().enumerate() {
        raw[i * 4..i * 4 + 4].copy_from_slice(&s.to_le_bytes());
    }
    if vm::copy_out(k, pgdir, esp, &raw[..(2 + nslots) * 4]).is_err() {
        return Err(KernelError::InvalidAddress { addr: esp });
    }

    // From here on nothing can fail.
    let cur = k.cpu.current.expect("exec: no current process");
    if let Some((name, len)) = last_element(path) {
        k.procs[cur].set_name(&name[..len.min(NAME_LEN)]);
    }

    let old_pgdir = k.procs[cur].pgdir.expect("exec: process has no pgdir");
    sync::push_cli(k);
    k.procs[cur].size = size;
    // SAFETY: tf points at the live trap frame for this kernel entry.
    unsafe {
        (*k.procs[cur].tf).esp = esp;
        (*k.procs[cur].tf).eip = eh.entry;
    }
    k.procs[cur].pgdir = Some(pgdir);
    // SAFETY: the new pgdir maps the kernel half; we built it.
    unsafe { x86::lcr3(crate::mm::v2p(pgdir.0)) };
    x86::flush_tlb();
    sync::pop_cli(k);

    vm::free_pgdir(k, old_pgdir);
    Ok(())
}

//! User-argument fetch and validation.
//!
//! A user pointer is good only if its whole span lies inside exactly
//! one of two windows: the user stack page, or the loaded image
//! `[PROC_LOAD_ADDR, PROC_LOAD_ADDR + size)`. Everything else is
//! rejected before a single byte is touched: kernel addresses,
//! unmapped gaps, and spans straddling the two windows.

use crate::mm::{PROC_LOAD_ADDR, USER_STACK_ADDR, USER_STACK_SIZE};

/// Does `[addr, addr + len)` sit wholly inside the user stack page?
pub fn span_in_stack(addr: u32, len: u32) -> bool {
    if len == 0 {
        return addr >= USER_STACK_ADDR && addr < USER_STACK_ADDR + USER_STACK_SIZE;
    }
    let Some(last) = addr.checked_add(len - 1) else {
        return false;
    };
    addr >= USER_STACK_ADDR && last < USER_STACK_ADDR + USER_STACK_SIZE
}

/// Does `[addr, addr + len)` sit wholly inside the loaded image of a
/// process occupying `size` bytes from the load address?
pub fn span_in_image(addr: u32, len: u32, size: u32) -> bool {
    let end = PROC_LOAD_ADDR.saturating_add(size);
    if len == 0 {
        return addr >= PROC_LOAD_ADDR && addr < end;
    }
    let Some(last) = addr.checked_add(len - 1) else {
        return false;
    };
    addr >= PROC_LOAD_ADDR && last < end
}

/// A span acceptable as a syscall argument: wholly in one window.
pub fn span_ok(addr: u32, len: u32, size: u32) -> bool {
    span_in_stack(addr, len) || span_in_image(addr, len, size)
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod fetch {
    use super::*;
    use crate::error::{KernelError, KernelResult};
    use crate::kernel::Kernel;

    fn current_size(k: &Kernel) -> u32 {
        let cur = k.cpu.current.expect("syscall args: no current process");
        k.procs[cur].size
    }

    fn saved_esp(k: &Kernel) -> u32 {
        let cur = k.cpu.current.expect("syscall args: no current process");
        // SAFETY: tf points at this entry's trap frame.
        unsafe { (*k.procs[cur].tf).esp }
    }

    /// Read a 32-bit value from user address `addr`.
    pub fn fetch_int(k: &Kernel, addr: u32) -> KernelResult<u32> {
        if !span_ok(addr, 4, current_size(k)) {
            return Err(KernelError::InvalidAddress { addr });
        }
        // SAFETY: the span check proved the doubleword lies in mapped
        // user memory of the current (loaded) address space.
        Ok(unsafe { core::ptr::read_unaligned(addr as *const u32) })
    }

    /// Length of the NUL-terminated string at `addr`, which must lie
    /// inside one window, terminator included.
    pub fn check_str(k: &Kernel, addr: u32) -> KernelResult<u32> {
        let size = current_size(k);
        let mut p = addr;
        while span_ok(p, 1, size) && span_ok(addr, p - addr + 1, size) {
            // SAFETY: the byte at p was just validated.
            if unsafe { *(p as *const u8) } == 0 {
                return Ok(p - addr);
            }
            p += 1;
        }
        Err(KernelError::UnterminatedString { addr })
    }

    /// Fetch the `n`-th 4-byte argument (0-based, left to right) from
    /// the user stack.
    pub fn get_int_arg(k: &Kernel, n: u32) -> KernelResult<u32> {
        fetch_int(k, saved_esp(k) + 4 + 4 * n)
    }

    /// Fetch argument `n` as a pointer to `size` bytes, validated.
    pub fn get_ptr_arg(k: &Kernel, n: u32, size: u32) -> KernelResult<u32> {
        let ptr = get_int_arg(k, n)?;
        if !span_ok(ptr, size, current_size(k)) {
            return Err(KernelError::InvalidAddress { addr: ptr });
        }
        Ok(ptr)
    }

    /// Fetch argument `n` as a NUL-terminated string; returns the
    /// address and length. Empty strings are rejected; no caller has a
    /// meaning for one.
    pub fn get_str_arg(k: &Kernel, n: u32) -> KernelResult<(u32, u32)> {
        let ptr = get_int_arg(k, n)?;
        let len = check_str(k, ptr)?;
        if len == 0 {
            return Err(KernelError::InvalidAddress { addr: ptr });
        }
        Ok((ptr, len))
    }

    /// Borrow user memory previously validated with [`get_ptr_arg`].
    ///
    /// # Safety
    /// `addr..addr+len` must have passed `span_ok` for the current
    /// process during this same kernel entry.
    pub unsafe fn user_bytes<'a>(addr: u32, len: u32) -> &'a [u8] {
        // SAFETY: caller contract; the current pgdir maps the span.
        unsafe { core::slice::from_raw_parts(addr as *const u8, len as usize) }
    }

    /// Mutable variant of [`user_bytes`].
    ///
    /// # Safety
    /// Same as [`user_bytes`], and nothing else may alias the span for
    /// the duration of the borrow.
    pub unsafe fn user_bytes_mut<'a>(addr: u32, len: u32) -> &'a mut [u8] {
        // SAFETY: caller contract.
        unsafe { core::slice::from_raw_parts_mut(addr as *mut u8, len as usize) }
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use fetch::{
    check_str, fetch_int, get_int_arg, get_ptr_arg, get_str_arg, user_bytes, user_bytes_mut,
};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::{KERNEL_BASE, USER_STACK_ADDR};

    #[test]
    fn stack_spans_respect_both_edges() {
        assert!(span_in_stack(USER_STACK_ADDR, 4));
        assert!(span_in_stack(KERNEL_BASE - 4, 4));
        assert!(!span_in_stack(KERNEL_BASE - 3, 4)); // leaks into kernel
        assert!(!span_in_stack(USER_STACK_ADDR - 1, 4)); // starts below
    }

    #[test]
    fn image_spans_track_the_process_size() {
        assert!(span_in_image(PROC_LOAD_ADDR, 16, 0x2000));
        assert!(span_in_image(PROC_LOAD_ADDR + 0x2000 - 4, 4, 0x2000));
        assert!(!span_in_image(PROC_LOAD_ADDR + 0x2000 - 3, 4, 0x2000));
        assert!(!span_in_image(0, 4, 0x2000)); // below the load address
        assert!(!span_in_image(PROC_LOAD_ADDR, 4, 0)); // empty image
    }

    #[test]
    fn spans_may_not_straddle_the_windows() {
        // even with the image grown to its maximum, a span reaching
        // from it into the stack page is rejected: it must sit wholly
        // inside one window
        let max_size = USER_STACK_ADDR - PROC_LOAD_ADDR;
        let huge = max_size + 8;
        assert!(!span_ok(PROC_LOAD_ADDR, huge, max_size));
        assert!(span_ok(USER_STACK_ADDR, 8, max_size));
    }

    #[test]
    fn overflowing_spans_are_rejected() {
        assert!(!span_in_stack(u32::MAX - 1, 8));
        assert!(!span_in_image(u32::MAX - 1, 8, u32::MAX));
    }
}

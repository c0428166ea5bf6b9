//! Line-cooked terminal device (character device major 0, minor 0).
//!
//! Input accumulates in a small ring with three cursors: `r` is where
//! readers consume, `w` is the end of committed (cooked) input, `e` is
//! the edit position. Bytes between `w` and `e` can still be erased with
//! backspace; a newline (or a full ring) commits them and wakes readers.
//! Output goes straight through to the console.

use crate::error::KernelResult;
use crate::kernel::{Channel, Kernel};
use crate::sync;

/// Input ring capacity; must stay a power of two for the index
/// arithmetic.
pub const TTY_INPUT_SIZE: usize = 128;

/// The tty's major device number.
pub const TTY_MAJOR: u16 = 0;

pub struct Tty {
    input: [u8; TTY_INPUT_SIZE],
    /// Read cursor.
    r: u32,
    /// End of committed input.
    w: u32,
    /// Edit cursor (next byte goes here).
    e: u32,
}

impl Tty {
    pub const fn new() -> Self {
        Self {
            input: [0; TTY_INPUT_SIZE],
            r: 0,
            w: 0,
            e: 0,
        }
    }

    fn is_full(&self) -> bool {
        self.e.wrapping_sub(self.r) as usize >= TTY_INPUT_SIZE
    }
}

/// Feed one decoded input byte from the keyboard interrupt. Handles the
/// line editing, echoes, and commits full lines. Interrupt context.
pub fn input_byte(k: &mut Kernel, byte: u8) {
    match byte {
        0x08 => {
            // rub out the last uncommitted byte, on screen as well
            if k.tty.e != k.tty.w {
                k.tty.e = k.tty.e.wrapping_sub(1);
                echo(0x08);
                echo(b' ');
                echo(0x08);
            }
        }
        _ => {
            if k.tty.is_full() {
                // drop input rather than corrupt the line
                return;
            }
            let e = k.tty.e;
            k.tty.input[e as usize % TTY_INPUT_SIZE] = byte;
            k.tty.e = e.wrapping_add(1);
            echo(byte);

            if byte == b'\n' || k.tty.is_full() {
                k.tty.w = k.tty.e;
                sync::wakeup_noint(k, Channel::Tty);
            }
        }
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
fn echo(byte: u8) {
    super::console::write_char(byte);
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
fn echo(_byte: u8) {}

/// Read up to one line (or `dst.len()` bytes, whichever ends first) from
/// the committed input, sleeping while there is nothing to read.
pub fn tty_read(k: &mut Kernel, dst: &mut [u8]) -> KernelResult<u32> {
    let mut n = 0;

    sync::push_cli(k);
    while n < dst.len() {
        while k.tty.r == k.tty.w {
            sync::sleep(k, Channel::Tty);
        }
        let r = k.tty.r;
        let byte = k.tty.input[r as usize % TTY_INPUT_SIZE];
        k.tty.r = r.wrapping_add(1);
        dst[n] = byte;
        n += 1;
        if byte == b'\n' {
            break;
        }
    }
    sync::pop_cli(k);

    Ok(n as u32)
}

/// Write through to the console, under cli so lines stay whole.
pub fn tty_write(k: &mut Kernel, src: &[u8]) -> KernelResult<u32> {
    sync::push_cli(k);
    for &byte in src {
        echo(byte);
    }
    sync::pop_cli(k);
    Ok(src.len() as u32)
}

/// Register the tty in the character-device table.
pub fn init(k: &mut Kernel) {
    k.devs.register(TTY_MAJOR, crate::fs::inode::ChrDev {
        read: tty_read,
        write: tty_write,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::ProcState;
    use crate::testutil;

    #[test]
    fn committed_lines_are_readable_one_at_a_time() {
        let mut k = testutil::bare_kernel();
        for &b in b"hi\nyo\n" {
            input_byte(&mut k, b);
        }

        let mut buf = [0u8; 16];
        let n = tty_read(&mut k, &mut buf).unwrap() as usize;
        assert_eq!(&buf[..n], b"hi\n");
        let n = tty_read(&mut k, &mut buf).unwrap() as usize;
        assert_eq!(&buf[..n], b"yo\n");
    }

    #[test]
    fn backspace_edits_the_uncommitted_tail() {
        let mut k = testutil::bare_kernel();
        for &b in b"cat" {
            input_byte(&mut k, b);
        }
        input_byte(&mut k, 0x08);
        input_byte(&mut k, 0x08);
        for &b in b"d\n" {
            input_byte(&mut k, b);
        }

        let mut buf = [0u8; 16];
        let n = tty_read(&mut k, &mut buf).unwrap() as usize;
        assert_eq!(&buf[..n], b"cd\n");
    }

    #[test]
    fn newline_wakes_tty_sleepers() {
        let mut k = testutil::bare_kernel();
        let sleeper = testutil::add_sleeping_proc(&mut k, Channel::Tty);
        for &b in b"x\n" {
            input_byte(&mut k, b);
        }
        assert_eq!(k.procs[sleeper].state, ProcState::Runnable);
    }

    #[test]
    fn short_reads_stop_at_the_buffer_not_the_line() {
        let mut k = testutil::bare_kernel();
        for &b in b"abcdef\n" {
            input_byte(&mut k, b);
        }
        let mut buf = [0u8; 3];
        let n = tty_read(&mut k, &mut buf).unwrap() as usize;
        assert_eq!(&buf[..n], b"abc");
    }
}

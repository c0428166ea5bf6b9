//! 8253/8254 programmable interval timer.

use super::{pic, port::outb};

/// Base oscillator frequency of the PIT.
const PIT_HZ: u32 = 1_193_180;

const CHANNEL0_DATA: u16 = 0x40;
const COMMAND: u16 = 0x43;

/// Program channel 0 as the scheduler tick source at roughly `hz`
/// interrupts per second. `hz` must lie in 19..=1193180.
pub fn init(hz: u32) {
    assert!((19..=PIT_HZ).contains(&hz), "pit: frequency out of range");
    let divisor = PIT_HZ / hz;

    // SAFETY: command 0x36 = channel 0, lobyte/hibyte access, mode 3
    // (square wave); the divisor follows in two byte writes.
    unsafe {
        outb(COMMAND, 0x36);
        outb(CHANNEL0_DATA, divisor as u8);
        outb(CHANNEL0_DATA, (divisor >> 8) as u8);
    }

    pic::enable_line(0);
}

//! PS/2 keyboard.
//!
//! The IRQ 1 handler pulls scancodes from the controller and runs them
//! through `pc-keyboard` (scancode set 1, US layout); decoded characters
//! feed the tty's input ring. Everything non-character (modifiers held
//! alone, key releases) decodes to nothing and is dropped here.

use lazy_static::lazy_static;
use pc_keyboard::{layouts::Us104Key, DecodedKey, HandleControl, Keyboard, ScancodeSet1};
use spin::Mutex;

use crate::arch::x86::pic;
use crate::arch::x86::port::inb;
use crate::arch::x86::trap::{register_handler, TrapFrame, T_KEYBOARD};
use crate::drivers::tty;

const STATUS_PORT: u16 = 0x64;
const DATA_PORT: u16 = 0x60;

/// Output-buffer-full bit in the controller status byte.
const STATUS_DATA_READY: u8 = 0x01;

lazy_static! {
    static ref KEYBOARD: Mutex<Keyboard<Us104Key, ScancodeSet1>> = Mutex::new(Keyboard::new(
        ScancodeSet1::new(),
        Us104Key,
        HandleControl::Ignore,
    ));
}

fn kbd_irq(_tf: &mut TrapFrame) {
    // SAFETY: reading controller status has no side effect.
    if unsafe { inb(STATUS_PORT) } & STATUS_DATA_READY == 0 {
        return;
    }
    // SAFETY: the status bit says one scancode byte is waiting.
    let scancode = unsafe { inb(DATA_PORT) };

    let mut keyboard = KEYBOARD.lock();
    let Ok(Some(event)) = keyboard.add_byte(scancode) else {
        return;
    };
    let Some(key) = keyboard.process_keyevent(event) else {
        return;
    };
    drop(keyboard);

    if let DecodedKey::Unicode(ch) = key {
        if ch.is_ascii() {
            // SAFETY: interrupt context, IF clear, single CPU.
            let k = unsafe { crate::kernel::kernel() };
            tty::input_byte(k, ch as u8);
        }
    }
}

/// Register the IRQ 1 handler and unmask the line.
pub fn init() {
    register_handler(T_KEYBOARD, kbd_irq);
    pic::enable_line(1);
}

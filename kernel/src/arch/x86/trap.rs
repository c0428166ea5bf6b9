//! Central trap frame and interrupt dispatch.

#[cfg(all(target_arch = "x86", target_os = "none"))]
use super::pic;

/// Saved-register image built by the interrupt entry stubs.
///
/// Doubles as the syscall argument-fetch base and as the IRET return
/// image. `esp`/`ss` at the end exist only for traps that crossed from
/// ring 3; kernel-mode traps stop after `eflags`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct TrapFrame {
    // pushad order, low address first
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    pub _esp: u32, // saved by pushad, ignored by popad
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,

    // segment selectors, pushed as doublewords
    pub gs: u16,
    pub padding1: u16,
    pub fs: u16,
    pub padding2: u16,
    pub es: u16,
    pub padding3: u16,
    pub ds: u16,
    pub padding4: u16,
    pub trap_no: u32,

    // pushed by hardware (error code substituted with 0 where absent)
    pub err_code: u32,
    pub eip: u32,
    pub cs: u16,
    pub padding5: u16,
    pub eflags: u32,

    // only present when crossing rings
    pub esp: u32,
    pub ss: u16,
    pub padding6: u16,
}

/// Vector numbers the kernel cares about by name.
pub const T_PAGE_FAULT: u32 = 14;
pub const T_IRQ0: u32 = 32;
pub const T_TIMER: u32 = T_IRQ0;
pub const T_KEYBOARD: u32 = T_IRQ0 + 1;
pub const T_IDE: u32 = T_IRQ0 + 14;
pub const T_SYSCALL: u32 = 255;

/// Handler registered for a single vector.
pub type InterruptHandler = fn(&mut TrapFrame);

#[cfg(all(target_arch = "x86", target_os = "none"))]
static mut HANDLERS: [Option<InterruptHandler>; 256] = [None; 256];

/// Register the handler for one interrupt vector.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn register_handler(vector: u32, handler: InterruptHandler) {
    // SAFETY: called during single-threaded boot, before interrupts are
    // delivered; afterwards the table is only read.
    unsafe { HANDLERS[vector as usize] = Some(handler) };
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
fn handler_for(vector: u32) -> Option<InterruptHandler> {
    // SAFETY: read-only after boot, see register_handler.
    unsafe { HANDLERS[vector as usize] }
}

/// The single entry point called by the assembly stubs.
///
/// Exceptions go to their registered handler or panic; external IRQs get
/// their EOI first; the syscall gate refreshes `current.tf` before
/// dispatching so nested kernel entries always find the newest frame.
#[cfg(all(target_arch = "x86", target_os = "none"))]
#[no_mangle]
pub extern "C" fn trap_dispatch(tf: &mut TrapFrame) {
    match tf.trap_no {
        0..=31 => match handler_for(tf.trap_no) {
            Some(handler) => handler(tf),
            None => {
                println!(
                    "unexpected exception {} eip {:#x} err {:#x}",
                    tf.trap_no, tf.eip, tf.err_code
                );
                panic!("trap_dispatch: unhandled exception");
            }
        },
        32..=47 => match tf.trap_no {
            T_TIMER | T_KEYBOARD | T_IDE => {
                pic::send_eoi(tf.trap_no as u8);
                match handler_for(tf.trap_no) {
                    Some(handler) => handler(tf),
                    None => panic!("trap_dispatch: timer/kbd/ide interrupt unhandled"),
                }
            }
            _ => {
                log::warn!(
                    "unexpected IRQ {} eip {:#x} err {:#x}",
                    tf.trap_no,
                    tf.eip,
                    tf.err_code
                );
            }
        },
        T_SYSCALL => {
            // SAFETY: single CPU; the global kernel is only reachable from
            // this thread of control while we are inside the trap.
            let k = unsafe { crate::kernel::kernel() };
            let cur = k.cpu.current.expect("syscall with no current process");
            // The frame for this entry may sit at a different depth of the
            // kernel stack than the previous one.
            k.procs[cur].tf = tf as *mut TrapFrame;
            crate::syscall::dispatch(k);
        }
        _ => {
            println!(
                "unexpected interrupt {} eip {:#x} err {:#x}",
                tf.trap_no, tf.eip, tf.err_code
            );
            panic!("trap_dispatch: unexpected interrupt");
        }
    }
}

/// #PF error-code bits.
#[cfg(all(target_arch = "x86", target_os = "none"))]
mod pf {
    pub const PRESENT: u32 = 0x1;
    pub const WRITE: u32 = 0x2;
    pub const USER: u32 = 0x4;
    pub const RSVD: u32 = 0x8;
    pub const IFETCH: u32 = 0x10;
}

/// Page faults are fatal in this kernel (no demand paging); decode the
/// fault as far as the hardware tells us, then stop.
#[cfg(all(target_arch = "x86", target_os = "none"))]
pub fn page_fault_handler(tf: &mut TrapFrame) {
    let cr2 = super::rcr2();
    println!("----- PAGE FAULT -----");
    println!("linear addr {:#010x}, cs:eip {:#06x}:{:#010x}", cr2, tf.cs, tf.eip);
    println!(
        "{} during a {} in {} mode{}{}",
        if tf.err_code & pf::PRESENT != 0 {
            "protection violation"
        } else {
            "non-present page"
        },
        if tf.err_code & pf::WRITE != 0 { "write" } else { "read" },
        if tf.err_code & pf::USER != 0 { "user" } else { "supervisor" },
        if tf.err_code & pf::RSVD != 0 { ", reserved bit set" } else { "" },
        if tf.err_code & pf::IFETCH != 0 { ", instruction fetch" } else { "" },
    );
    panic!("page fault");
}

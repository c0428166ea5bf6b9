//! IDT setup and the interrupt entry stubs.
//!
//! Every vector funnels through `alltraps`, which finishes the
//! [`super::trap::TrapFrame`] the hardware started and calls the Rust
//! dispatcher; `trapret` unwinds the frame and IRETs. New processes are
//! launched by pointing their forged kernel stack at `trapret`.

use core::arch::global_asm;

use super::trap::T_SYSCALL;

// Entry stubs. Vectors without a hardware error code push a zero so the
// frame layout is uniform.
global_asm!(
    r#"
.macro ISR_NOERR n
.global isr\n
isr\n:
    push 0
    push \n
    jmp alltraps
.endm

.macro ISR_ERR n
.global isr\n
isr\n:
    push \n
    jmp alltraps
.endm

ISR_NOERR 0
ISR_NOERR 1
ISR_NOERR 2
ISR_NOERR 3
ISR_NOERR 4
ISR_NOERR 5
ISR_NOERR 6
ISR_NOERR 7
ISR_ERR   8
ISR_NOERR 9
ISR_ERR   10
ISR_ERR   11
ISR_ERR   12
ISR_ERR   13
ISR_ERR   14
ISR_NOERR 15
ISR_NOERR 16
ISR_ERR   17
ISR_NOERR 18
ISR_NOERR 19
ISR_NOERR 20
ISR_NOERR 21
ISR_NOERR 22
ISR_NOERR 23
ISR_NOERR 24
ISR_NOERR 25
ISR_NOERR 26
ISR_NOERR 27
ISR_NOERR 28
ISR_NOERR 29
ISR_NOERR 30
ISR_NOERR 31
ISR_NOERR 32
ISR_NOERR 33
ISR_NOERR 34
ISR_NOERR 35
ISR_NOERR 36
ISR_NOERR 37
ISR_NOERR 38
ISR_NOERR 39
ISR_NOERR 40
ISR_NOERR 41
ISR_NOERR 42
ISR_NOERR 43
ISR_NOERR 44
ISR_NOERR 45
ISR_NOERR 46
ISR_NOERR 47
ISR_NOERR 255

.global alltraps
alltraps:
    push ds
    push es
    push fs
    push gs
    pushad
    # kernel data selector
    mov ax, 0x10
    mov ds, ax
    mov es, ax
    push esp
    call trap_dispatch
    add esp, 4

.global trapret
trapret:
    popad
    pop gs
    pop fs
    pop es
    pop ds
    add esp, 8
    iretd
"#
);

extern "C" {
    fn isr0();
    fn isr1();
    fn isr2();
    fn isr3();
    fn isr4();
    fn isr5();
    fn isr6();
    fn isr7();
    fn isr8();
    fn isr9();
    fn isr10();
    fn isr11();
    fn isr12();
    fn isr13();
    fn isr14();
    fn isr15();
    fn isr16();
    fn isr17();
    fn isr18();
    fn isr19();
    fn isr20();
    fn isr21();
    fn isr22();
    fn isr23();
    fn isr24();
    fn isr25();
    fn isr26();
    fn isr27();
    fn isr28();
    fn isr29();
    fn isr30();
    fn isr31();
    fn isr32();
    fn isr33();
    fn isr34();
    fn isr35();
    fn isr36();
    fn isr37();
    fn isr38();
    fn isr39();
    fn isr40();
    fn isr41();
    fn isr42();
    fn isr43();
    fn isr44();
    fn isr45();
    fn isr46();
    fn isr47();
    fn isr255();
    /// Restore a trap frame and IRET; also the launch path of new
    /// processes (see `process::table`).
    pub fn trapret();
}

/// Gate descriptor.
#[repr(C, packed)]
#[derive(Clone, Copy)]
struct IdtEntry {
    offset_low: u16,
    selector: u16,
    always_zero: u8,
    attributes: u8,
    offset_high: u16,
}

impl IdtEntry {
    const fn missing() -> Self {
        Self {
            offset_low: 0,
            selector: 0,
            always_zero: 0,
            attributes: 0,
            offset_high: 0,
        }
    }

    fn new(offset: u32, selector: u16, attributes: u8) -> Self {
        Self {
            offset_low: offset as u16,
            selector,
            always_zero: 0,
            attributes,
            offset_high: (offset >> 16) as u16,
        }
    }
}

#[repr(C, packed)]
struct IdtPointer {
    limit: u16,
    base: u32,
}

const IDT_ENTRIES: usize = 256;

/// Interrupt gate, present, DPL 0.
const GATE_INT_DPL0: u8 = 0x8E;
/// Trap gate, present, DPL 3: the syscall gate must be reachable from
/// ring 3 and must not mask interrupts on entry.
const GATE_TRAP_DPL3: u8 = 0xEF;

static mut IDT: [IdtEntry; IDT_ENTRIES] = [IdtEntry::missing(); IDT_ENTRIES];

/// Build the IDT and load IDTR. A cleared entry (P=0) turns a stray
/// vector into a fault instead of a wild jump.
pub fn init() {
    const KCODE_SEL: u16 = 0x08;

    let vectors: [unsafe extern "C" fn(); 48] = [
        isr0, isr1, isr2, isr3, isr4, isr5, isr6, isr7, isr8, isr9, isr10, isr11, isr12, isr13,
        isr14, isr15, isr16, isr17, isr18, isr19, isr20, isr21, isr22, isr23, isr24, isr25, isr26,
        isr27, isr28, isr29, isr30, isr31, isr32, isr33, isr34, isr35, isr36, isr37, isr38, isr39,
        isr40, isr41, isr42, isr43, isr44, isr45, isr46, isr47,
    ];

    // SAFETY: boot is single threaded and interrupts are still off; the
    // table becomes immutable before the first `sti`.
    unsafe {
        for (vector, stub) in vectors.iter().enumerate() {
            IDT[vector] = IdtEntry::new(*stub as usize as u32, KCODE_SEL, GATE_INT_DPL0);
        }
        IDT[T_SYSCALL as usize] =
            IdtEntry::new(isr255 as usize as u32, KCODE_SEL, GATE_TRAP_DPL3);

        let ptr = IdtPointer {
            limit: (IDT_ENTRIES * core::mem::size_of::<IdtEntry>() - 1) as u16,
            base: core::ptr::addr_of!(IDT) as u32,
        };
        core::arch::asm!("lidt [{}]", in(reg) &ptr, options(readonly, nostack, preserves_flags));
    }
}

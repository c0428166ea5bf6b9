//! Flat GDT and the task-state segment.
//!
//! Six descriptors: null, kernel code/data, user code/data, TSS. The only
//! piece that changes after boot is `TSS.esp0`, which the scheduler points
//! at the incoming process's kernel stack before every switch.

/// Segment selectors derived from the fixed GDT layout.
pub const SEL_KCODE: u16 = 1 << 3;
pub const SEL_KDATA: u16 = 2 << 3;
pub const SEL_UCODE: u16 = (3 << 3) | 3;
pub const SEL_UDATA: u16 = (4 << 3) | 3;
pub const SEL_TSS: u16 = 5 << 3;

#[repr(C, packed)]
#[derive(Clone, Copy)]
struct GdtEntry {
    limit_low: u16,
    base_low: u16,
    base_middle: u8,
    access: u8,
    granularity: u8,
    base_high: u8,
}

impl GdtEntry {
    const fn null() -> Self {
        Self {
            limit_low: 0,
            base_low: 0,
            base_middle: 0,
            access: 0,
            granularity: 0,
            base_high: 0,
        }
    }

    const fn flat(access: u8) -> Self {
        // base 0, limit 0xFFFFF pages, 32-bit, 4K granularity
        Self {
            limit_low: 0xFFFF,
            base_low: 0,
            base_middle: 0,
            access,
            granularity: 0xCF,
            base_high: 0,
        }
    }

    fn system(base: u32, limit: u32, access: u8) -> Self {
        Self {
            limit_low: limit as u16,
            base_low: base as u16,
            base_middle: (base >> 16) as u8,
            access,
            granularity: ((limit >> 16) & 0x0F) as u8,
            base_high: (base >> 24) as u8,
        }
    }
}

#[repr(C, packed)]
struct GdtPointer {
    limit: u16,
    base: u32,
}

/// Intel 32-bit TSS. Only `ss0`/`esp0` (and the I/O map base) matter to
/// this kernel; everything else stays zero.
#[repr(C, packed)]
#[derive(Clone, Copy)]
pub struct TaskState {
    pub link: u16,
    padding0: u16,
    pub esp0: u32,
    pub ss0: u16,
    padding1: u16,
    pub esp1: u32,
    pub ss1: u16,
    padding2: u16,
    pub esp2: u32,
    pub ss2: u16,
    padding3: u16,
    pub cr3: u32,
    pub eip: u32,
    pub eflags: u32,
    pub eax: u32,
    pub ecx: u32,
    pub edx: u32,
    pub ebx: u32,
    pub esp: u32,
    pub ebp: u32,
    pub esi: u32,
    pub edi: u32,
    pub es: u16,
    padding4: u16,
    pub cs: u16,
    padding5: u16,
    pub ss: u16,
    padding6: u16,
    pub ds: u16,
    padding7: u16,
    pub fs: u16,
    padding8: u16,
    pub gs: u16,
    padding9: u16,
    pub ldt: u16,
    padding10: u16,
    pub trap: u16,
    pub iomb: u16,
}

impl TaskState {
    const fn zeroed() -> Self {
        // SAFETY: TaskState is plain old data; the all-zero pattern is the
        // canonical empty TSS.
        unsafe { core::mem::MaybeUninit::zeroed().assume_init() }
    }
}

static mut GDT: [GdtEntry; 6] = [GdtEntry::null(); 6];
static mut TSS: TaskState = TaskState::zeroed();

/// Point `TSS.esp0` at the top of the incoming process's kernel stack.
pub fn set_kernel_stack(esp0: u32) {
    // SAFETY: single CPU; the scheduler is the only writer once boot is
    // done, and the CPU reads the TSS only on a privilege transition.
    unsafe { TSS.esp0 = esp0 };
}

/// Build the GDT, load GDTR, reload the segment registers and TR.
pub fn init() {
    // SAFETY: boot is single threaded; the descriptors are immutable once
    // loaded (only the TSS contents change afterwards).
    unsafe {
        GDT[1] = GdtEntry::flat(0x9A); // ring 0 code
        GDT[2] = GdtEntry::flat(0x92); // ring 0 data
        GDT[3] = GdtEntry::flat(0xFA); // ring 3 code
        GDT[4] = GdtEntry::flat(0xF2); // ring 3 data

        TSS.ss0 = SEL_KDATA;
        TSS.iomb = core::mem::size_of::<TaskState>() as u16;
        let tss_base = core::ptr::addr_of!(TSS) as u32;
        let tss_limit = core::mem::size_of::<TaskState>() as u32 - 1;
        GDT[5] = GdtEntry::system(tss_base, tss_limit, 0x89); // available 32-bit TSS

        let ptr = GdtPointer {
            limit: (core::mem::size_of::<[GdtEntry; 6]>() - 1) as u16,
            base: core::ptr::addr_of!(GDT) as u32,
        };
        core::arch::asm!(
            "lgdt [{ptr}]",
            // reload CS with a far jump, then the data segments
            "push {kcode}",
            "lea {tmp}, [2f]",
            "push {tmp}",
            "retf",
            "2:",
            "mov ds, {kdata:x}",
            "mov es, {kdata:x}",
            "mov fs, {kdata:x}",
            "mov gs, {kdata:x}",
            "mov ss, {kdata:x}",
            ptr = in(reg) &ptr,
            kcode = const SEL_KCODE as u32,
            kdata = in(reg) SEL_KDATA as u32,
            tmp = out(reg) _,
        );
        core::arch::asm!("ltr {0:x}", in(reg) SEL_TSS, options(nostack, preserves_flags));
    }
}

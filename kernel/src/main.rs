//! Bare-metal kernel entry.
//!
//! The bootstrap (multiboot loader plus early paging, outside this
//! crate) lands in `kmain` with the kernel mapped in the upper half,
//! a valid stack, and interrupts off.

#![cfg_attr(all(target_arch = "x86", target_os = "none"), no_std)]
#![cfg_attr(all(target_arch = "x86", target_os = "none"), no_main)]

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod boot {
    use core::panic::PanicInfo;

    use ferrite_kernel::arch::x86::trap::{register_handler, T_PAGE_FAULT};
    use ferrite_kernel::arch::x86::{gdt, idt, pic, trap};
    use ferrite_kernel::drivers::{console, ide, keyboard, tty};
    use ferrite_kernel::kernel::kernel;
    use ferrite_kernel::mm::page_table::PgDir;
    use ferrite_kernel::mm::{heap, p2v, page_up, HEAP_SIZE, MEM_CAP};
    use ferrite_kernel::{arch, println, sched, serial_println};

    extern "C" {
        // End of the kernel image (virtual), from the linker script.
        static kernel_end_addr: u8;
        // The boot page directory the loader enabled paging with; it
        // stays the scheduler's address space.
        static boot_page_directory: u8;
    }

    /// Scheduler tick rate.
    const TICK_HZ: u32 = 50;

    #[no_mangle]
    pub extern "C" fn kmain() -> ! {
        console::init();
        println!("ferrite {} booting", env!("CARGO_PKG_VERSION"));
        ferrite_kernel::logger::init(log::LevelFilter::Info);

        gdt::init();
        idt::init();
        pic::init();

        // SAFETY: boot is single threaded; nothing else touches the
        // kernel root yet.
        let k = unsafe { kernel() };
        // SAFETY: linker symbols are addresses, not data.
        let (kernel_end, boot_pgdir) = unsafe {
            (
                core::ptr::addr_of!(kernel_end_addr) as usize,
                core::ptr::addr_of!(boot_page_directory) as usize,
            )
        };
        k.cpu.pgdir = PgDir(boot_pgdir);

        // Carve the free region: a fixed heap first, frames after.
        let heap_start = page_up(kernel_end as u32) as usize;
        heap::init(heap_start);
        k.frames.init(heap_start + HEAP_SIZE, p2v(MEM_CAP));

        register_handler(T_PAGE_FAULT, trap::page_fault_handler);
        sched::init_timer(TICK_HZ);
        ide::init();
        keyboard::init();
        tty::init(k);

        log::info!(
            "{} frames free, tick {} Hz",
            k.frames.free_frames(),
            TICK_HZ
        );

        sched::create_first_proc(k);
        sched::scheduler(k)
    }

    /// Fatal error: report on both sinks and stop the machine.
    #[panic_handler]
    fn panic(info: &PanicInfo) -> ! {
        println!("KERNEL PANIC: {}", info);
        serial_println!("KERNEL PANIC: {}", info);
        arch::halt();
    }
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
fn main() {
    // The kernel binary only means something on bare metal; the library
    // (and its tests) are the host-side surface.
    eprintln!("ferrite-kernel is a bare-metal image; build it for the i686-ferrite target");
}

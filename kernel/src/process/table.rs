//! The process table and PCB allocation.

use super::{Pcb, ProcId, ProcState, NPROC};

/// Fixed pool of PCBs. The first process to be scheduled (init) is
/// remembered so orphans can be reparented to it.
pub struct ProcTable {
    pcbs: [Pcb; NPROC],
    /// The initial process, once created.
    pub init: Option<ProcId>,
}

impl ProcTable {
    pub const fn new() -> Self {
        const UNUSED: Pcb = Pcb::unused();
        Self {
            pcbs: [UNUSED; NPROC],
            init: None,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &Pcb> {
        self.pcbs.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Pcb> {
        self.pcbs.iter_mut()
    }

    pub fn ids(&self) -> impl Iterator<Item = ProcId> {
        (0..NPROC).map(ProcId)
    }
}

impl core::ops::Index<ProcId> for ProcTable {
    type Output = Pcb;

    fn index(&self, id: ProcId) -> &Pcb {
        &self.pcbs[id.0]
    }
}

impl core::ops::IndexMut<ProcId> for ProcTable {
    fn index_mut(&mut self, id: ProcId) -> &mut Pcb {
        &mut self.pcbs[id.0]
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod creation {
    use super::*;
    use crate::arch::x86::context::Context;
    use crate::arch::x86::trap::TrapFrame;
    use crate::arch::x86::{gdt, idt, FL_IF, FL_IOPL_0, FL_RESERVED};
    use crate::kernel::Kernel;
    use crate::mm::{frame_allocator, vm, KSTACK_SIZE, PROC_LOAD_ADDR, USER_STACK_ADDR,
        USER_STACK_SIZE};
    use crate::sync;

    /// Find an `Unused` slot and claim it under push_cli.
    fn claim_slot(k: &mut Kernel) -> Option<ProcId> {
        sync::push_cli(k);
        for id in k.procs.ids() {
            if k.procs[id].state == ProcState::Unused {
                k.procs[id].state = ProcState::Newborn;
                sync::pop_cli(k);
                return Some(id);
            }
        }
        sync::pop_cli(k);
        None
    }

    /// Lay out a fresh kernel stack so the new process, once switched
    /// to, runs `forkret` and then falls into `trapret`:
    ///
    /// ```text
    ///   top ->  [ TrapFrame ]      <- pcb.tf
    ///           [ &trapret  ]         return address for forkret
    ///           [ Context   ]      <- pcb.context, eip = forkret
    /// ```
    ///
    /// The forged context has IF set so the process starts interruptible.
    fn build_kstack(k: &mut Kernel, id: ProcId, kstack: usize) {
        let mut sp = kstack + KSTACK_SIZE;

        sp -= core::mem::size_of::<TrapFrame>();
        let tf = sp as *mut TrapFrame;

        sp -= 4;
        // SAFETY: sp stays inside the fresh kernel stack frame.
        unsafe { *(sp as *mut u32) = idt::trapret as usize as u32 };

        sp -= core::mem::size_of::<Context>();
        let context = sp as *mut Context;
        // SAFETY: as above; the frame was zeroed at allocation.
        unsafe {
            *context = Context {
                eip: crate::sched::forkret as usize as u32,
                eflags: FL_RESERVED | FL_IF | FL_IOPL_0,
                ..Context::zeroed()
            };
        }

        let p = &mut k.procs[id];
        p.kstack = Some(kstack);
        p.tf = tf;
        p.context = context;
    }

    /// Allocate a PCB: smallest free slot, pid = slot index, cleared
    /// cli stack, zeroed kernel stack with the forkret/trapret image.
    /// Returns `None` when the table is full.
    pub fn alloc_pcb(k: &mut Kernel) -> Option<ProcId> {
        let id = claim_slot(k)?;

        let p = &mut k.procs[id];
        p.pid = id.0 as u32;
        p.cli_stack = [0; super::super::CLI_DEPTH];
        p.cli_sp = super::super::CLI_DEPTH;
        p.channel = None;
        p.retval = 0;

        let kstack =
            frame_allocator::alloc_frame(k).expect("alloc_pcb: no frame for kernel stack");
        build_kstack(k, id, kstack);
        Some(id)
    }

    /// Lock-free variant for boot, before any process can contend for
    /// the table.
    fn alloc_pcb_early(k: &mut Kernel) -> Option<ProcId> {
        let mut found = None;
        for id in k.procs.ids() {
            if k.procs[id].state == ProcState::Unused {
                found = Some(id);
                break;
            }
        }
        let id = found?;
        let p = &mut k.procs[id];
        p.state = ProcState::Newborn;
        p.pid = id.0 as u32;
        p.cli_stack = [0; super::super::CLI_DEPTH];
        p.cli_sp = super::super::CLI_DEPTH;
        p.channel = None;
        p.retval = 0;

        let kstack =
            frame_allocator::alloc_frame_early(k).expect("alloc_pcb: no frame for kernel stack");
        build_kstack(k, id, kstack);
        Some(id)
    }

    extern "C" {
        // Linker-supplied user blob for the first process, mapped at
        // PROC_LOAD_ADDR. `initcode_size` is a symbol whose *address* is
        // the byte count, the usual linker-script idiom.
        static initcode_start: u8;
        static initcode_size: u8;
    }

    /// Build the first runnable process from the embedded initcode blob.
    /// Boot only; also seeds the TSS with its kernel stack.
    pub fn create_first_proc(k: &mut Kernel) {
        let id = alloc_pcb_early(k).expect("create_first_proc: no free PCB");
        k.procs.init = Some(id);

        let pgdir = vm::create_kernel_pgdir_early(k).expect("create_first_proc: no pgdir");
        // SAFETY: linker symbols; the blob is part of the kernel image.
        let blob = unsafe {
            let size = core::ptr::addr_of!(initcode_size) as usize;
            core::slice::from_raw_parts(core::ptr::addr_of!(initcode_start), size)
        };
        vm::init_first_proc_uvm(k, pgdir, blob);

        let p = &mut k.procs[id];
        p.pgdir = Some(pgdir);
        p.size = blob.len() as u32;
        p.parent = None;
        p.set_name(b"initcode");

        // Forge the ring-3 return frame: start executing at the load
        // address with an empty user stack and interrupts on.
        // SAFETY: p.tf points into this process's fresh kernel stack.
        unsafe {
            let tf = &mut *p.tf;
            *tf = core::mem::zeroed();
            tf.ss = gdt::SEL_UDATA;
            tf.esp = USER_STACK_ADDR + USER_STACK_SIZE;
            tf.eflags = FL_RESERVED | FL_IF | FL_IOPL_0;
            tf.cs = gdt::SEL_UCODE;
            tf.eip = PROC_LOAD_ADDR;
            tf.ds = gdt::SEL_UDATA;
            tf.es = gdt::SEL_UDATA;
            tf.fs = gdt::SEL_UDATA;
            tf.gs = gdt::SEL_UDATA;
        }

        gdt::set_kernel_stack((p.kstack.unwrap() + KSTACK_SIZE) as u32);
        p.state = ProcState::Runnable;
        log::info!("first process ready (pid {})", k.procs[id].pid);
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use creation::{alloc_pcb, create_first_proc};

//! Disk synchronisation: the IDE driver and its request queue.
//!
//! One request is in flight at a time. Buffers waiting their turn are
//! linked through `qnext`; the completion interrupt pops the head,
//! finishes the transfer, wakes the owner and kicks the next request.
//! The [`sync`] entry point is also where the RAM-disk backend plugs in:
//! it satisfies the same contract, just without sleeping.

use crate::drivers::ramdisk::RamDisk;
use crate::fs::buffer::{BufFlags, BufId};
use crate::kernel::Kernel;
#[cfg(all(target_arch = "x86", target_os = "none"))]
use crate::kernel::Channel;
#[cfg(all(target_arch = "x86", target_os = "none"))]
use crate::sync;

/// The disk behind the buffer cache.
pub enum DiskBackend {
    /// Real IDE hardware with the in-flight queue.
    Ide(IdeQueue),
    /// Synchronous in-memory disk.
    Ram(RamDisk),
}

impl DiskBackend {
    pub const fn new_ide() -> Self {
        Self::Ide(IdeQueue { head: None })
    }
}

/// Head of the single in-flight request queue.
pub struct IdeQueue {
    head: Option<BufId>,
}

/// Synchronise `buf` with the disk: write it out if DIRTY, fill it if
/// not VALID. On return the buffer is VALID and clean. The buffer must
/// be owned (BUSY); calling with nothing to do is a contract violation.
pub fn sync(k: &mut Kernel, buf: BufId) {
    let flags = k.bufs[buf].flags;
    if !flags.contains(BufFlags::BUSY) {
        panic!("disk sync: buffer not owned");
    }
    if flags & (BufFlags::VALID | BufFlags::DIRTY) == BufFlags::VALID {
        panic!("disk sync: nothing to do");
    }
    if k.bufs[buf].dev < 0 {
        panic!("disk sync: buffer has no device");
    }

    match k.disk {
        DiskBackend::Ram(_) => ram_sync(k, buf),
        DiskBackend::Ide(_) => ide_sync(k, buf),
    }
}

fn ram_sync(k: &mut Kernel, buf: BufId) {
    let Kernel { disk, bufs, .. } = k;
    let DiskBackend::Ram(disk) = disk else {
        unreachable!();
    };
    let b = &mut bufs[buf];
    if b.flags.contains(BufFlags::DIRTY) {
        disk.write(b.sector, &b.data);
    } else {
        disk.read(b.sector, &mut b.data);
    }
    b.flags.insert(BufFlags::VALID);
    b.flags.remove(BufFlags::DIRTY);
}

/// Queue the request and sleep until the interrupt handler reports the
/// buffer VALID and clean.
#[cfg(all(target_arch = "x86", target_os = "none"))]
fn ide_sync(k: &mut Kernel, buf: BufId) {
    sync::push_cli(k);

    // Append at the tail.
    k.bufs[buf].qnext = None;
    let head = {
        let DiskBackend::Ide(queue) = &k.disk else {
            unreachable!();
        };
        queue.head
    };
    match head {
        None => {
            let DiskBackend::Ide(queue) = &mut k.disk else {
                unreachable!();
            };
            queue.head = Some(buf);
            hw::start_request(k, buf);
        }
        Some(head) => {
            let mut tail = head;
            while let Some(next) = k.bufs[tail].qnext {
                tail = next;
            }
            k.bufs[tail].qnext = Some(buf);
        }
    }

    while k.bufs[buf].flags & (BufFlags::VALID | BufFlags::DIRTY) != BufFlags::VALID {
        sync::sleep(k, Channel::Buf(buf));
    }

    sync::pop_cli(k);
}

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
fn ide_sync(_k: &mut Kernel, _buf: BufId) {
    unreachable!("no IDE hardware on the host");
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod hw {
    use super::*;
    use crate::arch::x86::port::{inb, insl, outb, outsl};
    use crate::arch::x86::trap::TrapFrame;
    use crate::fs::BLOCK_SIZE;

    const DATA: u16 = 0x1F0;
    const SECTOR_COUNT: u16 = 0x1F2;
    const LBA_LO: u16 = 0x1F3;
    const LBA_MID: u16 = 0x1F4;
    const LBA_HI: u16 = 0x1F5;
    const DRIVE_HEAD: u16 = 0x1F6;
    const STATUS: u16 = 0x1F7;
    const COMMAND: u16 = 0x1F7;
    const DEV_CONTROL: u16 = 0x3F6;

    const STATUS_BSY: u8 = 0x80;
    const STATUS_DF: u8 = 0x20;
    const STATUS_ERR: u8 = 0x01;

    const CMD_READ: u8 = 0x20;
    const CMD_WRITE: u8 = 0x30;

    /// Poll until the drive leaves BSY. With `check_err`, report drive
    /// faults.
    fn wait_ready(check_err: bool) -> bool {
        let mut status;
        loop {
            // SAFETY: status port read has no side effect on this device.
            status = unsafe { inb(STATUS) };
            if status & STATUS_BSY == 0 {
                break;
            }
        }
        !(check_err && status & (STATUS_DF | STATUS_ERR) != 0)
    }

    /// Program the hardware for the request at the queue head. DIRTY
    /// buffers issue a write (pushing the data immediately), clean ones
    /// a read.
    pub(super) fn start_request(k: &mut Kernel, buf: BufId) {
        let b = &k.bufs[buf];
        let sector = b.sector;

        wait_ready(false);
        // SAFETY: LBA28 single-sector PIO sequence on the primary
        // channel, master drive; interrupt on completion.
        unsafe {
            outb(DEV_CONTROL, 0);
            outb(SECTOR_COUNT, 1);
            outb(LBA_LO, sector as u8);
            outb(LBA_MID, (sector >> 8) as u8);
            outb(LBA_HI, (sector >> 16) as u8);
            outb(DRIVE_HEAD, 0xE0 | ((sector >> 24) as u8 & 0x0F));
            if b.flags.contains(BufFlags::DIRTY) {
                outb(COMMAND, CMD_WRITE);
                outsl(DATA, b.data.as_ptr() as *const u32, BLOCK_SIZE / 4);
            } else {
                outb(COMMAND, CMD_READ);
            }
        }
    }

    /// Completion interrupt: finish the head request, wake its owner,
    /// start the next one.
    pub fn ide_intr(k: &mut Kernel) {
        let buf = {
            let Kernel { disk, bufs, .. } = k;
            let DiskBackend::Ide(queue) = disk else {
                panic!("ide interrupt without IDE backend");
            };
            let buf = queue.head.expect("ide interrupt with empty queue");
            queue.head = bufs[buf].qnext.take();
            buf
        };

        if !k.bufs[buf].flags.contains(BufFlags::DIRTY) {
            if !wait_ready(true) {
                panic!("ide: drive reported an error");
            }
            // SAFETY: the drive has one sector ready in its data register.
            unsafe {
                insl(DATA, k.bufs[buf].data.as_mut_ptr() as *mut u32, BLOCK_SIZE / 4);
            }
        }

        k.bufs[buf].flags.insert(BufFlags::VALID);
        k.bufs[buf].flags.remove(BufFlags::DIRTY);
        sync::wakeup_noint(k, Channel::Buf(buf));

        let DiskBackend::Ide(queue) = &k.disk else {
            unreachable!();
        };
        if let Some(next) = queue.head {
            start_request(k, next);
        }
    }

    /// IRQ 14 entry, registered with the trap dispatcher.
    pub fn ide_irq(_tf: &mut TrapFrame) {
        // SAFETY: interrupt context, IF clear, single CPU.
        let k = unsafe { crate::kernel::kernel() };
        ide_intr(k);
    }

    /// Unmask the disk IRQ, register the handler, wait for the drive.
    pub fn init() {
        crate::arch::x86::trap::register_handler(crate::arch::x86::trap::T_IDE, ide_irq);
        crate::arch::x86::pic::enable_line(14);
        wait_ready(false);
        log::info!("ide: primary master ready");
    }
}

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use hw::init;

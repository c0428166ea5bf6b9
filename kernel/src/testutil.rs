//! Test fixtures: fresh kernels, RAM disks and a mkfs-style image
//! builder.
//!
//! Every test builds its own [`Kernel`] with a fake current process, so
//! tests are independent and can run in parallel. The image builder
//! lays out the same geometry the mkfs tool produces: reserved sector,
//! superblock, inode bitmap, block bitmap, inode array, data blocks,
//! with block 0 pre-claimed and the root directory in block 1.

use alloc::boxed::Box;
use alloc::vec;
use alloc::vec::Vec;

use crate::drivers::ide::DiskBackend;
use crate::drivers::ramdisk::RamDisk;
use crate::fs::inode::acquire_inode;
use crate::fs::{
    Dirent, DiskInode, InodeType, Superblock, BLOCK_SIZE, DIRENT_SIZE, DISK_INODE_SIZE,
    ROOT_DEV, ROOT_INUM,
};
use crate::kernel::{Channel, Kernel};
use crate::mm::PAGE_SIZE;
use crate::process::{ProcId, ProcState};

/// A kernel with one fake process installed as current, enough for the
/// push_cli discipline and fd tables to work. No disk attached.
pub fn bare_kernel() -> Box<Kernel> {
    let mut k = Box::new(Kernel::new());
    let id = ProcId(0);
    k.procs[id].state = ProcState::Running;
    k.procs[id].pid = 0;
    k.procs[id].set_name(b"test");
    k.cpu.current = Some(id);
    k
}

/// Add a process sleeping on `channel`; for wakeup tests.
pub fn add_sleeping_proc(k: &mut Kernel, channel: Channel) -> ProcId {
    for id in k.procs.ids() {
        if k.procs[id].state == ProcState::Unused {
            k.procs[id].state = ProcState::Sleeping;
            k.procs[id].channel = Some(channel);
            k.procs[id].pid = id.0 as u32;
            return id;
        }
    }
    panic!("add_sleeping_proc: process table full");
}

pub struct FrameRegion {
    pub start: usize,
    pub end: usize,
}

/// Leak a page-aligned region of `n` frames for frame-allocator tests.
pub fn leak_frames(n: usize) -> FrameRegion {
    let layout = core::alloc::Layout::from_size_align(n * PAGE_SIZE, PAGE_SIZE).unwrap();
    // SAFETY: layout is non-zero; the region is intentionally leaked so
    // the addresses stay valid for the rest of the test process.
    let ptr = unsafe { ::std::alloc::alloc_zeroed(layout) };
    assert!(!ptr.is_null());
    FrameRegion {
        start: ptr as usize,
        end: ptr as usize + n * PAGE_SIZE,
    }
}

/// A kernel over a zeroed RAM disk of `sectors` sectors.
pub fn kernel_with_disk(sectors: usize) -> Box<Kernel> {
    let mut k = bare_kernel();
    k.disk = DiskBackend::Ram(RamDisk::new(sectors));
    k
}

/// Overwrite one sector of the disk image directly, behind the cache's
/// back. Use before the sector is first read.
pub fn patch_sector(k: &mut Kernel, sector: u32, data: &[u8; BLOCK_SIZE]) {
    let DiskBackend::Ram(disk) = &mut k.disk else {
        panic!("patch_sector: not a RAM disk");
    };
    disk.write(sector, data);
}

/// Raw bytes of one sector of the disk image.
pub fn sector_image(k: &Kernel, sector: u32) -> &[u8] {
    let DiskBackend::Ram(disk) = &k.disk else {
        panic!("sector_image: not a RAM disk");
    };
    disk.sector_image(sector)
}

/// Filesystem geometry for the image builder.
#[derive(Clone, Copy)]
pub struct FsSpec {
    pub ninodes: u32,
    pub nblocks: u32,
}

/// Tight little filesystem for allocator tests.
pub const SMALL_FS: FsSpec = FsSpec {
    ninodes: 32,
    nblocks: 64,
};

/// Enough room for multi-block files and the indirect block.
pub const ROOMY_FS: FsSpec = FsSpec {
    ninodes: 64,
    nblocks: 600,
};

/// The first block number `alloc_block` will hand out on a fresh image
/// (0 is reserved, 1 holds the root directory).
pub fn first_free_block(_spec: FsSpec) -> u32 {
    2
}

/// Build a fresh filesystem image: superblock, bitmaps with block 0 and
/// the root blocks claimed, and a root directory holding "." and "..".
pub fn mkfs_image(spec: FsSpec) -> Vec<u8> {
    let blks_ibitmap = 1;
    let blks_bbitmap = 1;
    let blks_inode = (spec.ninodes + crate::fs::INODES_PER_BLOCK as u32 - 1)
        / crate::fs::INODES_PER_BLOCK as u32;
    assert!(spec.ninodes <= crate::fs::BITS_PER_BLOCK);
    assert!(spec.nblocks <= crate::fs::BITS_PER_BLOCK);

    let sb = Superblock {
        blks_ibitmap,
        blks_bbitmap,
        inode_count: spec.ninodes,
        block_count: spec.nblocks,
        blks_inode,
    };
    let total = (2 + blks_ibitmap + blks_bbitmap + blks_inode + spec.nblocks) as usize;
    let mut img = vec![0u8; total * BLOCK_SIZE];

    sb.encode(&mut img[BLOCK_SIZE..BLOCK_SIZE + 20]);

    // inode bitmap: root inode in use
    img[sb.inode_bitmap_sector(0) as usize * BLOCK_SIZE] |= 0b01;
    // block bitmap: block 0 reserved, block 1 is the root directory
    img[sb.block_bitmap_sector(0) as usize * BLOCK_SIZE] |= 0b11;

    // root inode
    let mut root = DiskInode::zeroed();
    root.itype = InodeType::Dir as u16;
    root.nlink = 2; // its own "." and its name (the root is its own name)
    root.size = (2 * DIRENT_SIZE) as u32;
    root.addrs[0] = 1;
    let off = sb.inode_sector(ROOT_INUM) as usize * BLOCK_SIZE;
    root.encode(&mut img[off..off + DISK_INODE_SIZE]);

    // root directory entries; ".." of the root points at itself
    let data = sb.block_sector(1) as usize * BLOCK_SIZE;
    Dirent::new(b".", ROOT_INUM).encode(&mut img[data..data + DIRENT_SIZE]);
    Dirent::new(b"..", ROOT_INUM)
        .encode(&mut img[data + DIRENT_SIZE..data + 2 * DIRENT_SIZE]);

    img
}

/// A kernel over a freshly formatted filesystem, with the fake current
/// process's cwd pointing at the root.
pub fn kernel_with_fs(spec: FsSpec) -> Box<Kernel> {
    let mut k = bare_kernel();
    k.disk = DiskBackend::Ram(RamDisk::from_image(mkfs_image(spec)));
    let root = acquire_inode(&mut k, ROOT_DEV, ROOT_INUM);
    let cur = k.cpu.current.unwrap();
    k.procs[cur].cwd = Some(root);
    k
}

/// Number of data blocks currently marked used in the block bitmap.
pub fn used_blocks(k: &mut Kernel) -> u32 {
    let sb = Superblock::decode(&sector_image(k, 1)[..20]);
    let bitmap = sector_image(k, sb.block_bitmap_sector(0));
    let mut used = 0;
    for bit in 0..sb.block_count {
        if bitmap[bit as usize / 8] & (1 << (bit % 8)) != 0 {
            used += 1;
        }
    }
    used
}

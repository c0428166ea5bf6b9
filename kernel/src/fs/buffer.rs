//! Block buffer cache.
//!
//! A fixed pool of sector buffers threaded onto a circular list through
//! a sentinel: `head.next` is the most recently used buffer, `head.prev`
//! the least. The list and the per-buffer flags are index-linked arena
//! state, so moving a buffer is O(1) and nothing aliases.
//!
//! BUSY marks exclusive ownership by one call stack; VALID says the data
//! matches the sector at least as of the last sync; DIRTY says memory is
//! newer than disk (and implies BUSY, since only an owner writes).

use bitflags::bitflags;

use super::BLOCK_SIZE;
use crate::drivers::ide;
use crate::kernel::{Channel, Kernel};
use crate::sync;

/// Number of buffers in the cache.
pub const NBUF: usize = 20;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct BufFlags: u32 {
        const BUSY  = 0x1;
        const VALID = 0x2;
        const DIRTY = 0x4;
    }
}

/// Stable handle to one buffer slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufId(pub usize);

pub struct Buf {
    /// Device the mapping refers to; negative means never assigned.
    pub dev: i32,
    pub sector: u32,
    pub flags: BufFlags,
    pub data: [u8; BLOCK_SIZE],
    /// Link in the disk driver's request queue.
    pub qnext: Option<BufId>,
}

impl Buf {
    const fn unassigned() -> Self {
        Self {
            dev: -1,
            sector: 0,
            flags: BufFlags::empty(),
            data: [0; BLOCK_SIZE],
            qnext: None,
        }
    }
}

/// Index of the sentinel in the link arrays.
const HEAD: usize = NBUF;

pub struct BufCache {
    bufs: [Buf; NBUF],
    prev: [usize; NBUF + 1],
    next: [usize; NBUF + 1],
}

impl BufCache {
    pub const fn new() -> Self {
        const UNASSIGNED: Buf = Buf::unassigned();
        let mut prev = [0usize; NBUF + 1];
        let mut next = [0usize; NBUF + 1];
        // ring: HEAD -> 0 -> 1 -> ... -> NBUF-1 -> HEAD
        let mut i = 0;
        while i < NBUF {
            next[i] = i + 1;
            prev[i + 1] = i;
            i += 1;
        }
        next[HEAD] = 0;
        prev[0] = HEAD;
        Self {
            bufs: [UNASSIGNED; NBUF],
            prev,
            next,
        }
    }

    fn move_to_front(&mut self, i: usize) {
        if self.next[HEAD] == i {
            return;
        }
        // unlink
        let (p, n) = (self.prev[i], self.next[i]);
        self.next[p] = n;
        self.prev[n] = p;
        // insert at the MRU end
        let first = self.next[HEAD];
        self.next[i] = first;
        self.prev[first] = i;
        self.prev[i] = HEAD;
        self.next[HEAD] = i;
    }

    /// Scan in MRU order for a mapping of `(dev, sector)`.
    fn find(&self, dev: i32, sector: u32) -> Option<usize> {
        let mut i = self.next[HEAD];
        while i != HEAD {
            if self.bufs[i].dev == dev && self.bufs[i].sector == sector {
                return Some(i);
            }
            i = self.next[i];
        }
        None
    }

    /// Scan from the LRU end for any non-BUSY buffer, whatever it was
    /// mapped to before.
    fn victim(&self) -> Option<usize> {
        let mut i = self.prev[HEAD];
        while i != HEAD {
            if !self.bufs[i].flags.contains(BufFlags::BUSY) {
                return Some(i);
            }
            i = self.prev[i];
        }
        None
    }

    /// Buffer ids in MRU order, for invariant checks in tests.
    #[cfg(any(test, not(all(target_arch = "x86", target_os = "none"))))]
    pub fn mru_order(&self) -> impl Iterator<Item = BufId> + '_ {
        let mut i = self.next[HEAD];
        core::iter::from_fn(move || {
            if i == HEAD {
                None
            } else {
                let id = BufId(i);
                i = self.next[i];
                Some(id)
            }
        })
    }
}

impl core::ops::Index<BufId> for BufCache {
    type Output = Buf;

    fn index(&self, id: BufId) -> &Buf {
        &self.bufs[id.0]
    }
}

impl core::ops::IndexMut<BufId> for BufCache {
    fn index_mut(&mut self, id: BufId) -> &mut Buf {
        &mut self.bufs[id.0]
    }
}

/// Find-or-evict under push_cli. The returned buffer is BUSY and moved
/// to the MRU end, but its data may still be stale.
fn get_buf(k: &mut Kernel, dev: i32, sector: u32) -> BufId {
    sync::push_cli(k);
    let id = loop {
        if let Some(i) = k.bufs.find(dev, sector) {
            if !k.bufs.bufs[i].flags.contains(BufFlags::BUSY) {
                k.bufs.bufs[i].flags.insert(BufFlags::BUSY);
                k.bufs.move_to_front(i);
                break i;
            }
            // The owner will wake us on release. The buffer may have been
            // re-stamped by then, so start the scan over from scratch.
            sync::sleep(k, Channel::Buf(BufId(i)));
            continue;
        }
        match k.bufs.victim() {
            Some(i) => {
                let b = &mut k.bufs.bufs[i];
                b.dev = dev;
                b.sector = sector;
                b.flags = BufFlags::BUSY;
                k.bufs.move_to_front(i);
                break i;
            }
            None => panic!("buffer cache: every buffer is busy"),
        }
    };
    sync::pop_cli(k);
    BufId(id)
}

/// Acquire the buffer for `(dev, sector)` with valid contents.
///
/// May sleep twice over: once waiting for a BUSY mapping, once for the
/// disk to fill an invalid buffer. On return the buffer is BUSY, VALID
/// and clean, owned by the caller until [`release`].
pub fn acquire(k: &mut Kernel, dev: i32, sector: u32) -> BufId {
    let id = get_buf(k, dev, sector);
    if !k.bufs[id].flags.contains(BufFlags::VALID) {
        ide::sync(k, id);
    }
    debug_assert_eq!(
        k.bufs[id].flags & (BufFlags::BUSY | BufFlags::VALID | BufFlags::DIRTY),
        BufFlags::BUSY | BufFlags::VALID
    );
    id
}

/// Push the caller's modifications to disk. The buffer must be owned.
pub fn write(k: &mut Kernel, id: BufId) {
    if !k.bufs[id].flags.contains(BufFlags::BUSY) {
        panic!("buffer write: buffer not owned");
    }
    k.bufs[id].flags.insert(BufFlags::DIRTY);
    ide::sync(k, id);
}

/// Give up ownership and wake anyone waiting for this buffer.
pub fn release(k: &mut Kernel, id: BufId) {
    if !k.bufs[id].flags.contains(BufFlags::BUSY) {
        panic!("buffer release: buffer not owned");
    }
    k.bufs[id].flags.remove(BufFlags::BUSY);
    sync::wakeup(k, Channel::Buf(id));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil;

    #[test]
    fn acquire_reads_valid_data_and_moves_to_mru() {
        let mut k = testutil::kernel_with_disk(64);
        testutil::patch_sector(&mut k, 5, &[0xAA; BLOCK_SIZE]);
        testutil::patch_sector(&mut k, 9, &[0x55; BLOCK_SIZE]);

        let a = acquire(&mut k, 0, 5);
        assert!(k.bufs[a].data.iter().all(|&b| b == 0xAA));
        assert_eq!(k.bufs[a].flags, BufFlags::BUSY | BufFlags::VALID);
        release(&mut k, a);

        let b = acquire(&mut k, 0, 9);
        release(&mut k, b);

        let order: alloc::vec::Vec<_> = k.bufs.mru_order().collect();
        assert_eq!(order[0], b);
        assert_eq!(order[1], a);
    }

    #[test]
    fn reacquire_hits_the_same_buffer_without_io() {
        let mut k = testutil::kernel_with_disk(64);
        let a = acquire(&mut k, 0, 3);
        k.bufs[a].data[0] = 0x42;
        release(&mut k, a);

        // No write-back happened; a cache hit must still see the bytes.
        let b = acquire(&mut k, 0, 3);
        assert_eq!(a, b);
        assert_eq!(k.bufs[b].data[0], 0x42);
        release(&mut k, b);
    }

    #[test]
    fn write_reaches_the_disk_image() {
        let mut k = testutil::kernel_with_disk(64);
        let a = acquire(&mut k, 0, 7);
        k.bufs[a].data = [0x33; BLOCK_SIZE];
        write(&mut k, a);
        assert_eq!(
            k.bufs[a].flags & (BufFlags::VALID | BufFlags::DIRTY),
            BufFlags::VALID
        );
        release(&mut k, a);

        assert!(testutil::sector_image(&k, 7).iter().all(|&b| b == 0x33));
    }

    #[test]
    fn eviction_takes_the_lru_buffer_and_restamps_it() {
        let mut k = testutil::kernel_with_disk(256);
        // Touch NBUF distinct sectors; sector 10 becomes the LRU.
        for s in 10..10 + NBUF as u32 {
            let b = acquire(&mut k, 0, s);
            release(&mut k, b);
        }
        let lru = k.bufs.mru_order().last().unwrap();
        assert_eq!(k.bufs[lru].sector, 10);

        let b = acquire(&mut k, 0, 200);
        assert_eq!(b, lru, "the LRU buffer should have been recycled");
        assert_eq!(k.bufs[b].sector, 200);
        release(&mut k, b);
    }

    #[test]
    #[should_panic(expected = "not owned")]
    fn releasing_an_unowned_buffer_is_fatal() {
        let mut k = testutil::kernel_with_disk(16);
        let a = acquire(&mut k, 0, 1);
        release(&mut k, a);
        release(&mut k, a);
    }
}

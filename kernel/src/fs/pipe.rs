//! Unnamed in-kernel pipes.
//!
//! A pipe is a 1 KiB ring addressed by two monotonically increasing
//! 32-bit counters: the valid bytes are `[ridx, widx)` taken modulo the
//! ring size, so fullness is `widx - ridx == PIPE_SIZE` with no wasted
//! slot. Readers and writers rendezvous on the `PipeRead`/`PipeWrite`
//! channels. Pipes live in a small arena; a slot is reclaimed when both
//! ends are closed.

use super::file::{alloc_file, FileId, FileKind};
use super::OpenFlags;
use crate::error::{KernelError, KernelResult};
use crate::kernel::{Channel, Kernel};
use crate::sync;

/// Ring capacity in bytes.
pub const PIPE_SIZE: usize = 1024;

/// Concurrently live pipes.
pub const NPIPE: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeId(pub usize);

pub struct Pipe {
    buf: [u8; PIPE_SIZE],
    /// Read counter; reading consumes at `ridx % PIPE_SIZE`.
    ridx: u32,
    /// Write counter; writing deposits at `widx % PIPE_SIZE`.
    widx: u32,
    /// The read end is still open somewhere.
    ropen: bool,
    /// The write end is still open somewhere.
    wopen: bool,
}

impl Pipe {
    const fn fresh() -> Self {
        Self {
            buf: [0; PIPE_SIZE],
            ridx: 0,
            widx: 0,
            ropen: true,
            wopen: true,
        }
    }

    fn is_empty(&self) -> bool {
        self.ridx == self.widx
    }

    fn is_full(&self) -> bool {
        self.widx.wrapping_sub(self.ridx) as usize == PIPE_SIZE
    }
}

pub struct PipeTable {
    slots: [Option<Pipe>; NPIPE],
}

impl PipeTable {
    pub const fn new() -> Self {
        const EMPTY: Option<Pipe> = None;
        Self {
            slots: [EMPTY; NPIPE],
        }
    }

    fn get(&mut self, id: PipeId) -> &mut Pipe {
        self.slots[id.0].as_mut().expect("pipe: stale handle")
    }

    /// Occupied slots, for invariant checks in tests.
    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

fn alloc_pipe(k: &mut Kernel) -> KernelResult<PipeId> {
    sync::push_cli(k);
    for i in 0..NPIPE {
        if k.pipes.slots[i].is_none() {
            k.pipes.slots[i] = Some(Pipe::fresh());
            sync::pop_cli(k);
            return Ok(PipeId(i));
        }
    }
    sync::pop_cli(k);
    Err(KernelError::ResourceExhausted { resource: "pipes" })
}

/// Create a pipe and its two open-file ends: `(read end, write end)`.
pub fn create_pipe(k: &mut Kernel) -> KernelResult<(FileId, FileId)> {
    let pipe = alloc_pipe(k)?;

    let rfile = alloc_file(k);
    let wfile = alloc_file(k);
    for (f, mode) in [(rfile, OpenFlags::RDONLY), (wfile, OpenFlags::WRONLY)] {
        let entry = &mut k.files[f];
        entry.kind = FileKind::Pipe;
        entry.mode = mode;
        entry.off = 0;
        entry.ip = None;
        entry.pipe = Some(pipe);
    }
    Ok((rfile, wfile))
}

/// Close one end of the pipe, waking the opposite end. The access mode
/// of the closing file picks the end. When the second end goes, the
/// slot is reclaimed.
pub fn close_pipe(k: &mut Kernel, id: PipeId, mode: OpenFlags) {
    sync::push_cli(k);
    let access = mode.access_mode();
    if access == OpenFlags::RDONLY {
        k.pipes.get(id).ropen = false;
        sync::wakeup_noint(k, Channel::PipeWrite(id));
    } else if access == OpenFlags::WRONLY {
        k.pipes.get(id).wopen = false;
        sync::wakeup_noint(k, Channel::PipeRead(id));
    } else {
        panic!("close_pipe: a pipe end is read-only or write-only");
    }

    let p = k.pipes.get(id);
    if !p.ropen && !p.wopen {
        k.pipes.slots[id.0] = None;
    }
    sync::pop_cli(k);
}

/// Read up to `dst.len()` bytes. Sleeps while the pipe is empty and a
/// writer still exists; once the write end is closed, a drained pipe
/// reads as `BrokenPipe` (surfaced to user space as -1).
pub fn read_pipe(k: &mut Kernel, id: PipeId, dst: &mut [u8]) -> KernelResult<u32> {
    sync::push_cli(k);
    if !k.pipes.get(id).ropen {
        panic!("read_pipe: pipe is not open for reading");
    }

    while k.pipes.get(id).is_empty() && k.pipes.get(id).wopen {
        sync::wakeup_noint(k, Channel::PipeWrite(id));
        sync::sleep(k, Channel::PipeRead(id));
    }

    let mut n = 0;
    {
        let p = k.pipes.get(id);
        while n < dst.len() && !p.is_empty() {
            dst[n] = p.buf[p.ridx as usize % PIPE_SIZE];
            p.ridx = p.ridx.wrapping_add(1);
            n += 1;
        }
    }

    sync::wakeup_noint(k, Channel::PipeWrite(id));
    sync::pop_cli(k);

    if n == 0 {
        // nothing left and the write end is gone
        return Err(KernelError::BrokenPipe);
    }
    Ok(n as u32)
}

/// Write all of `src`, sleeping whenever the ring is full. Fails with
/// `BrokenPipe` as soon as the read end disappears; bytes deposited
/// before that are simply lost.
pub fn write_pipe(k: &mut Kernel, id: PipeId, src: &[u8]) -> KernelResult<u32> {
    sync::push_cli(k);
    if !k.pipes.get(id).wopen {
        panic!("write_pipe: pipe is not open for writing");
    }

    for &byte in src {
        while k.pipes.get(id).is_full() {
            if !k.pipes.get(id).ropen {
                sync::pop_cli(k);
                return Err(KernelError::BrokenPipe);
            }
            sync::wakeup_noint(k, Channel::PipeRead(id));
            sync::sleep(k, Channel::PipeWrite(id));
        }
        if !k.pipes.get(id).ropen {
            sync::pop_cli(k);
            return Err(KernelError::BrokenPipe);
        }
        let p = k.pipes.get(id);
        p.buf[p.widx as usize % PIPE_SIZE] = byte;
        p.widx = p.widx.wrapping_add(1);
    }

    sync::wakeup_noint(k, Channel::PipeRead(id));
    sync::pop_cli(k);
    Ok(src.len() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::file::close_file;
    use crate::testutil;

    #[test]
    fn bytes_flow_in_order() {
        let mut k = testutil::bare_kernel();
        let (r, w) = create_pipe(&mut k).unwrap();
        let pipe = k.files[w].pipe.unwrap();

        assert_eq!(write_pipe(&mut k, pipe, b"hello").unwrap(), 5);
        let mut buf = [0u8; 3];
        assert_eq!(read_pipe(&mut k, pipe, &mut buf).unwrap(), 3);
        assert_eq!(&buf, b"hel");
        let mut buf = [0u8; 8];
        assert_eq!(read_pipe(&mut k, pipe, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"lo");

        close_file(&mut k, r);
        close_file(&mut k, w);
    }

    #[test]
    fn drained_pipe_with_closed_writer_reports_broken_pipe() {
        let mut k = testutil::bare_kernel();
        let (r, w) = create_pipe(&mut k).unwrap();
        let pipe = k.files[w].pipe.unwrap();

        write_pipe(&mut k, pipe, b"x").unwrap();
        close_file(&mut k, w);

        let mut buf = [0u8; 4];
        assert_eq!(read_pipe(&mut k, pipe, &mut buf).unwrap(), 1);
        assert_eq!(read_pipe(&mut k, pipe, &mut buf), Err(KernelError::BrokenPipe));

        close_file(&mut k, r);
    }

    #[test]
    fn writing_to_a_closed_reader_fails() {
        let mut k = testutil::bare_kernel();
        let (r, w) = create_pipe(&mut k).unwrap();
        let pipe = k.files[w].pipe.unwrap();

        close_file(&mut k, r);
        assert_eq!(
            write_pipe(&mut k, pipe, b"dead"),
            Err(KernelError::BrokenPipe)
        );
        close_file(&mut k, w);
    }

    #[test]
    fn slot_is_reclaimed_when_both_ends_close() {
        let mut k = testutil::bare_kernel();
        assert_eq!(k.pipes.live_count(), 0);
        let (r, w) = create_pipe(&mut k).unwrap();
        assert_eq!(k.pipes.live_count(), 1);
        close_file(&mut k, r);
        assert_eq!(k.pipes.live_count(), 1);
        close_file(&mut k, w);
        assert_eq!(k.pipes.live_count(), 0);
    }

    #[test]
    fn ring_wraps_cleanly_at_capacity() {
        let mut k = testutil::bare_kernel();
        let (_r, w) = create_pipe(&mut k).unwrap();
        let pipe = k.files[w].pipe.unwrap();

        let chunk = [7u8; PIPE_SIZE / 2];
        let mut sink = [0u8; PIPE_SIZE / 2];
        // push the counters past one full revolution
        for _ in 0..5 {
            write_pipe(&mut k, pipe, &chunk).unwrap();
            assert_eq!(read_pipe(&mut k, pipe, &mut sink).unwrap() as usize, chunk.len());
        }
        assert!(k.pipes.get(pipe).is_empty());
    }
}

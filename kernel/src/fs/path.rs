//! Path resolution and directory operations.
//!
//! Traversal is lock-step: the parent directory is unlocked and released
//! before the walk descends, so no two inode locks are ever held at
//! once and lock cycles cannot form.

use super::inode::{
    acquire_inode, dup_inode, lock_inode, release_inode, unlock_inode, InodeId,
};
use super::{Dirent, InodeType, DIRENT_SIZE, DIR_NAME_MAX, ROOT_DEV, ROOT_INUM};
use crate::error::{KernelError, KernelResult};
use crate::fs::inode::{read_inode, write_inode, InodeFlags};
use crate::kernel::Kernel;

/// Where an element sits in its path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LastFlag {
    /// More elements follow.
    NotLast,
    /// Final element, written with a trailing '/'.
    LastSlash,
    /// Final element, no trailing '/'.
    LastBare,
}

impl LastFlag {
    pub fn is_last(self) -> bool {
        self != Self::NotLast
    }
}

/// Split the first element off `path`.
///
/// Returns the element (silently clipped to 28 bytes), the remainder to
/// parse next, and whether this was the last element. `None` when the
/// path holds no further element.
pub fn next_element(path: &[u8]) -> Option<(&[u8], &[u8], LastFlag)> {
    let mut i = 0;
    while i < path.len() && path[i] == b'/' {
        i += 1;
    }

    let start = i;
    while i < path.len() && path[i] != b'/' {
        i += 1;
    }
    if i == start {
        return None;
    }
    let elem = &path[start..(start + DIR_NAME_MAX).min(i)];

    let flag = if i == path.len() {
        LastFlag::LastBare
    } else {
        let mut j = i;
        while j < path.len() && path[j] == b'/' {
            j += 1;
        }
        if j == path.len() {
            LastFlag::LastSlash
        } else {
            LastFlag::NotLast
        }
    };
    Some((elem, &path[i..], flag))
}

/// The final element of `path`, clipped to 28 bytes. `None` if the path
/// has no element at all.
pub fn last_element(path: &[u8]) -> Option<([u8; DIR_NAME_MAX], usize)> {
    let mut rest = path;
    loop {
        let (elem, r, flag) = next_element(rest)?;
        if flag.is_last() {
            let mut name = [0u8; DIR_NAME_MAX];
            name[..elem.len()].copy_from_slice(elem);
            return Some((name, elem.len()));
        }
        rest = r;
    }
}

fn walk_start(k: &mut Kernel, path: &[u8]) -> InodeId {
    if path.first() == Some(&b'/') {
        acquire_inode(k, ROOT_DEV, ROOT_INUM)
    } else {
        let cur = k.cpu.current.expect("path walk: no current process");
        let cwd = k.procs[cur].cwd.expect("path walk: process has no cwd");
        dup_inode(k, cwd)
    }
}

/// Resolve `path` to an inode reference (unlocked). A trailing '/'
/// demands the target be a directory.
pub fn resolve(k: &mut Kernel, path: &[u8]) -> KernelResult<InodeId> {
    let mut ip = walk_start(k, path);
    let mut rest = path;
    // "/" has no elements; the root is a directory, no further check.
    let mut last = LastFlag::NotLast;

    while let Some((elem, r, flag)) = next_element(rest) {
        lock_inode(k, ip);
        if k.inodes[ip].itype() != InodeType::Dir {
            unlock_inode(k, ip);
            release_inode(k, ip);
            return Err(KernelError::NotADirectory);
        }
        let next = lookup_dir(k, ip, elem);
        unlock_inode(k, ip);
        release_inode(k, ip);
        match next {
            Some((next, _)) => ip = next,
            None => return Err(KernelError::NotFound),
        }
        rest = r;
        last = flag;
    }

    if last == LastFlag::LastSlash {
        lock_inode(k, ip);
        let is_dir = k.inodes[ip].itype() == InodeType::Dir;
        unlock_inode(k, ip);
        if !is_dir {
            release_inode(k, ip);
            return Err(KernelError::NotADirectory);
        }
    }
    Ok(ip)
}

/// Resolve the parent directory of `path`'s final element. Returns the
/// parent (unlocked) and the element name. Resolving the parent of "/"
/// fails, which is what keeps '/' out of directory-entry names.
pub fn resolve_parent(
    k: &mut Kernel,
    path: &[u8],
) -> KernelResult<(InodeId, [u8; DIR_NAME_MAX], usize)> {
    let mut ip = walk_start(k, path);
    let mut rest = path;

    while let Some((elem, r, flag)) = next_element(rest) {
        lock_inode(k, ip);
        if k.inodes[ip].itype() != InodeType::Dir {
            unlock_inode(k, ip);
            release_inode(k, ip);
            return Err(KernelError::NotADirectory);
        }
        if flag.is_last() {
            unlock_inode(k, ip);
            let mut name = [0u8; DIR_NAME_MAX];
            name[..elem.len()].copy_from_slice(elem);
            return Ok((ip, name, elem.len()));
        }
        let next = lookup_dir(k, ip, elem);
        unlock_inode(k, ip);
        release_inode(k, ip);
        match next {
            Some((next, _)) => ip = next,
            None => return Err(KernelError::NotFound),
        }
        rest = r;
    }

    release_inode(k, ip);
    Err(KernelError::NotFound)
}

fn assert_locked_dir(k: &Kernel, dp: InodeId, what: &str) {
    let d = &k.inodes[dp];
    if !d.flags.contains(InodeFlags::BUSY) || d.itype() != InodeType::Dir {
        panic!("{}: not a locked directory", what);
    }
}

/// Find `name` in directory `dp` (which the caller holds locked).
/// Returns the entry's inode (referenced, unlocked) and its byte offset
/// in the directory file.
pub fn lookup_dir(k: &mut Kernel, dp: InodeId, name: &[u8]) -> Option<(InodeId, u32)> {
    assert_locked_dir(k, dp, "lookup_dir");

    let size = k.inodes[dp].dinode.size;
    let mut off = 0;
    while off < size {
        let mut raw = [0u8; DIRENT_SIZE];
        if read_inode(k, dp, &mut raw, off) != Ok(DIRENT_SIZE as u32) {
            panic!("lookup_dir: directory is broken");
        }
        let entry = Dirent::decode(&raw);
        if !entry.is_empty() && entry.name_matches(name) {
            let dev = k.inodes[dp].dev;
            return Some((acquire_inode(k, dev, entry.inum), off));
        }
        off += DIRENT_SIZE as u32;
    }
    None
}

/// Add the entry `name -> inum` to `dp` (held locked by the caller),
/// reusing the first empty slot or growing the directory at EOF. Fails
/// only when the name already exists. Link counts are the caller's
/// business, and `inum` is trusted.
pub fn add_link(k: &mut Kernel, dp: InodeId, name: &[u8], inum: u32) -> KernelResult<()> {
    assert_locked_dir(k, dp, "add_link");

    if let Some((existing, _)) = lookup_dir(k, dp, name) {
        release_inode(k, existing);
        return Err(KernelError::AlreadyExists);
    }

    let size = k.inodes[dp].dinode.size;
    let mut off = 0;
    while off < size {
        let mut raw = [0u8; DIRENT_SIZE];
        if read_inode(k, dp, &mut raw, off) != Ok(DIRENT_SIZE as u32) {
            panic!("add_link: directory is broken");
        }
        if Dirent::decode(&raw).is_empty() {
            break;
        }
        off += DIRENT_SIZE as u32;
    }

    let mut raw = [0u8; DIRENT_SIZE];
    Dirent::new(name, inum).encode(&mut raw);
    if write_inode(k, dp, &raw, off) != Ok(DIRENT_SIZE as u32) {
        panic!("add_link: writing the directory failed");
    }
    Ok(())
}

/// True iff `dp` (held locked) contains nothing beyond "." and "..",
/// which sit at offsets 0 and 32 by construction.
pub fn is_empty_dir(k: &mut Kernel, dp: InodeId) -> bool {
    let size = k.inodes[dp].dinode.size;
    let mut off = 2 * DIRENT_SIZE as u32;
    while off < size {
        let mut raw = [0u8; DIRENT_SIZE];
        if read_inode(k, dp, &mut raw, off) != Ok(DIRENT_SIZE as u32) {
            panic!("is_empty_dir: directory is broken");
        }
        if !Dirent::decode(&raw).is_empty() {
            return false;
        }
        off += DIRENT_SIZE as u32;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn elements_split_on_slashes() {
        let (e, rest, flag) = next_element(b"/usr//bin/sh").unwrap();
        assert_eq!(e, b"usr");
        assert_eq!(flag, LastFlag::NotLast);
        let (e, rest, flag) = next_element(rest).unwrap();
        assert_eq!(e, b"bin");
        assert_eq!(flag, LastFlag::NotLast);
        let (e, _, flag) = next_element(rest).unwrap();
        assert_eq!(e, b"sh");
        assert_eq!(flag, LastFlag::LastBare);
    }

    #[test]
    fn trailing_slash_is_reported() {
        let (e, _, flag) = next_element(b"dir/").unwrap();
        assert_eq!(e, b"dir");
        assert_eq!(flag, LastFlag::LastSlash);

        assert!(next_element(b"/").is_none());
        assert!(next_element(b"").is_none());
    }

    #[test]
    fn oversized_elements_are_clipped_silently() {
        let long = b"abcdefghijklmnopqrstuvwxyz-0123456789/next";
        let (e, rest, flag) = next_element(long).unwrap();
        assert_eq!(e.len(), DIR_NAME_MAX);
        assert_eq!(e, &long[..DIR_NAME_MAX]);
        assert_eq!(flag, LastFlag::NotLast);
        let (e, _, _) = next_element(rest).unwrap();
        assert_eq!(e, b"next");
    }

    #[test]
    fn last_element_walks_to_the_end() {
        let (name, len) = last_element(b"/a/b/cde").unwrap();
        assert_eq!(&name[..len], b"cde");
        let (name, len) = last_element(b"x/").unwrap();
        assert_eq!(&name[..len], b"x");
        assert!(last_element(b"/").is_none());
    }
}

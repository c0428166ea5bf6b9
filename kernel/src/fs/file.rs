//! Open files and file descriptors.
//!
//! The open-file table is shared between processes: `fork` and `dup`
//! bump reference counts, and parent and child really do share one file
//! offset. Closing the last reference lets go of the underlying inode
//! or pipe end, which is where "unlinked but still open" files finally
//! die.

use super::inode::{
    self, alloc_inode, lock_inode, release_inode, stat_inode, unlock_inode, InodeId,
};
use super::path::{self, is_empty_dir, lookup_dir, resolve, resolve_parent};
use super::pipe::{self, PipeId};
use super::{Dirent, DiskInode, InodeType, OpenFlags, Stat, DIRENT_SIZE, NDIRECT};
use crate::error::{KernelError, KernelResult};
use crate::kernel::Kernel;
use crate::process::NOFILE;
use crate::sync;

/// Entries in the shared open-file table.
pub const NFILE: usize = 64;

/// Stable handle to one open-file entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Free table slot (refcnt is 0).
    Free,
    Inode,
    Pipe,
}

pub struct File {
    pub kind: FileKind,
    pub refcnt: u32,
    pub mode: OpenFlags,
    pub off: u32,
    pub ip: Option<InodeId>,
    pub pipe: Option<PipeId>,
}

impl File {
    const fn free() -> Self {
        Self {
            kind: FileKind::Free,
            refcnt: 0,
            mode: OpenFlags::empty(),
            off: 0,
            ip: None,
            pipe: None,
        }
    }
}

pub struct FileTable {
    files: [File; NFILE],
}

impl FileTable {
    pub const fn new() -> Self {
        const FREE: File = File::free();
        Self {
            files: [FREE; NFILE],
        }
    }

    /// Total references held across the table; tests check this against
    /// the processes' fd arrays.
    pub fn total_refs(&self) -> u32 {
        self.files.iter().map(|f| f.refcnt).sum()
    }

    pub fn occupied(&self) -> usize {
        self.files.iter().filter(|f| f.refcnt > 0).count()
    }
}

impl core::ops::Index<FileId> for FileTable {
    type Output = File;

    fn index(&self, id: FileId) -> &File {
        &self.files[id.0]
    }
}

impl core::ops::IndexMut<FileId> for FileTable {
    fn index_mut(&mut self, id: FileId) -> &mut File {
        &mut self.files[id.0]
    }
}

/// Claim a free open-file entry with one reference and nothing wired
/// up. Exhaustion is fatal: callers hold locks and cannot unwind.
pub fn alloc_file(k: &mut Kernel) -> FileId {
    sync::push_cli(k);
    for i in 0..NFILE {
        if k.files.files[i].refcnt == 0 {
            k.files.files[i] = File {
                kind: FileKind::Free,
                refcnt: 1,
                mode: OpenFlags::empty(),
                off: 0,
                ip: None,
                pipe: None,
            };
            sync::pop_cli(k);
            return FileId(i);
        }
    }
    panic!("alloc_file: open-file table is full");
}

/// Take another reference to an open file.
pub fn dup_file(k: &mut Kernel, f: FileId) -> FileId {
    sync::push_cli(k);
    if k.files[f].refcnt < 1 {
        panic!("dup_file: not a live open file");
    }
    k.files[f].refcnt += 1;
    sync::pop_cli(k);
    f
}

/// Drop one reference; the last one releases the inode or closes the
/// pipe end, either of which may free the underlying object.
pub fn close_file(k: &mut Kernel, f: FileId) {
    sync::push_cli(k);
    if k.files[f].refcnt < 1 {
        panic!("close_file: not a live open file");
    }
    k.files[f].refcnt -= 1;
    if k.files[f].refcnt > 0 {
        sync::pop_cli(k);
        return;
    }

    // Snapshot what the entry pointed at, free the slot right away, and
    // only then do the potentially sleeping teardown.
    let entry = core::mem::replace(&mut k.files.files[f.0], File::free());
    sync::pop_cli(k);

    if let Some(ip) = entry.ip {
        release_inode(k, ip);
    } else if let Some(p) = entry.pipe {
        pipe::close_pipe(k, p, entry.mode);
    }
}

/// Smallest free file descriptor of the current process, pointed at
/// `f`. This is the one exhaustion that reports to user space instead
/// of panicking.
pub fn alloc_fd(k: &mut Kernel, f: FileId) -> KernelResult<i32> {
    let cur = k.cpu.current.expect("alloc_fd: no current process");
    for fd in 0..NOFILE {
        if k.procs[cur].open_files[fd].is_none() {
            k.procs[cur].open_files[fd] = Some(f);
            return Ok(fd as i32);
        }
    }
    Err(KernelError::ResourceExhausted {
        resource: "file descriptors",
    })
}

/// Read from the file at its current offset, advancing it by the bytes
/// actually read.
pub fn read_file(k: &mut Kernel, f: FileId, dst: &mut [u8]) -> KernelResult<u32> {
    if k.files[f].refcnt < 1 {
        panic!("read_file: not a live open file");
    }
    if !k.files[f].mode.readable() {
        return Err(KernelError::WrongMode);
    }

    match k.files[f].kind {
        FileKind::Pipe => {
            let p = k.files[f].pipe.expect("read_file: pipe file without pipe");
            pipe::read_pipe(k, p, dst)
        }
        FileKind::Inode => {
            let ip = k.files[f].ip.expect("read_file: inode file without inode");
            lock_inode(k, ip);
            let off = k.files[f].off;
            let res = inode::read_inode(k, ip, dst, off);
            if let Ok(n) = res {
                k.files[f].off += n;
            }
            unlock_inode(k, ip);
            res
        }
        FileKind::Free => panic!("read_file: file of no kind"),
    }
}

/// Write at the current offset; the offset advances only when the whole
/// request went through.
pub fn write_file(k: &mut Kernel, f: FileId, src: &[u8]) -> KernelResult<u32> {
    if k.files[f].refcnt < 1 {
        panic!("write_file: not a live open file");
    }
    if !k.files[f].mode.writable() {
        return Err(KernelError::WrongMode);
    }

    match k.files[f].kind {
        FileKind::Pipe => {
            let p = k.files[f].pipe.expect("write_file: pipe file without pipe");
            pipe::write_pipe(k, p, src)
        }
        FileKind::Inode => {
            let ip = k.files[f].ip.expect("write_file: inode file without inode");
            lock_inode(k, ip);
            let off = k.files[f].off;
            let res = inode::write_inode(k, ip, src, off);
            if let Ok(n) = res {
                if n as usize == src.len() {
                    k.files[f].off += n;
                }
            }
            unlock_inode(k, ip);
            res
        }
        FileKind::Free => panic!("write_file: file of no kind"),
    }
}

/// Stat the inode behind `f`; pipes have nothing to report.
pub fn stat_file(k: &mut Kernel, f: FileId) -> KernelResult<Stat> {
    if k.files[f].refcnt < 1 {
        panic!("stat_file: not a live open file");
    }
    if k.files[f].kind != FileKind::Inode {
        return Err(KernelError::BadFileDescriptor);
    }
    let ip = k.files[f].ip.expect("stat_file: inode file without inode");
    lock_inode(k, ip);
    let st = stat_inode(k, ip);
    unlock_inode(k, ip);
    Ok(st)
}

/// Create `path` as a regular file, directory or device node. Creating
/// a regular file over an existing one hands back the existing inode;
/// any other collision fails. Directories get "." and ".." installed
/// and the link counts of both directories bumped. The returned inode
/// is referenced and unlocked.
pub fn create(
    k: &mut Kernel,
    fs_path: &[u8],
    itype: InodeType,
    major: u16,
    minor: u16,
) -> KernelResult<InodeId> {
    let (dp, name, len) = resolve_parent(k, fs_path)?;
    let name = &name[..len];
    if name == b"." || name == b".." {
        release_inode(k, dp);
        return Err(KernelError::InvalidPath);
    }

    lock_inode(k, dp);
    if let Some((ip, _)) = lookup_dir(k, dp, name) {
        unlock_inode(k, dp);
        release_inode(k, dp);
        lock_inode(k, ip);
        if itype == InodeType::File && k.inodes[ip].itype() == InodeType::File {
            unlock_inode(k, ip);
            return Ok(ip);
        }
        unlock_inode(k, ip);
        release_inode(k, ip);
        return Err(KernelError::AlreadyExists);
    }

    let dev = k.inodes[dp].dev;
    let ip = alloc_inode(k, dev);
    // A fresh inode cannot deadlock against its own parent, so holding
    // both locks here is fine.
    lock_inode(k, ip);
    k.inodes[ip].dinode = DiskInode {
        itype: itype as u16,
        major,
        minor,
        nlink: 1,
        size: 0,
        addrs: [super::NIL_BLOCK; NDIRECT + 1],
    };

    let inum = k.inodes[ip].inum;
    add_link_or_die(k, dp, name, inum);
    if itype == InodeType::Dir {
        let dp_inum = k.inodes[dp].inum;
        add_link_or_die(k, ip, b".", inum);
        add_link_or_die(k, ip, b"..", dp_inum);
        k.inodes[dp].dinode.nlink += 1;
        k.inodes[ip].dinode.nlink += 1;
        inode::update_inode(k, dp);
    }
    inode::update_inode(k, ip);

    unlock_inode(k, dp);
    release_inode(k, dp);
    unlock_inode(k, ip);
    Ok(ip)
}

fn add_link_or_die(k: &mut Kernel, dp: InodeId, name: &[u8], inum: u32) {
    if path::add_link(k, dp, name, inum).is_err() {
        panic!("create: directory entry appeared out of nowhere");
    }
}

/// Open (or with `CREAT`, create) `path` and wire it to a fresh fd.
/// Directories open read-only or not at all.
pub fn do_open(k: &mut Kernel, fs_path: &[u8], flags: OpenFlags) -> KernelResult<i32> {
    let ip = if flags.contains(OpenFlags::CREAT) {
        create(k, fs_path, InodeType::File, 0, 0)?
    } else {
        let ip = resolve(k, fs_path)?;
        lock_inode(k, ip);
        let is_dir = k.inodes[ip].itype() == InodeType::Dir;
        unlock_inode(k, ip);
        if is_dir && flags.access_mode() != OpenFlags::RDONLY {
            release_inode(k, ip);
            return Err(KernelError::IsADirectory);
        }
        ip
    };

    let f = alloc_file(k);
    let fd = match alloc_fd(k, f) {
        Ok(fd) => fd,
        Err(e) => {
            close_file(k, f);
            release_inode(k, ip);
            return Err(e);
        }
    };

    let entry = &mut k.files[f];
    entry.kind = FileKind::Inode;
    entry.mode = flags.access_mode();
    entry.off = 0;
    entry.ip = Some(ip);
    entry.pipe = None;
    Ok(fd)
}

/// Make `newpath` another name for the file at `oldpath`. Directories
/// cannot be linked. On failure the bumped link count is rolled back.
pub fn do_link(k: &mut Kernel, oldpath: &[u8], newpath: &[u8]) -> KernelResult<()> {
    let oldip = resolve(k, oldpath)?;
    let (dp, name, len) = match resolve_parent(k, newpath) {
        Ok(x) => x,
        Err(e) => {
            release_inode(k, oldip);
            return Err(e);
        }
    };

    lock_inode(k, oldip);
    if k.inodes[oldip].itype() == InodeType::Dir {
        unlock_inode(k, oldip);
        release_inode(k, oldip);
        release_inode(k, dp);
        return Err(KernelError::IsADirectory);
    }
    k.inodes[oldip].dinode.nlink = k.inodes[oldip]
        .dinode
        .nlink
        .checked_add(1)
        .expect("do_link: link count overflow");
    inode::update_inode(k, oldip);
    unlock_inode(k, oldip);

    let inum = k.inodes[oldip].inum;
    lock_inode(k, dp);
    let linked = path::add_link(k, dp, &name[..len], inum);
    unlock_inode(k, dp);
    release_inode(k, dp);

    if let Err(e) = linked {
        // take the provisional link count back
        lock_inode(k, oldip);
        k.inodes[oldip].dinode.nlink -= 1;
        inode::update_inode(k, oldip);
        unlock_inode(k, oldip);
        release_inode(k, oldip);
        return Err(e);
    }
    release_inode(k, oldip);
    Ok(())
}

/// Remove the directory entry at `path`. A directory goes only when it
/// is empty; "." and ".." are never removable. The file itself survives
/// until its link count and reference count both reach zero.
pub fn do_unlink(k: &mut Kernel, fs_path: &[u8]) -> KernelResult<()> {
    let (dp, name, len) = resolve_parent(k, fs_path)?;
    let name = &name[..len];

    lock_inode(k, dp);
    if k.inodes[dp].dinode.nlink == 0 {
        panic!("do_unlink: parent directory is broken");
    }
    if name == b"." || name == b".." {
        unlock_inode(k, dp);
        release_inode(k, dp);
        return Err(KernelError::InvalidPath);
    }
    let Some((ip, off)) = lookup_dir(k, dp, name) else {
        unlock_inode(k, dp);
        release_inode(k, dp);
        return Err(KernelError::NotFound);
    };
    unlock_inode(k, dp);

    lock_inode(k, ip);
    if k.inodes[ip].dinode.nlink == 0 {
        panic!("do_unlink: target file is broken");
    }
    let is_dir = k.inodes[ip].itype() == InodeType::Dir;
    if is_dir && !is_empty_dir(k, ip) {
        unlock_inode(k, ip);
        release_inode(k, ip);
        release_inode(k, dp);
        return Err(KernelError::DirectoryNotEmpty);
    }
    unlock_inode(k, ip);

    // Checks passed; first scrub the parent...
    let mut raw = [0u8; DIRENT_SIZE];
    Dirent::empty().encode(&mut raw);
    lock_inode(k, dp);
    if inode::write_inode(k, dp, &raw, off) != Ok(DIRENT_SIZE as u32) {
        panic!("do_unlink: clearing the directory entry failed");
    }
    if is_dir {
        k.inodes[dp].dinode.nlink -= 1;
        inode::update_inode(k, dp);
    }
    unlock_inode(k, dp);
    release_inode(k, dp);

    // ...then the file. A directory loses "." as well as its name.
    lock_inode(k, ip);
    k.inodes[ip].dinode.nlink -= 1;
    if is_dir {
        k.inodes[ip].dinode.nlink -= 1;
    }
    inode::update_inode(k, ip);
    unlock_inode(k, ip);
    release_inode(k, ip);

    Ok(())
}

/// Create a directory at `path`.
pub fn do_mkdir(k: &mut Kernel, fs_path: &[u8]) -> KernelResult<()> {
    let ip = create(k, fs_path, InodeType::Dir, 0, 0)?;
    release_inode(k, ip);
    Ok(())
}

/// Create a device node. Only character devices exist in this kernel.
pub fn do_mknod(k: &mut Kernel, fs_path: &[u8], kind: u32, major: u16, minor: u16) -> KernelResult<()> {
    if kind != InodeType::CharDev as u32 {
        return Err(KernelError::InvalidNodeType { kind });
    }
    let ip = create(k, fs_path, InodeType::CharDev, major, minor)?;
    release_inode(k, ip);
    Ok(())
}

/// Point the current process's working directory at `path`.
pub fn do_chdir(k: &mut Kernel, fs_path: &[u8]) -> KernelResult<()> {
    let ip = resolve(k, fs_path)?;
    lock_inode(k, ip);
    if k.inodes[ip].itype() != InodeType::Dir {
        unlock_inode(k, ip);
        release_inode(k, ip);
        return Err(KernelError::NotADirectory);
    }
    unlock_inode(k, ip);

    let cur = k.cpu.current.expect("do_chdir: no current process");
    let old = k.procs[cur].cwd.expect("do_chdir: process has no cwd");
    release_inode(k, old);
    k.procs[cur].cwd = Some(ip);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::ROOT_INUM;
    use crate::testutil::{self, ROOMY_FS};

    fn open(k: &mut Kernel, path: &[u8], flags: OpenFlags) -> i32 {
        do_open(k, path, flags).map_or(-1, |fd| fd)
    }

    fn fd_file(k: &Kernel, fd: i32) -> FileId {
        let cur = k.cpu.current.unwrap();
        k.procs[cur].open_files[fd as usize].unwrap()
    }

    fn close_fd(k: &mut Kernel, fd: i32) {
        let f = fd_file(k, fd);
        let cur = k.cpu.current.unwrap();
        k.procs[cur].open_files[fd as usize] = None;
        close_file(k, f);
    }

    fn create_empty(k: &mut Kernel, path: &[u8]) {
        let fd = open(k, path, OpenFlags::RDONLY | OpenFlags::CREAT);
        assert!(fd >= 0);
        close_fd(k, fd);
    }

    #[test]
    fn create_write_reopen_read_round_trip() {
        let mut k = testutil::kernel_with_fs(ROOMY_FS);
        let fd = open(&mut k, b"/notes", OpenFlags::RDWR | OpenFlags::CREAT);
        assert_eq!(fd, 0);
        let f = fd_file(&k, fd);
        assert_eq!(write_file(&mut k, f, b"first line\n").unwrap(), 11);
        close_fd(&mut k, fd);

        let fd = open(&mut k, b"/notes", OpenFlags::RDONLY);
        let f = fd_file(&k, fd);
        let mut buf = [0u8; 32];
        assert_eq!(read_file(&mut k, f, &mut buf).unwrap(), 11);
        assert_eq!(&buf[..11], b"first line\n");
        // a second read sits at EOF
        assert_eq!(read_file(&mut k, f, &mut buf).unwrap(), 0);
        close_fd(&mut k, fd);
    }

    #[test]
    fn missing_files_do_not_open() {
        let mut k = testutil::kernel_with_fs(ROOMY_FS);
        assert_eq!(do_open(&mut k, b"/ghost", OpenFlags::RDONLY), Err(KernelError::NotFound));
    }

    #[test]
    fn open_with_creat_returns_the_existing_file() {
        let mut k = testutil::kernel_with_fs(ROOMY_FS);
        let fd = open(&mut k, b"/cfg", OpenFlags::WRONLY | OpenFlags::CREAT);
        let f = fd_file(&k, fd);
        write_file(&mut k, f, b"v=1").unwrap();
        close_fd(&mut k, fd);

        let fd = open(&mut k, b"/cfg", OpenFlags::RDWR | OpenFlags::CREAT);
        let f = fd_file(&k, fd);
        let mut buf = [0u8; 8];
        assert_eq!(read_file(&mut k, f, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"v=1");
        close_fd(&mut k, fd);
    }

    #[test]
    fn directories_open_read_only_and_list_entries() {
        let mut k = testutil::kernel_with_fs(ROOMY_FS);
        assert_eq!(
            do_open(&mut k, b"/", OpenFlags::WRONLY),
            Err(KernelError::IsADirectory)
        );

        let fd = open(&mut k, b"/", OpenFlags::RDONLY);
        let f = fd_file(&k, fd);
        let mut raw = [0u8; DIRENT_SIZE];
        assert_eq!(read_file(&mut k, f, &mut raw).unwrap(), DIRENT_SIZE as u32);
        let first = Dirent::decode(&raw);
        assert!(first.name_matches(b"."));
        assert_eq!(first.inum, ROOT_INUM);
        assert_eq!(read_file(&mut k, f, &mut raw).unwrap(), DIRENT_SIZE as u32);
        assert!(Dirent::decode(&raw).name_matches(b".."));
        close_fd(&mut k, fd);
    }

    #[test]
    fn mode_bits_are_enforced() {
        let mut k = testutil::kernel_with_fs(ROOMY_FS);
        let fd = open(&mut k, b"/f", OpenFlags::RDONLY | OpenFlags::CREAT);
        let f = fd_file(&k, fd);
        assert_eq!(write_file(&mut k, f, b"no"), Err(KernelError::WrongMode));
        let mut buf = [0u8; 4];
        assert_eq!(read_file(&mut k, f, &mut buf).unwrap(), 0);
        close_fd(&mut k, fd);
    }

    #[test]
    fn link_shares_the_inode_and_unlink_peels_names_off() {
        let mut k = testutil::kernel_with_fs(ROOMY_FS);
        let fd = open(&mut k, b"/a", OpenFlags::WRONLY | OpenFlags::CREAT);
        let f = fd_file(&k, fd);
        write_file(&mut k, f, b"shared").unwrap();
        close_fd(&mut k, fd);

        do_link(&mut k, b"/a", b"/b").unwrap();

        let fd = open(&mut k, b"/b", OpenFlags::RDONLY);
        let f = fd_file(&k, fd);
        let st = stat_file(&mut k, f).unwrap();
        assert_eq!(st.nlink, 2);
        assert_eq!(st.size, 6);
        let mut buf = [0u8; 16];
        assert_eq!(read_file(&mut k, f, &mut buf).unwrap(), 6);
        assert_eq!(&buf[..6], b"shared");
        close_fd(&mut k, fd);

        do_unlink(&mut k, b"/a").unwrap();
        assert_eq!(do_open(&mut k, b"/a", OpenFlags::RDONLY), Err(KernelError::NotFound));
        let fd = open(&mut k, b"/b", OpenFlags::RDONLY);
        let f = fd_file(&k, fd);
        assert_eq!(stat_file(&mut k, f).unwrap().nlink, 1);
        close_fd(&mut k, fd);
    }

    #[test]
    fn link_to_an_existing_name_rolls_the_count_back() {
        let mut k = testutil::kernel_with_fs(ROOMY_FS);
        create_empty(&mut k, b"/a");
        create_empty(&mut k, b"/b");

        assert_eq!(do_link(&mut k, b"/a", b"/b"), Err(KernelError::AlreadyExists));

        let fd = open(&mut k, b"/a", OpenFlags::RDONLY);
        let f = fd_file(&k, fd);
        assert_eq!(stat_file(&mut k, f).unwrap().nlink, 1);
        close_fd(&mut k, fd);
    }

    #[test]
    fn unlink_while_open_defers_the_reclaim_to_close() {
        let mut k = testutil::kernel_with_fs(ROOMY_FS);
        let baseline = testutil::used_blocks(&mut k);

        let fd = open(&mut k, b"/tmp", OpenFlags::RDWR | OpenFlags::CREAT);
        let f = fd_file(&k, fd);
        write_file(&mut k, f, &[9u8; 1024]).unwrap();
        assert!(testutil::used_blocks(&mut k) > baseline);

        do_unlink(&mut k, b"/tmp").unwrap();
        // gone from the namespace, still readable through the fd
        assert_eq!(do_open(&mut k, b"/tmp", OpenFlags::RDONLY), Err(KernelError::NotFound));
        k.files[f].off = 0;
        let mut buf = [0u8; 1024];
        assert_eq!(read_file(&mut k, f, &mut buf).unwrap(), 1024);

        close_fd(&mut k, fd);
        assert_eq!(testutil::used_blocks(&mut k), baseline);
    }

    #[test]
    fn mkdir_builds_dot_entries_and_bumps_links() {
        let mut k = testutil::kernel_with_fs(ROOMY_FS);
        do_mkdir(&mut k, b"/d").unwrap();

        let fd = open(&mut k, b"/d", OpenFlags::RDONLY);
        let f = fd_file(&k, fd);
        let st = stat_file(&mut k, f).unwrap();
        assert_eq!(st.itype, InodeType::Dir as u16);
        assert_eq!(st.nlink, 2); // its name and its "."
        close_fd(&mut k, fd);

        // files resolve through the new directory, and ".." climbs out
        create_empty(&mut k, b"/d/f");
        let fd = open(&mut k, b"/d/../d/f", OpenFlags::RDONLY);
        assert!(fd >= 0);
        close_fd(&mut k, fd);

        // the parent gained a link from "/d/.."
        let fd = open(&mut k, b"/", OpenFlags::RDONLY);
        let f = fd_file(&k, fd);
        assert_eq!(stat_file(&mut k, f).unwrap().nlink, 3);
        close_fd(&mut k, fd);
    }

    #[test]
    fn only_empty_directories_unlink() {
        let mut k = testutil::kernel_with_fs(ROOMY_FS);
        do_mkdir(&mut k, b"/d").unwrap();
        create_empty(&mut k, b"/d/f");

        assert_eq!(do_unlink(&mut k, b"/d"), Err(KernelError::DirectoryNotEmpty));
        do_unlink(&mut k, b"/d/f").unwrap();
        do_unlink(&mut k, b"/d").unwrap();
        assert_eq!(do_open(&mut k, b"/d", OpenFlags::RDONLY), Err(KernelError::NotFound));

        // root link count is back where it started
        let fd = open(&mut k, b"/", OpenFlags::RDONLY);
        let f = fd_file(&k, fd);
        assert_eq!(stat_file(&mut k, f).unwrap().nlink, 2);
        close_fd(&mut k, fd);
    }

    #[test]
    fn chdir_switches_the_resolution_root() {
        let mut k = testutil::kernel_with_fs(ROOMY_FS);
        do_mkdir(&mut k, b"/home").unwrap();
        create_empty(&mut k, b"/home/rc");

        do_chdir(&mut k, b"/home").unwrap();
        let fd = open(&mut k, b"rc", OpenFlags::RDONLY);
        assert!(fd >= 0);
        close_fd(&mut k, fd);

        assert_eq!(do_chdir(&mut k, b"rc"), Err(KernelError::NotADirectory));
    }

    #[test]
    fn dup_and_fd_bookkeeping_stay_balanced() {
        let mut k = testutil::kernel_with_fs(ROOMY_FS);
        let fd = open(&mut k, b"/x", OpenFlags::RDWR | OpenFlags::CREAT);
        let f = fd_file(&k, fd);

        let f2 = dup_file(&mut k, f);
        let fd2 = alloc_fd(&mut k, f2).unwrap();
        assert_eq!(fd2, fd + 1);
        assert_eq!(f, f2);
        assert_eq!(k.files[f].refcnt, 2);

        // the fd table and the open-file refs agree
        let cur = k.cpu.current.unwrap();
        let held = k.procs[cur].open_files.iter().flatten().count() as u32;
        assert_eq!(k.files.total_refs(), held);

        // both descriptors share one offset
        write_file(&mut k, f, b"ab").unwrap();
        assert_eq!(k.files[f2].off, 2);

        close_fd(&mut k, fd);
        assert_eq!(k.files[f2].refcnt, 1);
        close_fd(&mut k, fd2);
        assert_eq!(k.files.occupied(), 0);
    }
}

//! The POSIX stat record persisted for every inode.

use bitflags::bitflags;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

use crate::Errno;
use crate::Ino;
use crate::cred::Cred;
use crate::time::TimeSpec;

/// Object kind as encoded in the mode word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    /// A directory.
    Directory,
    /// A regular file backed by an extent-store object.
    Regular,
    /// A symbolic link whose target is stored in the index.
    Symlink,
}

impl FileType {
    pub(crate) fn mode_bits(self) -> u32 {
        match self {
            FileType::Directory => libc::S_IFDIR as u32,
            FileType::Regular => libc::S_IFREG as u32,
            FileType::Symlink => libc::S_IFLNK as u32,
        }
    }
}

bitflags! {
    /// Field-selective stat update mask.
    ///
    /// The `*_SET` flags copy the corresponding field from a caller-supplied
    /// stat; `ATIME_NOW`/`MTIME_NOW`/`CTIME_NOW` stamp the current wall time;
    /// the link flags adjust `nlink`.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct SetStatFlags: u32 {
        /// Set atime to the current time.
        const ATIME_NOW = 0x0001;
        /// Set mtime to the current time.
        const MTIME_NOW = 0x0002;
        /// Set ctime to the current time.
        const CTIME_NOW = 0x0004;
        /// Increment the hard-link count.
        const INCR_LINK = 0x0008;
        /// Decrement the hard-link count.
        const DECR_LINK = 0x0010;
        /// Copy the permission bits (the format bits are preserved).
        const MODE_SET = 0x0020;
        /// Copy the owner uid.
        const UID_SET = 0x0040;
        /// Copy the owner gid.
        const GID_SET = 0x0080;
        /// Copy size and blocks; on regular files this truncates the
        /// extent-store object.
        const SIZE_SET = 0x0100;
        /// Copy atime from the supplied stat.
        const ATIME_SET = 0x0200;
        /// Copy mtime from the supplied stat.
        const MTIME_SET = 0x0400;
        /// Copy ctime from the supplied stat.
        const CTIME_SET = 0x0800;
    }
}

/// Attributes of an inode, persisted verbatim as the stat value blob.
///
/// The layout is packed and must not change without bumping the key
/// version byte.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned,
)]
#[repr(C, packed)]
pub struct Stat {
    /// Inode number; always equal to the inode the record is stored under.
    pub ino: Ino,
    /// File type and permission bits.
    pub mode: u32,
    /// Hard-link count.
    pub nlink: u32,
    /// Owner user id.
    pub uid: u32,
    /// Owner group id.
    pub gid: u32,
    /// Size in bytes.
    pub size: u64,
    /// Allocated 512-byte blocks.
    pub blocks: u64,
    /// Last access time.
    pub atime: TimeSpec,
    /// Last data modification time.
    pub mtime: TimeSpec,
    /// Last attribute change time.
    pub ctime: TimeSpec,
}

impl Stat {
    /// Builds the stat record for a freshly created object. All three
    /// timestamps are set to the same "now".
    pub(crate) fn for_new(
        ino: Ino,
        cred: &Cred,
        mode: u32,
        kind: FileType,
        nlink: u32,
    ) -> Stat {
        let now = TimeSpec::now();
        Stat {
            ino,
            mode: (mode & 0o7777) | kind.mode_bits(),
            nlink,
            uid: cred.uid,
            gid: cred.gid,
            size: 0,
            blocks: 0,
            atime: now,
            mtime: now,
            ctime: now,
        }
    }

    /// True for directories.
    pub fn is_dir(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFDIR as u32
    }

    /// True for regular files.
    pub fn is_reg(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFREG as u32
    }

    /// True for symbolic links.
    pub fn is_symlink(&self) -> bool {
        self.mode & libc::S_IFMT as u32 == libc::S_IFLNK as u32
    }
}

impl std::fmt::Debug for Stat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (ino, mode, nlink, size) = (self.ino, self.mode, self.nlink, self.size);
        f.debug_struct("Stat")
            .field("ino", &ino)
            .field("mode", &format_args!("{mode:o}"))
            .field("nlink", &nlink)
            .field("size", &size)
            .finish_non_exhaustive()
    }
}

/// Applies the time and link-count flags of `flags` to `stat` in place.
///
/// Only `ATIME_NOW`, `MTIME_NOW`, `CTIME_NOW`, `INCR_LINK` and `DECR_LINK`
/// are honoured here; field copies are the business of `setattr`.
pub(crate) fn amend_stat(stat: &mut Stat, flags: SetStatFlags) -> Result<(), Errno> {
    let now = TimeSpec::now();

    if flags.contains(SetStatFlags::ATIME_NOW) {
        stat.atime = now;
    }
    if flags.contains(SetStatFlags::MTIME_NOW) {
        stat.mtime = now;
    }
    if flags.contains(SetStatFlags::CTIME_NOW) {
        stat.ctime = now;
    }

    if flags.contains(SetStatFlags::INCR_LINK) {
        if stat.nlink == u32::MAX {
            return Err(Errno::EMLINK);
        }
        stat.nlink += 1;
    }

    if flags.contains(SetStatFlags::DECR_LINK) {
        if stat.nlink == 0 {
            return Err(Errno::EINVAL);
        }
        stat.nlink -= 1;
    }

    Ok(())
}

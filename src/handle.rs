//! File handles and their wire format.
//!
//! A handle is the in-memory face of an inode: the inode number plus a
//! cached copy of its stat record. Handles are exclusively owned by the
//! caller and carry no reference back to the [`Filesystem`]; ops take the
//! filesystem by reference instead.

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::little_endian::U64;

use crate::AccessFlags;
use crate::Errno;
use crate::Ino;
use crate::cred::Cred;
use crate::cred::check_access;
use crate::fs::Filesystem;
use crate::stat::Stat;

/// Fixed-size wire representation of a handle.
///
/// `fsid` is reserved for multi-filesystem routing and may be zero.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct WireHandle {
    fsid: U64,
    ino: U64,
}

/// In-memory dedup key of a handle, for use in client-side maps and sets.
/// Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleKey {
    /// Filesystem the handle belongs to.
    pub fsid: u64,
    /// Inode the handle refers to.
    pub ino: Ino,
}

/// A file handle: an inode plus its cached attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct FileHandle {
    fsid: u64,
    ino: Ino,
    stat: Box<Stat>,
}

impl FileHandle {
    /// Builds a handle for `ino`, loading the stat record unless the
    /// caller already has it.
    pub fn from_ino(fs: &Filesystem, ino: Ino, stat: Option<&Stat>) -> Result<FileHandle, Errno> {
        let stat = match stat {
            Some(stat) => *stat,
            None => fs.get_stat(ino)?,
        };
        let handle = FileHandle {
            fsid: fs.fsid(),
            ino,
            stat: Box::new(stat),
        };
        debug_assert!(handle.invariant());
        Ok(handle)
    }

    /// Builds the root handle, checking read access for `cred`.
    pub fn getroot(fs: &Filesystem, cred: &Cred) -> Result<FileHandle, Errno> {
        let handle = FileHandle::from_ino(fs, Ino::ROOT, None)?;
        check_access(cred, &handle.stat, AccessFlags::READ)?;
        Ok(handle)
    }

    /// Resolves `name` under this handle to a child handle.
    ///
    /// `..` at the root resolves to the root itself.
    pub fn lookup(
        &self,
        fs: &Filesystem,
        cred: &Cred,
        name: &[u8],
    ) -> Result<FileHandle, Errno> {
        check_access(cred, &self.stat, AccessFlags::READ)?;

        if self.ino == Ino::ROOT && name == b".." {
            return Ok(self.clone());
        }

        let child = fs.tree_lookup(self.ino, name)?;
        debug_assert!(child >= Ino::ROOT);
        FileHandle::from_ino(fs, child, None)
    }

    /// Rebuilds a handle from its wire form. The embedded fsid is ignored
    /// in a single-filesystem deployment.
    pub fn deserialize(fs: &Filesystem, buffer: &[u8]) -> Result<FileHandle, Errno> {
        let wire = WireHandle::read_from_bytes(buffer).map_err(|_| Errno::EINVAL)?;
        FileHandle::from_ino(fs, Ino(wire.ino.get()), None)
    }

    /// Writes the wire form into `buffer` and returns its size.
    pub fn serialize(&self, buffer: &mut [u8]) -> Result<usize, Errno> {
        self.serialize_with_fsid(self.fsid, buffer)
    }

    /// Like [`serialize`](FileHandle::serialize) with a caller-chosen fsid.
    pub fn serialize_with_fsid(&self, fsid: u64, buffer: &mut [u8]) -> Result<usize, Errno> {
        debug_assert!(self.invariant());
        let wire = WireHandle {
            fsid: U64::new(fsid),
            ino: U64::new(self.ino.0),
        };
        let bytes = wire.as_bytes();
        if buffer.len() < bytes.len() {
            return Err(Errno::ENOBUFS);
        }
        buffer[..bytes.len()].copy_from_slice(bytes);
        Ok(bytes.len())
    }

    /// Size of the wire form: two little-endian u64 words.
    pub const fn serialized_size() -> usize {
        std::mem::size_of::<WireHandle>()
    }

    /// The inode this handle refers to.
    pub fn ino(&self) -> Ino {
        self.ino
    }

    /// The cached attributes.
    pub fn stat(&self) -> &Stat {
        &self.stat
    }

    /// Reloads the cached attributes from the store.
    pub fn refresh(&mut self, fs: &Filesystem) -> Result<(), Errno> {
        *self.stat = fs.get_stat(self.ino)?;
        Ok(())
    }

    /// The in-memory dedup key.
    pub fn key(&self) -> HandleKey {
        HandleKey {
            fsid: self.fsid,
            ino: self.ino,
        }
    }

    fn invariant(&self) -> bool {
        self.ino != Ino::INVALID && { self.stat.ino } == self.ino
    }
}

//! The filesystem object and its persistence plumbing.
//!
//! A [`Filesystem`] is one opened KV index plus the extent store that holds
//! file data. It is constructed once at mount time and shared by reference
//! across request threads; there is no global state.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;
use zerocopy::FromBytes;
use zerocopy::IntoBytes;

use crate::AccessFlags;
use crate::Errno;
use crate::Fid;
use crate::Ino;
use crate::cred::Cred;
use crate::cred::check_access;
use crate::extstore::ExtStore;
use crate::key;
use crate::key::KeyType;
use crate::kvs::Kvs;
use crate::kvs::KvsIndex;
use crate::stat::FileType;
use crate::stat::SetStatFlags;
use crate::stat::Stat;
use crate::stat::amend_stat;
use crate::state::OpenFile;

/// A mounted filesystem: one namespace index bound to one extent store.
pub struct Filesystem {
    fsid: u64,
    index: Box<dyn KvsIndex>,
    ext: Box<dyn ExtStore>,
    /// In-memory open-file table, keyed by inode. Entries exist only while
    /// at least one state holds a share on the inode.
    pub(crate) open_files: Mutex<HashMap<Ino, Arc<OpenFile>>>,
}

impl Filesystem {
    /// Creates a new namespace index and writes the root directory into it.
    ///
    /// The root inode is fixed at [`Ino::ROOT`]; the inode counter is
    /// seeded so the first allocated inode lands just above it.
    pub fn create(
        kvs: &dyn Kvs,
        ext: Box<dyn ExtStore>,
        index_fid: &Fid,
        fsid: u64,
        cred: &Cred,
        mode: u32,
    ) -> Result<Filesystem, Errno> {
        let index = kvs.index_create(index_fid)?;
        let fs = Filesystem {
            fsid,
            index,
            ext,
            open_files: Mutex::new(HashMap::new()),
        };

        let root = Stat::for_new(Ino::ROOT, cred, mode, FileType::Directory, 2);
        fs.set_stat(Ino::ROOT, &root)?;
        fs.index
            .set(key::INO_COUNTER_KEY, &Ino::ROOT.0.to_le_bytes())?;
        Ok(fs)
    }

    /// Opens an existing namespace index.
    pub fn open(
        kvs: &dyn Kvs,
        ext: Box<dyn ExtStore>,
        index_fid: &Fid,
        fsid: u64,
    ) -> Result<Filesystem, Errno> {
        let index = kvs.index_open(index_fid)?;
        let fs = Filesystem {
            fsid,
            index,
            ext,
            open_files: Mutex::new(HashMap::new()),
        };
        // The root stat must exist in any well-formed index.
        fs.get_stat(Ino::ROOT)?;
        Ok(fs)
    }

    /// The filesystem id written into serialized handles.
    pub fn fsid(&self) -> u64 {
        self.fsid
    }

    pub(crate) fn index(&self) -> &dyn KvsIndex {
        self.index.as_ref()
    }

    pub(crate) fn ext(&self) -> &dyn ExtStore {
        self.ext.as_ref()
    }

    /// Allocates the next inode from the persistent counter.
    pub(crate) fn next_inode(&self) -> Result<Ino, Errno> {
        let next = self.index.incr_counter(key::INO_COUNTER_KEY)?;
        Ok(Ino(next))
    }

    /// The extent-store object id bound to a regular file inode.
    pub(crate) fn file_fid(&self, ino: Ino) -> Fid {
        Fid::new(self.fsid, ino.0)
    }

    fn get_inode_attr(&self, ino: Ino, ktype: KeyType) -> Result<Vec<u8>, Errno> {
        let result = self.index.get(&key::inode_attr_key(ino, ktype));
        trace!(
            "GET {ino}.{ktype:?} = {:?}",
            result.as_ref().map(Vec::len)
        );
        result
    }

    fn set_inode_attr(&self, ino: Ino, ktype: KeyType, value: &[u8]) -> Result<(), Errno> {
        trace!("SET {ino}.{ktype:?} = ({})", value.len());
        self.index.set(&key::inode_attr_key(ino, ktype), value)
    }

    fn del_inode_attr(&self, ino: Ino, ktype: KeyType) -> Result<(), Errno> {
        trace!("DEL {ino}.{ktype:?}");
        self.index.del(&key::inode_attr_key(ino, ktype))
    }

    /// Reads the stat record of an inode. `ENOENT` when the inode does not
    /// exist.
    pub(crate) fn get_stat(&self, ino: Ino) -> Result<Stat, Errno> {
        let value = self.get_inode_attr(ino, KeyType::Stat)?;
        Stat::read_from_bytes(&value).map_err(|_| Errno::EINVAL)
    }

    pub(crate) fn set_stat(&self, ino: Ino, stat: &Stat) -> Result<(), Errno> {
        debug_assert_eq!({ stat.ino }, ino);
        self.set_inode_attr(ino, KeyType::Stat, stat.as_bytes())
    }

    pub(crate) fn del_stat(&self, ino: Ino) -> Result<(), Errno> {
        self.del_inode_attr(ino, KeyType::Stat)
    }

    /// Read-amend-write of an inode's stat record.
    pub(crate) fn update_stat(&self, ino: Ino, flags: SetStatFlags) -> Result<(), Errno> {
        let mut stat = self.get_stat(ino)?;
        amend_stat(&mut stat, flags)?;
        self.set_stat(ino, &stat)
    }

    pub(crate) fn get_link(&self, ino: Ino) -> Result<Vec<u8>, Errno> {
        self.get_inode_attr(ino, KeyType::Symlink)
    }

    pub(crate) fn set_link(&self, ino: Ino, content: &[u8]) -> Result<(), Errno> {
        self.set_inode_attr(ino, KeyType::Symlink, content)
    }

    pub(crate) fn del_link(&self, ino: Ino) -> Result<(), Errno> {
        self.del_inode_attr(ino, KeyType::Symlink)
    }

    pub(crate) fn get_fid(&self, ino: Ino) -> Result<Fid, Errno> {
        let value = self.get_inode_attr(ino, KeyType::InodeFid)?;
        Fid::read_from_bytes(&value).map_err(|_| Errno::EINVAL)
    }

    pub(crate) fn set_fid(&self, ino: Ino, fid: &Fid) -> Result<(), Errno> {
        self.set_inode_attr(ino, KeyType::InodeFid, fid.as_bytes())
    }

    pub(crate) fn del_fid(&self, ino: Ino) -> Result<(), Errno> {
        self.del_inode_attr(ino, KeyType::InodeFid)
    }

    /// Marks an inode as unlinked-while-open; the last close destroys it.
    pub(crate) fn set_open_mark(&self, ino: Ino) -> Result<(), Errno> {
        self.set_inode_attr(ino, KeyType::OpenMark, &[])
    }

    pub(crate) fn del_open_mark(&self, ino: Ino) -> Result<(), Errno> {
        match self.del_inode_attr(ino, KeyType::OpenMark) {
            Ok(()) | Err(Errno::ENOENT) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Checks `flags` against the mode bits of `ino` for `cred`.
    pub fn access(&self, cred: &Cred, ino: Ino, flags: AccessFlags) -> Result<(), Errno> {
        let stat = self.get_stat(ino)?;
        check_access(cred, &stat, flags)
    }

    /// The per-inode open object, created on first use.
    pub(crate) fn open_file(&self, ino: Ino) -> Arc<OpenFile> {
        let mut open_files = self.open_files.lock();
        open_files
            .entry(ino)
            .or_insert_with(|| Arc::new(OpenFile::new()))
            .clone()
    }

    /// True when some state currently holds a share on `ino`.
    pub(crate) fn is_open(&self, ino: Ino) -> bool {
        let open_files = self.open_files.lock();
        open_files
            .get(&ino)
            .is_some_and(|open_file| !open_file.is_idle())
    }

    /// Drops the open object of `ino` once its share counters are back to
    /// zero.
    pub(crate) fn release_open_file(&self, ino: Ino) {
        let mut open_files = self.open_files.lock();
        if let Some(open_file) = open_files.get(&ino) {
            if open_file.is_idle() {
                open_files.remove(&ino);
            }
        }
    }
}

impl fmt::Debug for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Filesystem")
            .field("fsid", &self.fsid)
            .finish_non_exhaustive()
    }
}

//! The data path: read, write, truncate, commit.
//!
//! I/O resolves its open state to a descriptor with `find_fd`, talks to
//! the extent store, then folds the returned attribute hints back into the
//! stat record. Writes serialize against each other (and against reads)
//! through the per-file I/O lock so size and times never drift from the
//! data.

use log::debug;

use crate::Errno;
use crate::Ino;
use crate::OpenFlags;
use crate::fs::Filesystem;
use crate::state::FileState;
use crate::stat::SetStatFlags;
use crate::stat::Stat;

impl Filesystem {
    /// Reads at `off` through an open state. Returns the byte count and an
    /// end-of-file flag; a zero count means end-of-file.
    pub fn read2(
        &self,
        state: &FileState,
        off: u64,
        buf: &mut [u8],
    ) -> Result<(usize, bool), Errno> {
        let fd = self.find_fd(state, false, OpenFlags::READ)?;
        let open_file = self.open_file(fd.ino);
        let _io = open_file.io_lock.read();

        let fid = self.get_fid(fd.ino)?;
        let (count, eof, hint) = self.ext().read(&fid, off, buf)?;

        if let Some(atime) = hint.atime {
            let mut stat = self.get_stat(fd.ino)?;
            stat.atime = atime;
            self.set_stat(fd.ino, &stat)?;
        }

        debug!("read {count} bytes at {off} from {} (eof={eof})", fd.ino);
        Ok((count, eof))
    }

    /// Writes `buf` at `off` through an open state. With `stable` the data
    /// is flushed before returning.
    pub fn write2(
        &self,
        state: &FileState,
        off: u64,
        buf: &[u8],
        stable: bool,
    ) -> Result<usize, Errno> {
        let fd = self.find_fd(state, false, OpenFlags::WRITE)?;
        let open_file = self.open_file(fd.ino);
        let _io = open_file.io_lock.write();

        let fid = self.get_fid(fd.ino)?;
        let (count, hint) = self.ext().write(&fid, off, buf)?;

        let mut stat = self.get_stat(fd.ino)?;
        if hint.size > stat.size {
            stat.size = hint.size;
            stat.blocks = hint.blocks;
        }
        if let Some(mtime) = hint.mtime {
            stat.mtime = mtime;
        }
        if let Some(ctime) = hint.ctime {
            stat.ctime = ctime;
        }
        self.set_stat(fd.ino, &stat)?;

        if stable {
            self.ext().fsync(&fid)?;
        }

        debug!("wrote {count} bytes at {off} to {}", fd.ino);
        Ok(count)
    }

    /// Changes the size of an open regular file, applying any further
    /// attribute fields selected by `flags` along the way. Requires a
    /// write-capable state and `SIZE_SET` in `flags`.
    pub fn ftruncate(
        &self,
        state: &FileState,
        new_stat: &Stat,
        flags: SetStatFlags,
    ) -> Result<(), Errno> {
        if !flags.contains(SetStatFlags::SIZE_SET) {
            return Err(Errno::EINVAL);
        }
        let fd = self.find_fd(state, false, OpenFlags::WRITE)?;
        let open_file = self.open_file(fd.ino);
        let _io = open_file.io_lock.write();

        self.setattr_unchecked(fd.ino, new_stat, flags)
    }

    /// Commits previously written data. The extent store is synchronous in
    /// this revision, so there is nothing left to flush.
    pub fn commit2(&self, _ino: Ino, _off: u64, _len: u64) -> Result<(), Errno> {
        Ok(())
    }
}

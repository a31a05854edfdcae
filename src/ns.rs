//! Namespace operations.
//!
//! These compose the tree primitives, the stat store and the extent store
//! into the POSIX-visible operations. Every multi-step mutation runs under
//! a [`Txn`] scope so a failure rolls the index back; where a step lives
//! outside the store (extent objects), the operation compensates by
//! unlinking what it just created, preserving the original error.

use log::debug;
use log::warn;

use crate::AccessFlags;
use crate::Errno;
use crate::Ino;
use crate::cred::Cred;
use crate::fs::Filesystem;
use crate::key;
use crate::key::MAX_NAME_LEN;
use crate::kvs::Txn;
use crate::stat::FileType;
use crate::stat::SetStatFlags;
use crate::stat::Stat;
use crate::stat::amend_stat;
use crate::time::TimeSpec;

/// Permission bits of a symlink are ignored by every operation, so links
/// are created wide open, per long-standing Unix convention.
const SYMLINK_MODE: u32 = 0o777;

/// Hints for [`rename`](Filesystem::rename).
#[derive(Debug, Default, Clone, Copy)]
pub struct RenameFlags {
    /// The displaced destination is held open by some client. Rename then
    /// only unlinks it; the data is destroyed on the last close.
    pub is_dst_open: bool,
}

impl Filesystem {
    /// Resolves `name` under `parent`. Requires read access on the parent.
    pub fn lookup(&self, cred: &Cred, parent: Ino, name: &[u8]) -> Result<Ino, Errno> {
        if name.is_empty() {
            return Err(Errno::EINVAL);
        }
        if name.len() > MAX_NAME_LEN {
            return Err(Errno::E2BIG);
        }
        let stat = self.get_stat(parent)?;
        crate::cred::check_access(cred, &stat, AccessFlags::READ)?;
        if !stat.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        self.tree_lookup(parent, name)
    }

    /// Walks a `/`-separated path from `start`. Every component must
    /// resolve; a missing one fails the walk with `ENOENT`.
    pub fn lookup_path(&self, cred: &Cred, start: Ino, path: &[u8]) -> Result<Ino, Errno> {
        let mut current = start;
        for component in path.split(|byte| *byte == b'/') {
            if component.is_empty() {
                continue;
            }
            current = self.lookup(cred, current, component)?;
        }
        Ok(current)
    }

    /// Returns the parent directory of `ino`. When the inode is hard
    /// linked from several directories, the first parent in link order is
    /// returned. The root is its own parent.
    pub fn lookup_parent(&self, cred: &Cred, ino: Ino) -> Result<Ino, Errno> {
        self.access(cred, ino, AccessFlags::READ)?;
        if ino == Ino::ROOT {
            return Ok(Ino::ROOT);
        }
        let mut iter = self.index().prefix_iter(&key::parent_prefix(ino))?;
        match iter.next() {
            Some(Ok((raw_key, _))) => key::parent_key_pino(&raw_key),
            Some(Err(err)) => Err(err),
            None => Err(Errno::ENOENT),
        }
    }

    /// Creates a directory and returns its inode.
    pub fn mkdir(&self, cred: &Cred, parent: Ino, name: &[u8], mode: u32) -> Result<Ino, Errno> {
        self.access(cred, parent, AccessFlags::WRITE)?;
        self.create_entry(cred, parent, name, None, mode, FileType::Directory)
    }

    /// Creates a regular file, its extent-store object and the binding
    /// between them.
    pub fn creat(&self, cred: &Cred, parent: Ino, name: &[u8], mode: u32) -> Result<Ino, Errno> {
        self.access(cred, parent, AccessFlags::WRITE)?;
        let ino = self.create_entry(cred, parent, name, None, mode, FileType::Regular)?;

        let fid = self.file_fid(ino);
        let bound = self
            .set_fid(ino, &fid)
            .and_then(|()| self.ext().create(&fid));
        if let Err(err) = bound {
            self.rollback_create(parent, ino, name, FileType::Regular);
            return Err(err);
        }
        Ok(ino)
    }

    /// Creates a regular file and applies initial attributes, returning the
    /// resulting stat. If any step after creation fails, the file is
    /// unlinked again and the first error is returned.
    pub fn creat_ex(
        &self,
        cred: &Cred,
        parent: Ino,
        name: &[u8],
        mode: u32,
        stat_in: &Stat,
        flags: SetStatFlags,
    ) -> Result<(Ino, Stat), Errno> {
        let ino = self.creat(cred, parent, name, mode)?;

        let applied = if flags.is_empty() {
            Ok(())
        } else {
            // The creator owns the file; the initial attributes are not
            // subject to its (possibly write-less) fresh mode.
            self.setattr_unchecked(ino, stat_in, flags)
        };
        let result = applied.and_then(|()| self.get_stat(ino));
        match result {
            Ok(stat_out) => Ok((ino, stat_out)),
            Err(err) => {
                self.rollback_create(parent, ino, name, FileType::Regular);
                Err(err)
            }
        }
    }

    /// Creates a symbolic link with `content` as its target.
    pub fn symlink(
        &self,
        cred: &Cred,
        parent: Ino,
        name: &[u8],
        content: &[u8],
    ) -> Result<Ino, Errno> {
        self.access(cred, parent, AccessFlags::WRITE)?;
        self.create_entry(
            cred,
            parent,
            name,
            Some(content),
            SYMLINK_MODE,
            FileType::Symlink,
        )
    }

    /// Reads a symlink target into `buf` and returns its length.
    /// `ENOBUFS` when the buffer is too small.
    pub fn readlink(&self, _cred: &Cred, ino: Ino, buf: &mut [u8]) -> Result<usize, Errno> {
        let content = self.get_link(ino)?;
        if content.len() > buf.len() {
            return Err(Errno::ENOBUFS);
        }
        buf[..content.len()].copy_from_slice(&content);
        self.update_stat(ino, SetStatFlags::ATIME_NOW)?;
        Ok(content.len())
    }

    /// Creates a hard link to `ino` as `dname` under `dparent`.
    pub fn link(&self, cred: &Cred, ino: Ino, dparent: Ino, dname: &[u8]) -> Result<(), Errno> {
        key::check_name(dname)?;
        self.access(cred, dparent, AccessFlags::WRITE)?;
        match self.tree_lookup(dparent, dname) {
            Ok(_) => return Err(Errno::EEXIST),
            Err(Errno::ENOENT) => {}
            Err(err) => return Err(err),
        }

        let txn = Txn::begin(self.index())?;
        self.tree_attach(dparent, ino, dname)?;
        self.update_stat(dparent, SetStatFlags::CTIME_NOW | SetStatFlags::MTIME_NOW)?;
        self.update_stat(ino, SetStatFlags::CTIME_NOW | SetStatFlags::INCR_LINK)?;
        txn.commit()?;
        debug!("link(ino={ino}, dparent={dparent})");
        Ok(())
    }

    /// Removes the link between `parent` and `obj` named `name` and
    /// decrements the object's link count. The object itself survives.
    pub fn detach(&self, cred: &Cred, parent: Ino, obj: Ino, name: &[u8]) -> Result<(), Errno> {
        self.access(cred, parent, AccessFlags::DELETE_ENTITY)?;
        let txn = Txn::begin(self.index())?;
        self.tree_detach(parent, obj, name)?;
        self.update_stat(obj, SetStatFlags::CTIME_NOW | SetStatFlags::DECR_LINK)?;
        txn.commit()
    }

    /// Removes a file or symlink. With the last name gone the object is
    /// destroyed, unless it is still open; then destruction is postponed
    /// to the last close via the persistent open marker.
    pub fn unlink(
        &self,
        cred: &Cred,
        parent: Ino,
        ino: Option<Ino>,
        name: &[u8],
    ) -> Result<(), Errno> {
        let ino = match ino {
            Some(ino) => ino,
            None => self.lookup(cred, parent, name)?,
        };
        self.unlink_object(cred, parent, ino, name, false)
    }

    fn unlink_object(
        &self,
        cred: &Cred,
        parent: Ino,
        ino: Ino,
        name: &[u8],
        keep_open_hint: bool,
    ) -> Result<(), Errno> {
        if self.get_stat(ino)?.is_dir() {
            return Err(Errno::EISDIR);
        }
        self.detach(cred, parent, ino, name)?;

        let stat = self.get_stat(ino)?;
        if stat.is_reg() && stat.nlink == 0 && (keep_open_hint || self.is_open(ino)) {
            debug!("unlink: {ino} is open, postponing destruction");
            self.set_open_mark(ino)
        } else {
            self.destroy_orphaned_file(ino)
        }
    }

    /// Removes an empty directory.
    pub fn rmdir(&self, cred: &Cred, parent: Ino, name: &[u8]) -> Result<(), Errno> {
        if name.len() > MAX_NAME_LEN {
            return Err(Errno::E2BIG);
        }
        self.access(cred, parent, AccessFlags::WRITE)?;
        let ino = self.lookup(cred, parent, name)?;

        let stat = self.get_stat(ino)?;
        if !stat.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        if self.tree_has_children(ino)? {
            debug!("rmdir: {ino} ({}) not empty", String::from_utf8_lossy(name));
            return Err(Errno::ENOTEMPTY);
        }

        let txn = Txn::begin(self.index())?;
        self.tree_detach(parent, ino, name)?;
        self.del_stat(ino)?;
        // The removed directory's ".." was a link to the parent.
        self.update_stat(parent, SetStatFlags::DECR_LINK)?;
        txn.commit()
    }

    /// Renames an entry, possibly across directories, possibly replacing
    /// the destination.
    ///
    /// `src`/`dst` may carry pre-resolved inodes to skip the internal
    /// lookups. Replacing a destination requires matching types; a
    /// destination directory must be empty.
    #[allow(clippy::too_many_arguments)]
    pub fn rename(
        &self,
        cred: &Cred,
        sdir: Ino,
        sname: &[u8],
        src: Option<Ino>,
        ddir: Ino,
        dname: &[u8],
        dst: Option<Ino>,
        flags: RenameFlags,
    ) -> Result<(), Errno> {
        if sname.len() > MAX_NAME_LEN || dname.len() > MAX_NAME_LEN {
            return Err(Errno::E2BIG);
        }
        key::check_name(dname)?;
        debug_assert!(sdir != ddir || sname != dname);

        let rename_inplace = sdir == ddir;

        self.access(cred, sdir, AccessFlags::DELETE_ENTITY)?;
        if !rename_inplace {
            self.access(cred, ddir, AccessFlags::CREATE_ENTITY)?;
        }

        let sino = match src {
            Some(ino) => ino,
            None => self.lookup(cred, sdir, sname)?,
        };
        let dino = match dst {
            Some(ino) => Some(ino),
            None => match self.lookup(cred, ddir, dname) {
                Ok(ino) => Some(ino),
                Err(Errno::ENOENT) => None,
                Err(err) => return Err(err),
            },
        };

        let sstat = self.get_stat(sino)?;
        if let Some(dino) = dino {
            if dino == sino {
                // Both names already refer to the same object.
                return Ok(());
            }
            let dstat = self.get_stat(dino)?;
            if sstat.is_dir() != dstat.is_dir() {
                warn!(
                    "rename: incompatible source and destination ({:o}, {:o})",
                    { sstat.mode },
                    { dstat.mode }
                );
                return Err(Errno::ENOTDIR);
            }
            if dstat.is_dir() {
                if self.tree_has_children(dino)? {
                    warn!("rename: destination {dino} is not empty");
                    return Err(Errno::EEXIST);
                }
                self.rmdir(cred, ddir, dname)?;
            } else {
                self.unlink_object(cred, ddir, dino, dname, flags.is_dst_open)?;
            }
        }

        let txn = Txn::begin(self.index())?;
        if rename_inplace {
            self.tree_rename_link(sdir, sino, sname, dname)?;
        } else {
            self.tree_detach(sdir, sino, sname)?;
            self.tree_attach(ddir, sino, dname)?;
            let mut dst_flags = SetStatFlags::CTIME_NOW | SetStatFlags::MTIME_NOW;
            if sstat.is_dir() {
                // The moved directory's ".." now points at the new parent.
                self.update_stat(sdir, SetStatFlags::DECR_LINK)?;
                dst_flags |= SetStatFlags::INCR_LINK;
            }
            self.update_stat(ddir, dst_flags)?;
        }
        txn.commit()
    }

    /// Returns the attributes of `ino`. Requires read access.
    pub fn getattr(&self, cred: &Cred, ino: Ino) -> Result<Stat, Errno> {
        let stat = self.get_stat(ino)?;
        crate::cred::check_access(cred, &stat, AccessFlags::READ)?;
        Ok(stat)
    }

    /// Applies the fields selected by `flags` from `new` to the attributes
    /// of `ino`. `SIZE_SET` on a regular file truncates its data.
    pub fn setattr(
        &self,
        cred: &Cred,
        ino: Ino,
        new: &Stat,
        flags: SetStatFlags,
    ) -> Result<(), Errno> {
        if flags.is_empty() {
            return Ok(());
        }
        self.access(cred, ino, AccessFlags::SETATTR)?;
        self.setattr_unchecked(ino, new, flags)
    }

    pub(crate) fn setattr_unchecked(
        &self,
        ino: Ino,
        new: &Stat,
        flags: SetStatFlags,
    ) -> Result<(), Errno> {
        let mut stat = self.get_stat(ino)?;

        // Attribute changes always move ctime, unless the caller pins it.
        stat.ctime = TimeSpec::now();

        if flags.contains(SetStatFlags::MODE_SET) {
            let fmt = stat.mode & libc::S_IFMT as u32;
            stat.mode = (new.mode & 0o7777) | fmt;
        }
        if flags.contains(SetStatFlags::UID_SET) {
            stat.uid = new.uid;
        }
        if flags.contains(SetStatFlags::GID_SET) {
            stat.gid = new.gid;
        }
        if flags.contains(SetStatFlags::SIZE_SET) {
            if stat.is_dir() {
                return Err(Errno::EISDIR);
            }
            if !stat.is_reg() {
                return Err(Errno::EINVAL);
            }
            let fid = self.get_fid(ino)?;
            let hint = self.ext().truncate(&fid, new.size)?;
            stat.size = hint.size;
            stat.blocks = hint.blocks;
            if let Some(mtime) = hint.mtime {
                stat.mtime = mtime;
            }
        }
        if flags.contains(SetStatFlags::ATIME_SET) {
            stat.atime = new.atime;
        }
        if flags.contains(SetStatFlags::MTIME_SET) {
            stat.mtime = new.mtime;
        }
        if flags.contains(SetStatFlags::CTIME_SET) {
            stat.ctime = new.ctime;
        }

        self.set_stat(ino, &stat)
    }

    /// Walks a directory, feeding each entry to `cb` until it returns
    /// `false` or the entries run out, then refreshes the directory atime.
    pub fn readdir(
        &self,
        cred: &Cred,
        dir: Ino,
        cb: impl FnMut(&[u8], Ino) -> bool,
    ) -> Result<(), Errno> {
        let stat = self.get_stat(dir)?;
        crate::cred::check_access(cred, &stat, AccessFlags::LIST_DIR)?;
        if !stat.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        self.tree_iter_children(dir, cb)?;
        self.update_stat(dir, SetStatFlags::ATIME_NOW)
    }

    /// Imports an externally created extent object as a new regular file.
    pub fn import(
        &self,
        cred: &Cred,
        parent: Ino,
        name: &[u8],
        objid: &[u8],
        stat_in: &Stat,
        flags: SetStatFlags,
    ) -> Result<Ino, Errno> {
        self.access(cred, parent, AccessFlags::WRITE)?;
        let ino = self.create_entry(cred, parent, name, None, { stat_in.mode }, FileType::Regular)?;

        let fid = self.file_fid(ino);
        let bound = self
            .set_fid(ino, &fid)
            .and_then(|()| self.ext().attach(&fid, objid))
            .and_then(|()| {
                if flags.is_empty() {
                    Ok(())
                } else {
                    self.setattr_unchecked(ino, stat_in, flags)
                }
            });
        if let Err(err) = bound {
            self.rollback_create(parent, ino, name, FileType::Regular);
            return Err(err);
        }
        Ok(ino)
    }

    /// Destroys an unreachable object: removes its stat, its symlink body
    /// or extent object, and the open marker. A no-op while links remain.
    pub fn destroy_orphaned_file(&self, ino: Ino) -> Result<(), Errno> {
        let stat = self.get_stat(ino)?;
        if stat.nlink > 0 {
            return Ok(());
        }

        let txn = Txn::begin(self.index())?;
        self.del_stat(ino)?;
        self.del_open_mark(ino)?;
        if stat.is_symlink() {
            self.del_link(ino)?;
        } else if stat.is_reg() {
            let fid = self.get_fid(ino)?;
            self.ext().del(&fid)?;
            self.del_fid(ino)?;
        }
        txn.commit()?;
        debug!("destroyed orphaned object {ino}");
        Ok(())
    }

    /// Creates a namespace entry of the given kind under one transaction:
    /// dentry, parent link, fresh stat, optional symlink body, parent time
    /// (and, for directories, link-count) update.
    pub(crate) fn create_entry(
        &self,
        cred: &Cred,
        parent: Ino,
        name: &[u8],
        link_content: Option<&[u8]>,
        mode: u32,
        kind: FileType,
    ) -> Result<Ino, Errno> {
        key::check_name(name)?;
        if kind == FileType::Symlink && link_content.is_none() {
            return Err(Errno::EINVAL);
        }

        let mut parent_stat = self.get_stat(parent)?;
        if !parent_stat.is_dir() {
            return Err(Errno::ENOTDIR);
        }
        match self.tree_lookup(parent, name) {
            Ok(_) => return Err(Errno::EEXIST),
            Err(Errno::ENOENT) => {}
            Err(err) => return Err(err),
        }

        let ino = self.next_inode()?;

        let txn = Txn::begin(self.index())?;
        self.tree_attach(parent, ino, name)?;

        let nlink = match kind {
            FileType::Directory => 2,
            FileType::Regular | FileType::Symlink => 1,
        };
        let stat = Stat::for_new(ino, cred, mode, kind, nlink);
        self.set_stat(ino, &stat)?;

        if let Some(content) = link_content {
            self.set_link(ino, content)?;
        }

        let mut parent_flags = SetStatFlags::CTIME_NOW | SetStatFlags::MTIME_NOW;
        if kind == FileType::Directory {
            // The new directory's ".." is a link to the parent.
            parent_flags |= SetStatFlags::INCR_LINK;
        }
        amend_stat(&mut parent_stat, parent_flags)?;
        self.set_stat(parent, &parent_stat)?;

        txn.commit()?;
        debug!(
            "created {kind:?} {ino} under {parent} as {}",
            String::from_utf8_lossy(name)
        );
        Ok(ino)
    }

    /// Best-effort removal of a half-created entry. Errors are logged and
    /// swallowed so the caller can report the original failure.
    fn rollback_create(&self, parent: Ino, ino: Ino, name: &[u8], kind: FileType) {
        let undo = (|| -> Result<(), Errno> {
            let txn = Txn::begin(self.index())?;
            self.tree_detach(parent, ino, name)?;
            self.del_stat(ino)?;
            if kind == FileType::Symlink {
                self.del_link(ino)?;
            }
            if kind == FileType::Regular {
                if let Ok(fid) = self.get_fid(ino) {
                    match self.ext().del(&fid) {
                        Ok(()) | Err(Errno::ENOENT) => {}
                        Err(err) => return Err(err),
                    }
                    self.del_fid(ino)?;
                }
            }
            if kind == FileType::Directory {
                self.update_stat(parent, SetStatFlags::DECR_LINK)?;
            }
            txn.commit()
        })();
        if let Err(err) = undo {
            warn!("failed to roll back creation of {ino}: {err}");
        }
    }
}

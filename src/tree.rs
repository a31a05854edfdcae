//! Dentry tree primitives.
//!
//! A dentry `(parent, name) -> child` and its reverse parent link
//! `(child, parent) -> link count` always change together. The primitives
//! here run under whatever transaction the caller has open; they never
//! begin one themselves.

use log::debug;
use zerocopy::IntoBytes;
use zerocopy::little_endian::U64;

use crate::Errno;
use crate::Ino;
use crate::fs::Filesystem;
use crate::key;
use crate::kvs::PrefixIter;
use crate::stat::SetStatFlags;

fn decode_u64(value: &[u8]) -> Result<u64, Errno> {
    let raw: [u8; 8] = value.try_into().map_err(|_| Errno::EINVAL)?;
    Ok(u64::from_le_bytes(raw))
}

impl Filesystem {
    /// Resolves `name` under `pino` to a child inode.
    pub(crate) fn tree_lookup(&self, pino: Ino, name: &[u8]) -> Result<Ino, Errno> {
        let value = self.index().get(&key::dentry_key(pino, name))?;
        let child = Ino(decode_u64(&value)?);
        debug!(
            "GET {pino}.dentries.{} = {child}",
            String::from_utf8_lossy(name)
        );
        Ok(child)
    }

    /// Links `ino` under `pino` as `name`: writes the dentry and bumps the
    /// parent-link counter. The parent's stat record is the caller's to
    /// amend — every attach path already writes it once anyway (times,
    /// plus the link count when the child is a new directory).
    pub(crate) fn tree_attach(&self, pino: Ino, ino: Ino, name: &[u8]) -> Result<(), Errno> {
        let index = self.index();
        index.set(&key::dentry_key(pino, name), U64::new(ino.0).as_bytes())?;

        let link_key = key::parent_key(ino, pino);
        let links = match index.get(&link_key) {
            Ok(value) => decode_u64(&value)?,
            Err(Errno::ENOENT) => 0,
            Err(err) => return Err(err),
        };
        index.set(&link_key, &(links + 1).to_le_bytes())?;

        debug!(
            "tree_attach(pino={pino}, ino={ino}, name={})",
            String::from_utf8_lossy(name)
        );
        Ok(())
    }

    /// Unlinks `name` from `pino`: removes the dentry, decrements the
    /// parent-link counter (removing it at zero) and bumps the parent's
    /// ctime+mtime.
    pub(crate) fn tree_detach(&self, pino: Ino, ino: Ino, name: &[u8]) -> Result<(), Errno> {
        let index = self.index();
        index.del(&key::dentry_key(pino, name))?;

        let link_key = key::parent_key(ino, pino);
        let links = decode_u64(&index.get(&link_key)?)?;
        if links > 1 {
            index.set(&link_key, &(links - 1).to_le_bytes())?;
        } else {
            index.del(&link_key)?;
        }

        self.update_stat(pino, SetStatFlags::CTIME_NOW | SetStatFlags::MTIME_NOW)?;

        debug!(
            "tree_detach(pino={pino}, ino={ino}, name={})",
            String::from_utf8_lossy(name)
        );
        Ok(())
    }

    /// Renames a dentry within one parent without touching the link
    /// counters. The caller must have resolved `old_name` to `ino` first.
    pub(crate) fn tree_rename_link(
        &self,
        pino: Ino,
        ino: Ino,
        old_name: &[u8],
        new_name: &[u8],
    ) -> Result<(), Errno> {
        debug_assert_eq!(self.tree_lookup(pino, old_name), Ok(ino));

        let index = self.index();
        index.del(&key::dentry_key(pino, old_name))?;
        index.set(&key::dentry_key(pino, new_name), U64::new(ino.0).as_bytes())?;

        self.update_stat(pino, SetStatFlags::CTIME_NOW)?;

        debug!(
            "tree_rename(pino={pino}, ino={ino}, old={}, new={})",
            String::from_utf8_lossy(old_name),
            String::from_utf8_lossy(new_name)
        );
        Ok(())
    }

    /// True when `ino` has at least one dentry.
    pub(crate) fn tree_has_children(&self, ino: Ino) -> Result<bool, Errno> {
        let mut iter = self.index().prefix_iter(&key::dentry_prefix(ino))?;
        match iter.next() {
            Some(Ok(_)) => Ok(true),
            Some(Err(err)) => Err(err),
            None => Ok(false),
        }
    }

    /// A snapshot iterator over the `(name, child)` pairs of `ino`.
    pub(crate) fn tree_children(&self, ino: Ino) -> Result<ChildIter, Errno> {
        let iter = self.index().prefix_iter(&key::dentry_prefix(ino))?;
        Ok(ChildIter { iter })
    }

    /// Walks the children of `ino`, calling `cb(name, child)` for each.
    /// Iteration stops early when `cb` returns `false`.
    pub(crate) fn tree_iter_children(
        &self,
        ino: Ino,
        mut cb: impl FnMut(&[u8], Ino) -> bool,
    ) -> Result<(), Errno> {
        for child in self.tree_children(ino)? {
            let (name, child_ino) = child?;
            debug!("NEXT {} = {child_ino}", String::from_utf8_lossy(&name));
            if !cb(&name, child_ino) {
                break;
            }
        }
        Ok(())
    }
}

/// Iterator over the decoded dentries of one directory.
#[derive(Debug)]
pub(crate) struct ChildIter {
    iter: PrefixIter,
}

impl Iterator for ChildIter {
    type Item = Result<(Box<[u8]>, Ino), Errno>;

    fn next(&mut self) -> Option<Self::Item> {
        let entry = match self.iter.next()? {
            Ok(entry) => entry,
            Err(err) => return Some(Err(err)),
        };
        let (raw_key, raw_value) = entry;
        let decoded = key::dentry_key_name(&raw_key)
            .map(Box::<[u8]>::from)
            .and_then(|name| Ok((name, Ino(decode_u64(&raw_value)?))));
        Some(decoded)
    }
}

//! In-memory extent store.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::Errno;
use crate::Fid;
use crate::extstore::ExtStore;
use crate::extstore::IoHint;
use crate::time::TimeSpec;

const BLOCK_SIZE: u64 = 512;

fn blocks_for(size: u64) -> u64 {
    size.div_ceil(BLOCK_SIZE)
}

/// An extent store keeping object data in anonymous memory. Always
/// synchronous, so `fsync` is a no-op.
#[derive(Debug, Default)]
pub struct MemExtStore {
    objects: Mutex<HashMap<Fid, Vec<u8>>>,
}

impl MemExtStore {
    /// Creates an empty store.
    pub fn new() -> MemExtStore {
        MemExtStore::default()
    }

    /// True when an object exists for `fid`.
    pub fn contains(&self, fid: &Fid) -> bool {
        self.objects.lock().contains_key(fid)
    }

    /// Number of live objects.
    pub fn len(&self) -> usize {
        self.objects.lock().len()
    }

    /// True when the store holds no objects.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ExtStore for MemExtStore {
    fn create(&self, fid: &Fid) -> Result<(), Errno> {
        let mut objects = self.objects.lock();
        if objects.contains_key(fid) {
            return Err(Errno::EEXIST);
        }
        objects.insert(*fid, Vec::new());
        Ok(())
    }

    fn del(&self, fid: &Fid) -> Result<(), Errno> {
        self.objects.lock().remove(fid).map(drop).ok_or(Errno::ENOENT)
    }

    fn read(&self, fid: &Fid, off: u64, buf: &mut [u8]) -> Result<(usize, bool, IoHint), Errno> {
        let objects = self.objects.lock();
        let data = objects.get(fid).ok_or(Errno::ENOENT)?;
        let len = data.len() as u64;

        let hint = IoHint {
            size: len,
            blocks: blocks_for(len),
            atime: Some(TimeSpec::now()),
            ..IoHint::default()
        };

        if off >= len {
            return Ok((0, true, hint));
        }

        let start = off as usize;
        let count = buf.len().min(data.len() - start);
        buf[..count].copy_from_slice(&data[start..start + count]);
        let eof = start + count == data.len();
        Ok((count, eof, hint))
    }

    fn write(&self, fid: &Fid, off: u64, buf: &[u8]) -> Result<(usize, IoHint), Errno> {
        let mut objects = self.objects.lock();
        let data = objects.get_mut(fid).ok_or(Errno::ENOENT)?;

        let end = off as usize + buf.len();
        if data.len() < end {
            data.resize(end, 0);
        }
        data[off as usize..end].copy_from_slice(buf);

        let now = TimeSpec::now();
        let hint = IoHint {
            size: data.len() as u64,
            blocks: blocks_for(data.len() as u64),
            mtime: Some(now),
            ctime: Some(now),
            ..IoHint::default()
        };
        Ok((buf.len(), hint))
    }

    fn truncate(&self, fid: &Fid, new_size: u64) -> Result<IoHint, Errno> {
        let mut objects = self.objects.lock();
        let data = objects.get_mut(fid).ok_or(Errno::ENOENT)?;
        data.resize(new_size as usize, 0);

        let now = TimeSpec::now();
        Ok(IoHint {
            size: new_size,
            blocks: blocks_for(new_size),
            mtime: Some(now),
            ctime: Some(now),
            ..IoHint::default()
        })
    }

    fn attach(&self, fid: &Fid, _objid: &[u8]) -> Result<(), Errno> {
        // The external object id has no meaning for a memory-backed store;
        // binding it just materialises an empty object under fid.
        let mut objects = self.objects.lock();
        objects.entry(*fid).or_default();
        Ok(())
    }

    fn fsync(&self, _fid: &Fid) -> Result<(), Errno> {
        Ok(())
    }
}

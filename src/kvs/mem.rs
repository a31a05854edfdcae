//! In-memory reference backend.
//!
//! A `BTreeMap` gives the same byte-lexicographic key order as the real
//! store. Transactions snapshot the whole map at `begin`, which makes
//! discard an exact byte-image rollback; the tests rely on that.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use log::trace;
use parking_lot::Mutex;

use crate::Errno;
use crate::Fid;
use crate::kvs::Kvs;
use crate::kvs::KvsIndex;
use crate::kvs::PrefixIter;

type Tree = BTreeMap<Box<[u8]>, Box<[u8]>>;

#[derive(Debug, Default)]
struct Tables {
    map: Tree,
    snapshot: Option<Tree>,
}

/// An in-memory KV store holding any number of independent indices.
#[derive(Debug, Default)]
pub struct MemKvs {
    indices: Mutex<HashMap<Fid, Arc<Mutex<Tables>>>>,
}

impl MemKvs {
    /// Creates an empty store.
    pub fn new() -> MemKvs {
        MemKvs::default()
    }
}

impl Kvs for MemKvs {
    fn index_create(&self, fid: &Fid) -> Result<Box<dyn KvsIndex>, Errno> {
        let mut indices = self.indices.lock();
        if indices.contains_key(fid) {
            return Err(Errno::EEXIST);
        }
        let tables = Arc::new(Mutex::new(Tables::default()));
        indices.insert(*fid, tables.clone());
        Ok(Box::new(MemIndex { tables }))
    }

    fn index_open(&self, fid: &Fid) -> Result<Box<dyn KvsIndex>, Errno> {
        let indices = self.indices.lock();
        let tables = indices.get(fid).ok_or(Errno::ENOENT)?.clone();
        Ok(Box::new(MemIndex { tables }))
    }

    fn index_delete(&self, fid: &Fid) -> Result<(), Errno> {
        self.indices
            .lock()
            .remove(fid)
            .map(drop)
            .ok_or(Errno::ENOENT)
    }
}

/// Handle to one in-memory index.
#[derive(Debug)]
pub struct MemIndex {
    tables: Arc<Mutex<Tables>>,
}

impl KvsIndex for MemIndex {
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, Errno> {
        let tables = self.tables.lock();
        tables
            .map
            .get(key)
            .map(|value| value.to_vec())
            .ok_or(Errno::ENOENT)
    }

    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Errno> {
        trace!("SET {} = {} bytes", KeyDisplay(key), value.len());
        let mut tables = self.tables.lock();
        tables.map.insert(key.into(), value.into());
        Ok(())
    }

    fn del(&self, key: &[u8]) -> Result<(), Errno> {
        trace!("DEL {}", KeyDisplay(key));
        let mut tables = self.tables.lock();
        tables.map.remove(key).map(drop).ok_or(Errno::ENOENT)
    }

    fn prefix_iter(&self, prefix: &[u8]) -> Result<PrefixIter, Errno> {
        let tables = self.tables.lock();
        let entries: Vec<_> = tables
            .map
            .range::<[u8], _>((
                std::ops::Bound::Included(prefix),
                std::ops::Bound::Unbounded,
            ))
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| Ok((key.clone(), value.clone())))
            .collect();
        Ok(PrefixIter::new(entries.into_iter()))
    }

    fn begin_transaction(&self) -> Result<(), Errno> {
        let mut tables = self.tables.lock();
        if tables.snapshot.is_some() {
            return Err(Errno::EINVAL);
        }
        tables.snapshot = Some(tables.map.clone());
        Ok(())
    }

    fn end_transaction(&self) -> Result<(), Errno> {
        let mut tables = self.tables.lock();
        tables.snapshot.take().map(drop).ok_or(Errno::EINVAL)
    }

    fn discard_transaction(&self) -> Result<(), Errno> {
        let mut tables = self.tables.lock();
        let snapshot = tables.snapshot.take().ok_or(Errno::EINVAL)?;
        tables.map = snapshot;
        Ok(())
    }

    fn incr_counter(&self, key: &[u8]) -> Result<u64, Errno> {
        let mut tables = self.tables.lock();
        let current = match tables.map.get(key) {
            Some(value) => {
                let raw: [u8; 8] = value.as_ref().try_into().map_err(|_| Errno::EINVAL)?;
                u64::from_le_bytes(raw)
            }
            None => 0,
        };
        let next = current.checked_add(1).ok_or(Errno::EINVAL)?;
        tables.map.insert(key.into(), next.to_le_bytes().into());
        Ok(next)
    }
}

struct KeyDisplay<'a>(&'a [u8]);

impl std::fmt::Display for KeyDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for byte in self.0 {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

//! Ordered key-value store abstraction.
//!
//! The namespace persists everything into one index of an ordered binary
//! KV store: keys are opaque byte strings compared lexicographically,
//! values are opaque blobs. The store is consumed through the [`Kvs`] and
//! [`KvsIndex`] traits; an in-memory reference backend lives in
//! [`mem`](crate::kvs::mem).

use std::fmt;

use log::warn;

use crate::Errno;
use crate::Fid;

pub mod mem;

/// A key/value pair yielded by a prefix scan.
pub type KvPair = (Box<[u8]>, Box<[u8]>);

/// Factory for index handles of one KV store deployment.
pub trait Kvs: Send + Sync {
    /// Creates a new, empty index.
    fn index_create(&self, fid: &Fid) -> Result<Box<dyn KvsIndex>, Errno>;
    /// Opens an existing index.
    fn index_open(&self, fid: &Fid) -> Result<Box<dyn KvsIndex>, Errno>;
    /// Deletes an index and everything in it.
    fn index_delete(&self, fid: &Fid) -> Result<(), Errno>;
}

/// One ordered index. All namespace records of a single filesystem live in
/// one index; a single writer per index is assumed.
pub trait KvsIndex: Send + Sync {
    /// Looks up a key. `ENOENT` when absent.
    fn get(&self, key: &[u8]) -> Result<Vec<u8>, Errno>;

    /// Inserts or overwrites a key.
    fn set(&self, key: &[u8], value: &[u8]) -> Result<(), Errno>;

    /// Deletes a key. `ENOENT` when absent.
    fn del(&self, key: &[u8]) -> Result<(), Errno>;

    /// Opens a scan over every key starting with `prefix`, in key order.
    ///
    /// The scan observes a snapshot taken at open time; concurrent inserts
    /// into the scanned range are not guaranteed to be visible.
    fn prefix_iter(&self, prefix: &[u8]) -> Result<PrefixIter, Errno>;

    /// Starts a transaction scope on this index.
    fn begin_transaction(&self) -> Result<(), Errno>;

    /// Commits the current transaction scope.
    fn end_transaction(&self) -> Result<(), Errno>;

    /// Rolls back the current transaction scope.
    fn discard_transaction(&self) -> Result<(), Errno>;

    /// Atomically increments a little-endian u64 counter key, creating it
    /// at zero first, and returns the post-increment value.
    ///
    /// The default is a read-modify-write, which the single-writer
    /// discipline makes sufficient; backends with a native counter
    /// primitive should override it.
    fn incr_counter(&self, key: &[u8]) -> Result<u64, Errno> {
        let current = match self.get(key) {
            Ok(value) => {
                let raw: [u8; 8] = value.as_slice().try_into().map_err(|_| Errno::EINVAL)?;
                u64::from_le_bytes(raw)
            }
            Err(Errno::ENOENT) => 0,
            Err(err) => return Err(err),
        };
        let next = current.checked_add(1).ok_or(Errno::EINVAL)?;
        self.set(key, &next.to_le_bytes())?;
        Ok(next)
    }
}

/// A snapshot scan over one key prefix.
///
/// Yields pairs in ascending key order; an `Err` item reports a backend
/// failure discovered mid-scan and terminates the iteration.
pub struct PrefixIter {
    inner: Box<dyn Iterator<Item = Result<KvPair, Errno>> + Send>,
}

impl PrefixIter {
    /// Wraps a backend scan.
    pub fn new(inner: impl Iterator<Item = Result<KvPair, Errno>> + Send + 'static) -> PrefixIter {
        PrefixIter {
            inner: Box::new(inner),
        }
    }

    /// An empty scan (prefix has no entries).
    pub fn empty() -> PrefixIter {
        PrefixIter::new(std::iter::empty())
    }
}

impl Iterator for PrefixIter {
    type Item = Result<KvPair, Errno>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

impl fmt::Debug for PrefixIter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PrefixIter").finish_non_exhaustive()
    }
}

/// Scoped transaction: commits explicitly, discards on drop.
///
/// Every multi-step mutation runs inside one of these so that no error
/// path can leave a transaction open.
#[must_use]
pub(crate) struct Txn<'a> {
    index: &'a dyn KvsIndex,
    armed: bool,
}

impl<'a> Txn<'a> {
    pub(crate) fn begin(index: &'a dyn KvsIndex) -> Result<Txn<'a>, Errno> {
        index.begin_transaction()?;
        Ok(Txn { index, armed: true })
    }

    pub(crate) fn commit(mut self) -> Result<(), Errno> {
        self.armed = false;
        self.index.end_transaction()
    }
}

impl Drop for Txn<'_> {
    fn drop(&mut self) {
        if self.armed {
            if let Err(err) = self.index.discard_transaction() {
                warn!("failed to discard transaction: {err}");
            }
        }
    }
}

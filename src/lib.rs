//! A POSIX-style network filesystem namespace over an ordered key-value
//! store.
//!
//! This crate is the translation layer between a file-handle-oriented
//! front-end (an NFSv4 server) and a flat, ordered, binary KV index: it
//! persists dentries, reverse parent links, stat records, symlink bodies
//! and inode-to-object-id bindings as packed keys, and keeps file byte
//! data in a pluggable extent store. On top of that sit the file-handle
//! object, the NFSv4 share-reservation state machine (open/reopen/close,
//! create modes, delegations, delete-on-close) and the read/write/truncate
//! path.
//!
//! The KV store and the extent store are external collaborators, consumed
//! through the [`Kvs`]/[`KvsIndex`] and [`ExtStore`] traits; in-memory
//! reference backends ([`MemKvs`], [`MemExtStore`]) ship with the crate.

#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

use std::fmt;

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;

pub use crate::access_flags::AccessFlags;
pub use crate::cred::Cred;
pub use crate::errno::Errno;
pub use crate::extstore::ExtStore;
pub use crate::extstore::IoHint;
pub use crate::extstore::mem::MemExtStore;
pub use crate::fs::Filesystem;
pub use crate::handle::FileHandle;
pub use crate::handle::HandleKey;
pub use crate::key::MAX_NAME_LEN;
pub use crate::kvs::KvPair;
pub use crate::kvs::Kvs;
pub use crate::kvs::KvsIndex;
pub use crate::kvs::PrefixIter;
pub use crate::kvs::mem::MemKvs;
pub use crate::ns::RenameFlags;
pub use crate::open_flags::OpenFlags;
pub use crate::stat::FileType;
pub use crate::stat::SetStatFlags;
pub use crate::stat::Stat;
pub use crate::state::CreateMode;
pub use crate::state::FileState;
pub use crate::state::LeaseOp;
pub use crate::state::OpenFd;
pub use crate::state::OpenOwner;
pub use crate::state::StateKind;
pub use crate::time::TimeSpec;

mod access_flags;
mod cred;
mod errno;
pub mod extstore;
mod fs;
mod handle;
mod io;
mod key;
pub mod kvs;
mod ns;
mod open_flags;
mod stat;
mod state;
mod time;
mod tree;

/// An inode number.
///
/// `Ino(2)` is the root directory; zero never names an object and doubles
/// as the "unset" value in closed descriptors.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
)]
#[repr(transparent)]
pub struct Ino(pub u64);

impl Ino {
    /// The root directory inode.
    pub const ROOT: Ino = Ino(2);

    /// The "no inode" value. Never names an object; closed descriptors
    /// carry it.
    pub const INVALID: Ino = Ino(0);
}

impl fmt::Display for Ino {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// A 128-bit opaque object identifier.
///
/// Identifies KV indices towards the store and file data objects towards
/// the extent store.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, FromBytes, IntoBytes, KnownLayout, Immutable,
)]
#[repr(C)]
pub struct Fid {
    /// High word; by convention the container (filesystem) part.
    pub hi: u64,
    /// Low word; by convention the object part.
    pub lo: u64,
}

impl Fid {
    /// Builds an identifier from its two words.
    pub const fn new(hi: u64, lo: u64) -> Fid {
        Fid { hi, lo }
    }
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}:{:x}", self.hi, self.lo)
    }
}

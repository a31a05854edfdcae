//! The on-index key schema.
//!
//! Every key embeds a two-byte metadata header `(type, version)` so future
//! layout changes can coexist with existing records. Keys are compared
//! bytewise by the store, which is why the parent inode leads the dentry
//! key: all children of a directory form one contiguous, prefix-addressable
//! run.
//!
//! Integer fields inside keys are little-endian; the layouts are packed
//! with no implicit padding.

use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;
use smallvec::SmallVec;
use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;
use zerocopy::little_endian::U64;

use crate::Errno;
use crate::Ino;

/// Current version of the key layout.
pub(crate) const KEY_VERSION_0: u8 = 0;

/// Longest allowed dentry name, in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// Well-known key of the persistent inode counter.
pub(crate) const INO_COUNTER_KEY: &[u8] = b"ino_counter";

/// An encoded key. Fixed-layout keys fit inline; dentry keys with long
/// names spill to the heap.
pub(crate) type KeyBuf = SmallVec<[u8; 32]>;

/// Tag byte identifying what a key addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(u8)]
pub(crate) enum KeyType {
    /// `(parent, name) -> child` directory entry.
    Dirent = 1,
    /// `(child, parent) -> link count` reverse mapping.
    Parent = 2,
    /// `inode -> stat blob`.
    Stat = 3,
    /// `inode -> symlink target`.
    Symlink = 4,
    /// `inode -> extent-store object id` for regular files.
    InodeFid = 5,
    /// Marker for an inode that was unlinked while still open.
    OpenMark = 6,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub(crate) struct KeyMd {
    ktype: u8,
    version: u8,
}

impl KeyMd {
    fn new(ktype: KeyType) -> KeyMd {
        KeyMd {
            ktype: ktype.into(),
            version: KEY_VERSION_0,
        }
    }
}

/// Key for the child -> parent link counter.
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct ParentKey {
    ino: U64,
    md: KeyMd,
    pino: U64,
}

/// Key for any single-valued attribute of an inode (stat, symlink target,
/// object id, open marker).
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct InodeAttrKey {
    ino: U64,
    md: KeyMd,
}

/// Size of the dentry prefix: parent inode plus metadata header.
pub(crate) const DENTRY_PREFIX_LEN: usize = 8 + 2;

/// Validates a dentry name for entry creation.
///
/// `.` , `..` and `/` are names that always exist, hence `EEXIST`; an
/// embedded `/` or NUL can never name a dentry, hence `EINVAL`.
pub(crate) fn check_name(name: &[u8]) -> Result<(), Errno> {
    if name.is_empty() {
        return Err(Errno::EINVAL);
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Errno::E2BIG);
    }
    if name == b"." || name == b".." || name == b"/" {
        return Err(Errno::EEXIST);
    }
    if memchr::memchr2(b'/', 0, name).is_some() {
        return Err(Errno::EINVAL);
    }
    Ok(())
}

/// Encodes the dentry key `(pino, name) -> child`.
///
/// Layout: `pino | md | name_len | name | NUL`. The caller is responsible
/// for having validated the name.
pub(crate) fn dentry_key(pino: Ino, name: &[u8]) -> KeyBuf {
    debug_assert!(!name.is_empty() && name.len() <= MAX_NAME_LEN);
    let mut key = dentry_prefix(pino);
    key.push(name.len() as u8);
    key.extend_from_slice(name);
    key.push(0);
    key
}

/// Encodes the shortest byte string that is a proper prefix of every
/// dentry key under `pino`.
pub(crate) fn dentry_prefix(pino: Ino) -> KeyBuf {
    let mut key = KeyBuf::new();
    key.extend_from_slice(U64::new(pino.0).as_bytes());
    key.extend_from_slice(KeyMd::new(KeyType::Dirent).as_bytes());
    key
}

/// Decodes the name out of a full dentry key.
pub(crate) fn dentry_key_name(key: &[u8]) -> Result<&[u8], Errno> {
    // prefix + len byte + at least one name byte + NUL
    if key.len() < DENTRY_PREFIX_LEN + 3 {
        return Err(Errno::EINVAL);
    }
    if !matches!(KeyType::try_from(key[8]), Ok(KeyType::Dirent)) || key[9] != KEY_VERSION_0 {
        return Err(Errno::EINVAL);
    }
    let len = key[DENTRY_PREFIX_LEN] as usize;
    if key.len() != DENTRY_PREFIX_LEN + 1 + len + 1 {
        return Err(Errno::EINVAL);
    }
    Ok(&key[DENTRY_PREFIX_LEN + 1..DENTRY_PREFIX_LEN + 1 + len])
}

/// Encodes the parent-link key `(ino, pino) -> link count`.
pub(crate) fn parent_key(ino: Ino, pino: Ino) -> KeyBuf {
    let key = ParentKey {
        ino: U64::new(ino.0),
        md: KeyMd::new(KeyType::Parent),
        pino: U64::new(pino.0),
    };
    KeyBuf::from_slice(key.as_bytes())
}

/// Encodes the prefix addressing every parent link of `ino`.
pub(crate) fn parent_prefix(ino: Ino) -> KeyBuf {
    let mut key = KeyBuf::new();
    key.extend_from_slice(U64::new(ino.0).as_bytes());
    key.extend_from_slice(KeyMd::new(KeyType::Parent).as_bytes());
    key
}

/// Decodes the parent inode out of a full parent-link key.
pub(crate) fn parent_key_pino(key: &[u8]) -> Result<Ino, Errno> {
    let parsed = ParentKey::read_from_bytes(key).map_err(|_| Errno::EINVAL)?;
    Ok(Ino(parsed.pino.get()))
}

/// Encodes the key of a single-valued inode attribute.
pub(crate) fn inode_attr_key(ino: Ino, ktype: KeyType) -> KeyBuf {
    let key = InodeAttrKey {
        ino: U64::new(ino.0),
        md: KeyMd::new(ktype),
    };
    KeyBuf::from_slice(key.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dentry_prefix_is_a_proper_prefix_of_every_child_key() {
        let prefix = dentry_prefix(Ino(42));
        assert_eq!(prefix.len(), DENTRY_PREFIX_LEN);
        for name in [&b"a"[..], b"zz", &[0xff; MAX_NAME_LEN]] {
            let key = dentry_key(Ino(42), name);
            assert!(key.len() > prefix.len());
            assert!(key.starts_with(&prefix));
        }
        // A sibling directory's children never share the prefix.
        assert!(!dentry_key(Ino(43), b"a").starts_with(&prefix));
    }

    #[test]
    fn dentry_name_round_trip() {
        let name = b"some-entry";
        let key = dentry_key(Ino(7), name);
        assert_eq!(dentry_key_name(&key).unwrap(), name);

        let max = [b'a'; MAX_NAME_LEN];
        let key = dentry_key(Ino(7), &max);
        assert_eq!(dentry_key_name(&key).unwrap(), &max[..]);
    }

    #[test]
    fn truncated_dentry_key_is_rejected() {
        let key = dentry_key(Ino(7), b"name");
        assert_eq!(dentry_key_name(&key[..key.len() - 2]), Err(Errno::EINVAL));
        assert_eq!(dentry_key_name(&key[..5]), Err(Errno::EINVAL));
    }

    #[test]
    fn parent_key_round_trip() {
        let key = parent_key(Ino(9), Ino(2));
        assert_eq!(key.len(), 18);
        assert!(key.starts_with(&parent_prefix(Ino(9))));
        assert_eq!(parent_key_pino(&key).unwrap(), Ino(2));
    }

    #[test]
    fn attr_keys_differ_by_type_only() {
        let stat = inode_attr_key(Ino(5), KeyType::Stat);
        let link = inode_attr_key(Ino(5), KeyType::Symlink);
        assert_eq!(stat.len(), 10);
        assert_eq!(stat[..8], link[..8]);
        assert_ne!(stat, link);
    }

    #[test]
    fn name_validation() {
        assert!(check_name(b"regular-name").is_ok());
        assert!(check_name(&[b'a'; MAX_NAME_LEN]).is_ok());
        assert_eq!(check_name(b""), Err(Errno::EINVAL));
        assert_eq!(check_name(&[b'a'; MAX_NAME_LEN + 1]), Err(Errno::E2BIG));
        assert_eq!(check_name(b"."), Err(Errno::EEXIST));
        assert_eq!(check_name(b".."), Err(Errno::EEXIST));
        assert_eq!(check_name(b"/"), Err(Errno::EEXIST));
        assert_eq!(check_name(b"a/b"), Err(Errno::EINVAL));
        assert_eq!(check_name(b"a\0b"), Err(Errno::EINVAL));
    }
}

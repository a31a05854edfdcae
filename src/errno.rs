//! POSIX error codes.
//!
//! Every fallible operation in this crate returns `Result<T, Errno>`. The
//! wrapped value is the positive `errno` constant from `libc`; the negative
//! `-errno` convention used on the wire is applied only at the RPC boundary
//! via [`Errno::to_wire`].

use std::fmt;

/// A POSIX `errno` value.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(i32);

impl Errno {
    /// Operation not permitted (access check failure).
    pub const EPERM: Errno = Errno(libc::EPERM);
    /// No such file or directory.
    pub const ENOENT: Errno = Errno(libc::ENOENT);
    /// I/O error. Never produced by the namespace core itself; reserved
    /// for [`Kvs`](crate::Kvs) and [`ExtStore`](crate::ExtStore) backends
    /// reporting device or transport failures.
    pub const EIO: Errno = Errno(libc::EIO);
    /// Argument list too long; used for dentry names longer than 255 bytes.
    pub const E2BIG: Errno = Errno(libc::E2BIG);
    /// Bad file descriptor (e.g. close of a state that is not open).
    pub const EBADF: Errno = Errno(libc::EBADF);
    /// Out of memory.
    pub const ENOMEM: Errno = Errno(libc::ENOMEM);
    /// Permission denied (share reservation conflict).
    pub const EACCES: Errno = Errno(libc::EACCES);
    /// File exists.
    pub const EEXIST: Errno = Errno(libc::EEXIST);
    /// Cross-device link.
    pub const EXDEV: Errno = Errno(libc::EXDEV);
    /// Not a directory.
    pub const ENOTDIR: Errno = Errno(libc::ENOTDIR);
    /// Is a directory.
    pub const EISDIR: Errno = Errno(libc::EISDIR);
    /// Invalid argument.
    pub const EINVAL: Errno = Errno(libc::EINVAL);
    /// Too many links or too many opens.
    pub const EMLINK: Errno = Errno(libc::EMLINK);
    /// Directory not empty.
    pub const ENOTEMPTY: Errno = Errno(libc::ENOTEMPTY);
    /// No buffer space available (serialization target too small).
    pub const ENOBUFS: Errno = Errno(libc::ENOBUFS);
    /// Operation not supported.
    pub const ENOTSUP: Errno = Errno(libc::ENOTSUP);

    /// Wraps a raw errno value.
    pub const fn from_i32(code: i32) -> Errno {
        Errno(code)
    }

    /// Returns the positive errno value.
    pub const fn code(self) -> i32 {
        self.0
    }

    /// Returns the negative `-errno` representation used on the wire.
    pub const fn to_wire(self) -> i32 {
        -self.0
    }

    fn name(self) -> Option<&'static str> {
        let name = match self.0 {
            libc::EPERM => "EPERM",
            libc::ENOENT => "ENOENT",
            libc::EIO => "EIO",
            libc::E2BIG => "E2BIG",
            libc::EBADF => "EBADF",
            libc::ENOMEM => "ENOMEM",
            libc::EACCES => "EACCES",
            libc::EEXIST => "EEXIST",
            libc::EXDEV => "EXDEV",
            libc::ENOTDIR => "ENOTDIR",
            libc::EISDIR => "EISDIR",
            libc::EINVAL => "EINVAL",
            libc::EMLINK => "EMLINK",
            libc::ENOTEMPTY => "ENOTEMPTY",
            libc::ENOBUFS => "ENOBUFS",
            libc::ENOTSUP => "ENOTSUP",
            _ => return None,
        };
        Some(name)
    }
}

impl fmt::Debug for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => f.write_str(name),
            None => write!(f, "Errno({})", self.0),
        }
    }
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl std::error::Error for Errno {}

impl From<Errno> for i32 {
    fn from(errno: Errno) -> i32 {
        errno.code()
    }
}

use std::fmt::Display;
use std::fmt::Formatter;

use bitflags::bitflags;

bitflags! {
    /// NFS-style open mode of a file state.
    ///
    /// An empty set is the CLOSED state. The deny bits are share
    /// reservations: they do not grant access, they forbid it to others.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct OpenFlags: u32 {
        /// Open for reading.
        const READ = 0x01;
        /// Open for writing.
        const WRITE = 0x02;
        /// Truncate on open.
        const TRUNC = 0x04;
        /// Deny other readers.
        const DENY_READ = 0x08;
        /// Deny other writers.
        const DENY_WRITE = 0x10;
    }
}

impl OpenFlags {
    /// The closed state: no access, no denials.
    pub const CLOSED: OpenFlags = OpenFlags::empty();

    /// Open for both reading and writing.
    pub const RDWR: OpenFlags = OpenFlags::READ.union(OpenFlags::WRITE);

    /// True when the flags describe a closed state.
    pub fn is_closed(self) -> bool {
        self.is_empty()
    }

    /// True when an fd opened with `self` can serve an I/O request that
    /// needs `want` access.
    pub fn satisfies(self, want: OpenFlags) -> bool {
        let want_access = want & OpenFlags::RDWR;
        self.contains(want_access)
    }
}

impl Display for OpenFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.bits(), f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn closed_is_empty() {
        assert!(OpenFlags::CLOSED.is_closed());
        assert!(!OpenFlags::READ.is_closed());
    }

    #[test]
    fn satisfies_checks_access_bits_only() {
        assert!(OpenFlags::RDWR.satisfies(OpenFlags::READ));
        assert!(OpenFlags::RDWR.satisfies(OpenFlags::WRITE));
        assert!(!OpenFlags::READ.satisfies(OpenFlags::WRITE));
        // Deny bits on the request do not widen the required access.
        assert!(OpenFlags::READ.satisfies(OpenFlags::READ | OpenFlags::DENY_WRITE));
    }
}

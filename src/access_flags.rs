use std::fmt::Display;
use std::fmt::Formatter;

use bitflags::bitflags;

bitflags! {
    /// Access rights requested from the [`access`](crate::Filesystem::access)
    /// predicate.
    ///
    /// The composite constants name the operations the namespace layer
    /// performs; they expand to the plain rwx bits checked against the
    /// owner/group/other triplet of the object's mode.
    #[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
    pub struct AccessFlags: u32 {
        /// Read the object.
        const READ = 0x01;
        /// Modify the object.
        const WRITE = 0x02;
        /// Execute the object or search the directory.
        const EXEC = 0x04;
        /// Change the attributes of the object.
        const SETATTR = Self::WRITE.bits();
        /// Create an entry inside a directory.
        const CREATE_ENTITY = Self::WRITE.bits() | Self::EXEC.bits();
        /// Remove an entry from a directory.
        const DELETE_ENTITY = Self::WRITE.bits() | Self::EXEC.bits();
        /// List the entries of a directory.
        const LIST_DIR = Self::EXEC.bits();
    }
}

impl Display for AccessFlags {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(&self.bits(), f)
    }
}

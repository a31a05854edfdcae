//! Caller credentials and the Unix mode check.

use crate::AccessFlags;
use crate::Errno;
use crate::stat::Stat;

/// Credentials of the caller, immutable for the duration of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Cred {
    /// Effective user id.
    pub uid: u32,
    /// Effective group id.
    pub gid: u32,
}

impl Cred {
    /// The superuser. Bypasses every mode check.
    pub const ROOT: Cred = Cred { uid: 0, gid: 0 };

    /// Creates credentials from a uid/gid pair.
    pub fn new(uid: u32, gid: u32) -> Cred {
        Cred { uid, gid }
    }
}

/// Checks `flags` against the owner/group/other triplet of `stat`.
///
/// Exactly one triplet applies: the owner's when the uids match, the
/// group's when only the gids match, otherwise the "other" bits.
pub(crate) fn check_access(cred: &Cred, stat: &Stat, flags: AccessFlags) -> Result<(), Errno> {
    if cred.uid == 0 {
        return Ok(());
    }

    let mut check: u32 = 0;
    let shift = if cred.uid == stat.uid {
        6
    } else if cred.gid == stat.gid {
        3
    } else {
        0
    };

    if flags.contains(AccessFlags::READ) {
        check |= 0o4 << shift;
    }
    if flags.contains(AccessFlags::WRITE) {
        check |= 0o2 << shift;
    }
    if flags.contains(AccessFlags::EXEC) {
        check |= 0o1 << shift;
    }

    let mode = stat.mode;
    if (check & mode) == check {
        Ok(())
    } else {
        Err(Errno::EPERM)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ino;
    use crate::stat::FileType;

    fn stat_with_mode(mode: u32) -> Stat {
        let mut stat = Stat::for_new(Ino(3), &Cred::new(100, 100), mode, FileType::Regular, 1);
        stat.uid = 100;
        stat.gid = 200;
        stat
    }

    #[test]
    fn root_bypasses_everything() {
        let stat = stat_with_mode(0o000);
        assert!(check_access(&Cred::ROOT, &stat, AccessFlags::all()).is_ok());
    }

    #[test]
    fn owner_triplet_applies_to_owner() {
        let stat = stat_with_mode(0o700);
        let owner = Cred::new(100, 1);
        let other = Cred::new(7, 7);
        assert!(check_access(&owner, &stat, AccessFlags::READ | AccessFlags::WRITE).is_ok());
        assert_eq!(
            check_access(&other, &stat, AccessFlags::READ),
            Err(Errno::EPERM)
        );
    }

    #[test]
    fn group_triplet_applies_to_group_member() {
        let stat = stat_with_mode(0o040);
        let member = Cred::new(7, 200);
        assert!(check_access(&member, &stat, AccessFlags::READ).is_ok());
        assert_eq!(
            check_access(&member, &stat, AccessFlags::WRITE),
            Err(Errno::EPERM)
        );
    }

    #[test]
    fn composite_flags_expand_to_rwx_bits() {
        let stat = stat_with_mode(0o003);
        let other = Cred::new(7, 7);
        assert!(check_access(&other, &stat, AccessFlags::LIST_DIR).is_ok());
        assert!(check_access(&other, &stat, AccessFlags::DELETE_ENTITY).is_ok());
        assert_eq!(
            check_access(&other, &stat, AccessFlags::READ),
            Err(Errno::EPERM)
        );
    }
}

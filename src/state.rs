//! Stateful opens: share reservations, delegations, delete-on-close.
//!
//! A [`FileState`] is the per-open (or per-lock, per-delegation) object a
//! front-end holds for a client. Share counters live in a per-inode
//! [`OpenFile`] record owned by the filesystem; they exist only in memory
//! and only while something is open.

use std::sync::Arc;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use log::debug;
use log::warn;
use parking_lot::Mutex;
use parking_lot::RwLock;

use crate::Errno;
use crate::Ino;
use crate::OpenFlags;
use crate::cred::Cred;
use crate::fs::Filesystem;
use crate::handle::FileHandle;
use crate::stat::SetStatFlags;
use crate::stat::Stat;
use crate::time::TimeSpec;

/// Identity of the opener, kept for diagnostics and owner-aware backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpenOwner {
    /// Process id of the opener.
    pub pid: u32,
    /// Crate-local id of the opening thread.
    pub tid: u32,
}

impl OpenOwner {
    /// The owner identity of the calling thread.
    pub fn this_thread() -> OpenOwner {
        static NEXT_TID: AtomicU32 = AtomicU32::new(1);
        thread_local! {
            static TID: u32 = NEXT_TID.fetch_add(1, Ordering::Relaxed);
        }
        OpenOwner {
            pid: std::process::id(),
            tid: TID.with(|tid| *tid),
        }
    }
}

/// The open descriptor embedded in an open state.
#[derive(Debug, Clone, Copy)]
pub struct OpenFd {
    /// Inode the descriptor is open on; [`Ino::INVALID`] when closed.
    pub ino: Ino,
    /// Who opened it.
    pub owner: OpenOwner,
    /// Flags it was opened with.
    pub flags: OpenFlags,
}

const CLOSED_FD: OpenFd = OpenFd {
    ino: Ino::INVALID,
    owner: OpenOwner { pid: 0, tid: 0 },
    flags: OpenFlags::CLOSED,
};

#[derive(Debug, Clone, Copy)]
struct FdSlot {
    openflags: OpenFlags,
    fd: OpenFd,
}

/// What kind of state the front-end allocated.
#[derive(Debug)]
pub enum StateKind {
    /// An NFSv4 OPEN (share reservation holder).
    Share,
    /// A byte-range lock state; I/O through it resolves to the open state
    /// it was derived from.
    Lock {
        /// The open state this lock state belongs to.
        open: Arc<FileState>,
    },
    /// A delegation granted to a client.
    Deleg,
}

/// One open/lock/delegation state granted to a client.
///
/// Invariant: the state is either closed (`openflags` empty and `fd.ino`
/// zero) or open (flags non-empty and `fd.ino` equal to the object's
/// inode); every transition checks this on entry and exit.
#[derive(Debug)]
pub struct FileState {
    kind: StateKind,
    slot: Mutex<FdSlot>,
}

impl FileState {
    fn new(kind: StateKind) -> FileState {
        FileState {
            kind,
            slot: Mutex::new(FdSlot {
                openflags: OpenFlags::CLOSED,
                fd: CLOSED_FD,
            }),
        }
    }

    /// A fresh share (OPEN) state.
    pub fn new_share() -> FileState {
        FileState::new(StateKind::Share)
    }

    /// A lock state bound to its open state.
    pub fn new_lock(open: Arc<FileState>) -> FileState {
        FileState::new(StateKind::Lock { open })
    }

    /// A delegation state.
    pub fn new_deleg() -> FileState {
        FileState::new(StateKind::Deleg)
    }

    /// Current open mode of the state (`CLOSED` when not open).
    pub fn openflags(&self) -> OpenFlags {
        self.slot.lock().openflags
    }

    pub(crate) fn is_closed(&self) -> bool {
        let slot = self.slot.lock();
        slot.openflags.is_closed() && slot.fd.ino == Ino::INVALID
    }

    pub(crate) fn is_open(&self) -> bool {
        let slot = self.slot.lock();
        !slot.openflags.is_closed() && slot.fd.ino != Ino::INVALID
    }
}

/// Per-inode share reservation counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Share {
    n_read: u32,
    n_write: u32,
    n_deny_read: u32,
    n_deny_write: u32,
}

impl Share {
    /// Checks whether a new open with `flags` collides with the
    /// reservations already in place.
    fn check_conflict(&self, flags: OpenFlags) -> Result<(), Errno> {
        let denied = (flags.contains(OpenFlags::READ) && self.n_deny_read > 0)
            || (flags.contains(OpenFlags::WRITE) && self.n_deny_write > 0)
            || (flags.contains(OpenFlags::DENY_READ) && self.n_read > 0)
            || (flags.contains(OpenFlags::DENY_WRITE) && self.n_write > 0);
        if denied { Err(Errno::EACCES) } else { Ok(()) }
    }

    /// Moves the counters from an `old` open mode to a `new` one.
    fn update(&mut self, old: OpenFlags, new: OpenFlags) {
        fn shift(counter: &mut u32, old: bool, new: bool) {
            if old && !new {
                *counter -= 1;
            } else if new && !old {
                *counter += 1;
            }
        }
        shift(
            &mut self.n_read,
            old.contains(OpenFlags::READ),
            new.contains(OpenFlags::READ),
        );
        shift(
            &mut self.n_write,
            old.contains(OpenFlags::WRITE),
            new.contains(OpenFlags::WRITE),
        );
        shift(
            &mut self.n_deny_read,
            old.contains(OpenFlags::DENY_READ),
            new.contains(OpenFlags::DENY_READ),
        );
        shift(
            &mut self.n_deny_write,
            old.contains(OpenFlags::DENY_WRITE),
            new.contains(OpenFlags::DENY_WRITE),
        );
    }

    fn is_idle(&self) -> bool {
        *self == Share::default()
    }
}

/// The in-memory per-inode open record: share counters plus the lock that
/// serializes I/O against stat updates.
#[derive(Debug, Default)]
pub(crate) struct OpenFile {
    share: Mutex<Share>,
    /// Writes hold this exclusively so the stat stays consistent with the
    /// data; reads share it.
    pub(crate) io_lock: RwLock<()>,
}

impl OpenFile {
    pub(crate) fn new() -> OpenFile {
        OpenFile::default()
    }

    pub(crate) fn is_idle(&self) -> bool {
        self.share.lock().is_idle()
    }
}

/// How `open2` should treat a missing or existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    /// Open an existing file, never create.
    NoCreate,
    /// Create if missing, open if present.
    Unchecked,
    /// Like `Unchecked`; the front-end has already verified absence.
    Guarded,
    /// NFSv4.0 exclusive create: the 8-byte verifier is stored in the
    /// atime/mtime of the created file so a retransmit can be recognised.
    Exclusive([u8; 8]),
    /// NFSv4.1 exclusive create. Not supported.
    Exclusive41,
    /// 9P exclusive create. Not supported.
    Exclusive9p,
}

/// Delegation transitions driven by the front-end's lease operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeaseOp {
    /// Release the delegation.
    None,
    /// Grant a read delegation.
    Read,
    /// Grant a write delegation.
    Write,
}

impl Filesystem {
    fn share_try_new_state(
        &self,
        open_file: &OpenFile,
        old: OpenFlags,
        new: OpenFlags,
    ) -> Result<(), Errno> {
        let mut share = open_file.share.lock();
        share.check_conflict(new)?;
        share.update(old, new);
        Ok(())
    }

    fn share_set_new_state(&self, open_file: &OpenFile, old: OpenFlags, new: OpenFlags) {
        open_file.share.lock().update(old, new);
    }

    /// Hook for a future persistent open table in the index. The store
    /// does not track opens today.
    fn backend_open(
        &self,
        _state: &FileState,
        _flags: OpenFlags,
        _ino: Ino,
    ) -> Result<(), Errno> {
        Ok(())
    }

    /// Counterpart of [`backend_open`](Filesystem::backend_open).
    fn backend_close(&self, _state: &FileState) -> Result<(), Errno> {
        Ok(())
    }

    /// Opens (or, with `is_reopen`, re-opens) a file state against `ino`,
    /// reserving the requested share mode.
    pub(crate) fn file_state_open(
        &self,
        state: &FileState,
        flags: OpenFlags,
        ino: Ino,
        is_reopen: bool,
    ) -> Result<(), Errno> {
        if !is_reopen && !state.is_closed() {
            return Err(Errno::EINVAL);
        }

        let open_file = self.open_file(ino);
        let old = state.openflags();

        self.share_try_new_state(&open_file, old, flags)?;

        if let Err(err) = self.backend_open(state, flags, ino) {
            // Roll the counters back to where they were.
            self.share_set_new_state(&open_file, flags, old);
            self.release_open_file(ino);
            return Err(err);
        }

        let mut slot = state.slot.lock();
        slot.openflags = flags;
        slot.fd = OpenFd {
            ino,
            owner: OpenOwner::this_thread(),
            flags,
        };
        drop(slot);

        debug_assert!(state.is_open());
        debug!("opened state on {ino} with flags {flags}");
        Ok(())
    }

    /// Closes an open file state and releases its share reservation.
    pub(crate) fn file_state_close(&self, state: &FileState) -> Result<(), Errno> {
        if !state.is_open() {
            return Err(Errno::EBADF);
        }
        let (ino, old) = {
            let slot = state.slot.lock();
            (slot.fd.ino, slot.openflags)
        };

        self.backend_close(state)?;

        let open_file = self.open_file(ino);
        self.share_set_new_state(&open_file, old, OpenFlags::CLOSED);

        {
            let mut slot = state.slot.lock();
            slot.openflags = OpenFlags::CLOSED;
            slot.fd = CLOSED_FD;
        }
        self.release_open_file(ino);

        debug_assert!(state.is_closed());
        debug!("closed state on {ino}");
        Ok(())
    }

    /// Resolves a state to an open descriptor able to serve `want`.
    ///
    /// Lock states borrow the descriptor of the open state they belong
    /// to. Bypass mode (special stateids) is not supported.
    pub(crate) fn find_fd(
        &self,
        state: &FileState,
        bypass: bool,
        want: OpenFlags,
    ) -> Result<OpenFd, Errno> {
        if bypass {
            return Err(Errno::ENOTSUP);
        }
        let target = match &state.kind {
            StateKind::Lock { open } => open.as_ref(),
            StateKind::Share | StateKind::Deleg => state,
        };
        let slot = target.slot.lock();
        if slot.openflags.satisfies(want) {
            Ok(slot.fd)
        } else {
            warn!(
                "state open for {} cannot serve {want}",
                slot.openflags
            );
            Err(Errno::EBADF)
        }
    }

    /// Opens a file, optionally creating it first, per the NFSv4 OPEN
    /// create-mode table.
    ///
    /// With `name`, `current` is the parent directory and the opened (or
    /// created) object's handle is returned; without, `current` is the
    /// object itself and `None` is returned.
    #[allow(clippy::too_many_arguments)]
    pub fn open2(
        &self,
        cred: &Cred,
        current: &FileHandle,
        name: Option<&[u8]>,
        state: &FileState,
        flags: OpenFlags,
        mode: CreateMode,
        attrs_in: Option<(&Stat, SetStatFlags)>,
    ) -> Result<Option<FileHandle>, Errno> {
        match (mode, name) {
            (CreateMode::NoCreate, None) => {
                self.file_state_open(state, flags, current.ino(), false)?;
                Ok(None)
            }
            (CreateMode::NoCreate, Some(name)) => {
                let object = current.lookup(self, cred, name)?;
                self.file_state_open(state, flags, object.ino(), false)?;
                Ok(Some(object))
            }
            (CreateMode::Unchecked | CreateMode::Guarded, Some(name)) => self
                .create_and_open(cred, current, name, state, flags, attrs_in)
                .map(Some),
            (CreateMode::Unchecked | CreateMode::Guarded, None) => {
                self.file_state_open(state, flags, current.ino(), false)?;
                if flags.contains(OpenFlags::TRUNC) {
                    let mut zeroed = *current.stat();
                    zeroed.size = 0;
                    if let Err(err) = self.ftruncate(state, &zeroed, SetStatFlags::SIZE_SET) {
                        let _ = self.file_state_close(state);
                        return Err(err);
                    }
                }
                Ok(None)
            }
            (CreateMode::Exclusive(verifier), Some(name)) => {
                // An exclusive create path never truncates.
                if flags.contains(OpenFlags::TRUNC) {
                    return Err(Errno::EINVAL);
                }
                let (base_stat, base_flags) = attrs_in.ok_or(Errno::EINVAL)?;
                let mut stat_in = *base_stat;
                stat_in.atime = verifier_time(&verifier[0..4]);
                stat_in.mtime = verifier_time(&verifier[4..8]);
                let flags_in = base_flags | SetStatFlags::ATIME_SET | SetStatFlags::MTIME_SET;
                self.create_and_open(cred, current, name, state, flags, Some((&stat_in, flags_in)))
                    .map(Some)
            }
            (CreateMode::Exclusive(_), None) => {
                // The front-end recognised a retransmit by the verifier;
                // the file exists and just needs opening.
                if flags.contains(OpenFlags::TRUNC) {
                    return Err(Errno::EINVAL);
                }
                self.file_state_open(state, flags, current.ino(), false)?;
                Ok(None)
            }
            (CreateMode::Exclusive41 | CreateMode::Exclusive9p, _) => Err(Errno::ENOTSUP),
        }
    }

    fn create_and_open(
        &self,
        cred: &Cred,
        parent: &FileHandle,
        name: &[u8],
        state: &FileState,
        flags: OpenFlags,
        attrs_in: Option<(&Stat, SetStatFlags)>,
    ) -> Result<FileHandle, Errno> {
        let (stat_in, flags_in) = attrs_in.ok_or(Errno::EINVAL)?;
        let (ino, stat_out) =
            self.creat_ex(cred, parent.ino(), name, { stat_in.mode }, stat_in, flags_in)?;
        let object = FileHandle::from_ino(self, ino, Some(&stat_out))?;
        self.file_state_open(state, flags, object.ino(), false)?;
        Ok(object)
    }

    /// Re-opens an open state with a new share mode.
    pub fn reopen2(
        &self,
        current: &FileHandle,
        state: &FileState,
        flags: OpenFlags,
    ) -> Result<(), Errno> {
        self.file_state_open(state, flags, current.ino(), true)
    }

    /// Reports the open mode of a state.
    pub fn status2(&self, state: &FileState) -> OpenFlags {
        state.openflags()
    }

    /// Closes a state. Only share states carry an open file and run the
    /// delete-on-close check; lock and delegation states have nothing of
    /// their own to close here.
    pub fn close2(&self, current: &FileHandle, state: &FileState) -> Result<(), Errno> {
        match &state.kind {
            StateKind::Lock { .. } => {
                // The associated open state is closed separately.
                debug_assert!(state.is_closed());
                Ok(())
            }
            StateKind::Deleg => {
                debug!("closing delegation state on {}", current.ino());
                Ok(())
            }
            StateKind::Share => {
                self.file_state_close(state)?;
                self.delete_on_close(current.ino())
            }
        }
    }

    /// Grants or releases a delegation by opening or closing its state.
    pub fn lease_op2(
        &self,
        current: &FileHandle,
        state: &FileState,
        op: LeaseOp,
    ) -> Result<(), Errno> {
        if !matches!(state.kind, StateKind::Deleg) {
            return Err(Errno::EINVAL);
        }
        match op {
            LeaseOp::None => {
                debug!("releasing delegation on {}", current.ino());
                self.file_state_close(state)
            }
            LeaseOp::Read => self.file_state_open(state, OpenFlags::READ, current.ino(), false),
            LeaseOp::Write => self.file_state_open(state, OpenFlags::WRITE, current.ino(), false),
        }
    }

    /// Destroys a regular file whose last link went away while it was
    /// open. A no-op while links remain or for non-regular objects.
    fn delete_on_close(&self, ino: Ino) -> Result<(), Errno> {
        let stat = self.get_stat(ino)?;
        if !stat.is_reg() {
            return Ok(());
        }
        self.destroy_orphaned_file(ino)
    }
}

fn verifier_time(half: &[u8]) -> TimeSpec {
    let raw: [u8; 4] = half.try_into().unwrap_or_default();
    TimeSpec {
        secs: u32::from_le_bytes(raw) as i64,
        nsecs: 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn share_counters_move_between_states() {
        let mut share = Share::default();
        share.update(OpenFlags::CLOSED, OpenFlags::RDWR);
        share.update(OpenFlags::CLOSED, OpenFlags::READ);
        assert_eq!(share.n_read, 2);
        assert_eq!(share.n_write, 1);

        share.update(OpenFlags::RDWR, OpenFlags::READ);
        assert_eq!(share.n_read, 2);
        assert_eq!(share.n_write, 0);

        share.update(OpenFlags::READ, OpenFlags::CLOSED);
        share.update(OpenFlags::READ, OpenFlags::CLOSED);
        assert!(share.is_idle());
    }

    #[test]
    fn deny_write_conflicts_with_writers() {
        let mut share = Share::default();
        share.update(OpenFlags::CLOSED, OpenFlags::WRITE);
        assert_eq!(
            share.check_conflict(OpenFlags::READ | OpenFlags::DENY_WRITE),
            Err(Errno::EACCES)
        );
        assert!(share.check_conflict(OpenFlags::RDWR).is_ok());

        let mut share = Share::default();
        share.update(OpenFlags::CLOSED, OpenFlags::READ | OpenFlags::DENY_WRITE);
        assert_eq!(share.check_conflict(OpenFlags::WRITE), Err(Errno::EACCES));
        assert!(share.check_conflict(OpenFlags::READ).is_ok());
    }

    #[test]
    fn owner_identity_is_stable_within_a_thread() {
        let first = OpenOwner::this_thread();
        let second = OpenOwner::this_thread();
        assert_eq!(first, second);

        let other = std::thread::spawn(OpenOwner::this_thread).join().unwrap();
        assert_eq!(other.pid, first.pid);
        assert_ne!(other.tid, first.tid);
    }

    #[test]
    fn fresh_state_is_closed() {
        let state = FileState::new_share();
        assert!(state.is_closed());
        assert!(!state.is_open());
        assert_eq!(state.openflags(), OpenFlags::CLOSED);
    }
}

//! Stateful opens: share reservations, create modes, delegations,
//! delete-on-close and the I/O path.

mod common;

use std::sync::Arc;

use kvfs::CreateMode;
use kvfs::Cred;
use kvfs::Errno;
use kvfs::FileHandle;
use kvfs::FileState;
use kvfs::Ino;
use kvfs::LeaseOp;
use kvfs::OpenFlags;
use kvfs::SetStatFlags;

const ROOT: Ino = Ino::ROOT;

fn root_handle(fs: &kvfs::Filesystem) -> FileHandle {
    FileHandle::getroot(fs, &Cred::ROOT).unwrap()
}

#[test]
fn open_write_read_close() {
    let t = common::mount();
    let cred = Cred::ROOT;

    let ino = t.fs.creat(&cred, ROOT, b"f", 0o644).unwrap();
    let handle = FileHandle::from_ino(&t.fs, ino, None).unwrap();

    let state = FileState::new_share();
    t.fs.open2(
        &cred,
        &handle,
        None,
        &state,
        OpenFlags::RDWR,
        CreateMode::Unchecked,
        None,
    )
    .unwrap();
    assert_eq!(t.fs.status2(&state), OpenFlags::RDWR);

    let payload = vec![b'a'; 4096];
    assert_eq!(t.fs.write2(&state, 0, &payload, false).unwrap(), 4096);

    let mut buf = vec![0u8; 4096];
    let (count, eof) = t.fs.read2(&state, 0, &mut buf).unwrap();
    assert_eq!(count, 4096);
    assert!(eof);
    assert_eq!(buf, payload);

    let stat = t.fs.getattr(&cred, ino).unwrap();
    assert_eq!({ stat.size }, 4096);
    assert_eq!({ stat.blocks }, 8);

    t.fs.close2(&handle, &state).unwrap();
    assert_eq!(t.fs.status2(&state), OpenFlags::CLOSED);
    // The share is gone: an exclusive-deny open succeeds now.
    let deny = FileState::new_share();
    t.fs.open2(
        &cred,
        &handle,
        None,
        &deny,
        OpenFlags::READ | OpenFlags::DENY_READ | OpenFlags::DENY_WRITE,
        CreateMode::NoCreate,
        None,
    )
    .unwrap();
    t.fs.close2(&handle, &deny).unwrap();
}

#[test]
fn read_past_eof_after_truncate() {
    let t = common::mount();
    let cred = Cred::ROOT;

    let ino = t.fs.creat(&cred, ROOT, b"f", 0o644).unwrap();
    let handle = FileHandle::from_ino(&t.fs, ino, None).unwrap();
    let state = FileState::new_share();
    t.fs.open2(
        &cred,
        &handle,
        None,
        &state,
        OpenFlags::RDWR,
        CreateMode::NoCreate,
        None,
    )
    .unwrap();

    t.fs.write2(&state, 0, &[b'x'; 512], false).unwrap();

    let mut zeroed = *handle.stat();
    zeroed.size = 0;
    t.fs.ftruncate(&state, &zeroed, SetStatFlags::SIZE_SET)
        .unwrap();

    let mut buf = vec![0u8; 4096];
    let (count, eof) = t.fs.read2(&state, 0, &mut buf).unwrap();
    assert_eq!(count, 0);
    assert!(eof);

    t.fs.close2(&handle, &state).unwrap();
}

#[test]
fn open_by_name_creates_with_unchecked() {
    let t = common::mount();
    let cred = Cred::ROOT;
    let root = root_handle(&t.fs);

    let state = FileState::new_share();
    let (stat_in, flags_in) = common::attrs_with_mode(0o644);
    let created = t
        .fs
        .open2(
            &cred,
            &root,
            Some(b"newfile"),
            &state,
            OpenFlags::RDWR,
            CreateMode::Unchecked,
            Some((&stat_in, flags_in)),
        )
        .unwrap()
        .expect("create-by-name returns the new handle");

    assert!(created.stat().is_reg());
    assert_eq!(t.fs.lookup(&cred, ROOT, b"newfile").unwrap(), created.ino());

    t.fs.write2(&state, 0, b"data", false).unwrap();
    t.fs.close2(&created, &state).unwrap();
}

#[test]
fn open_trunc_clears_existing_data() {
    let t = common::mount();
    let cred = Cred::ROOT;

    let ino = t.fs.creat(&cred, ROOT, b"f", 0o644).unwrap();
    let handle = FileHandle::from_ino(&t.fs, ino, None).unwrap();

    let writer = FileState::new_share();
    t.fs.open2(
        &cred,
        &handle,
        None,
        &writer,
        OpenFlags::RDWR,
        CreateMode::NoCreate,
        None,
    )
    .unwrap();
    t.fs.write2(&writer, 0, b"old contents", false).unwrap();
    t.fs.close2(&handle, &writer).unwrap();

    let state = FileState::new_share();
    t.fs.open2(
        &cred,
        &handle,
        None,
        &state,
        OpenFlags::RDWR | OpenFlags::TRUNC,
        CreateMode::Unchecked,
        None,
    )
    .unwrap();

    assert_eq!({ t.fs.getattr(&cred, ino).unwrap().size }, 0);
    t.fs.close2(&handle, &state).unwrap();
}

#[test]
fn share_reservation_conflicts() {
    let t = common::mount();
    let cred = Cred::ROOT;

    let ino = t.fs.creat(&cred, ROOT, b"f", 0o644).unwrap();
    let handle = FileHandle::from_ino(&t.fs, ino, None).unwrap();

    let writer = FileState::new_share();
    t.fs.open2(
        &cred,
        &handle,
        None,
        &writer,
        OpenFlags::WRITE,
        CreateMode::NoCreate,
        None,
    )
    .unwrap();

    // Denying writers while one is active conflicts...
    let denier = FileState::new_share();
    assert_eq!(
        t.fs.open2(
            &cred,
            &handle,
            None,
            &denier,
            OpenFlags::READ | OpenFlags::DENY_WRITE,
            CreateMode::NoCreate,
            None,
        ),
        Err(Errno::EACCES)
    );
    // ...and the failed attempt left no residue: a plain read open works
    // and so does a second writer.
    let reader = FileState::new_share();
    t.fs.open2(
        &cred,
        &handle,
        None,
        &reader,
        OpenFlags::READ,
        CreateMode::NoCreate,
        None,
    )
    .unwrap();
    t.fs.close2(&handle, &reader).unwrap();
    t.fs.close2(&handle, &writer).unwrap();

    // With every state closed the deny-write open goes through.
    t.fs.open2(
        &cred,
        &handle,
        None,
        &denier,
        OpenFlags::READ | OpenFlags::DENY_WRITE,
        CreateMode::NoCreate,
        None,
    )
    .unwrap();
    t.fs.close2(&handle, &denier).unwrap();
}

#[test]
fn two_readers_one_close_keeps_the_file_open() {
    let t = common::mount();
    let cred = Cred::ROOT;

    let ino = t.fs.creat(&cred, ROOT, b"f", 0o644).unwrap();
    let handle = FileHandle::from_ino(&t.fs, ino, None).unwrap();

    let first = FileState::new_share();
    let second = FileState::new_share();
    for state in [&first, &second] {
        t.fs.open2(
            &cred,
            &handle,
            None,
            state,
            OpenFlags::READ,
            CreateMode::NoCreate,
            None,
        )
        .unwrap();
    }

    t.fs.close2(&handle, &first).unwrap();

    let mut buf = [0u8; 8];
    // The second state still serves I/O.
    assert!(t.fs.read2(&second, 0, &mut buf).is_ok());
    t.fs.close2(&handle, &second).unwrap();
}

#[test]
fn unlinked_file_survives_until_last_close() {
    let t = common::mount();
    let cred = Cred::ROOT;

    let ino = t.fs.creat(&cred, ROOT, b"f", 0o644).unwrap();
    let handle = FileHandle::from_ino(&t.fs, ino, None).unwrap();
    let state = FileState::new_share();
    t.fs.open2(
        &cred,
        &handle,
        None,
        &state,
        OpenFlags::RDWR,
        CreateMode::NoCreate,
        None,
    )
    .unwrap();

    t.fs.write2(&state, 0, b"payload", false).unwrap();
    t.fs.unlink(&cred, ROOT, Some(ino), b"f").unwrap();

    // Unlinked but open: attributes and data remain reachable.
    assert_eq!(t.fs.lookup(&cred, ROOT, b"f"), Err(Errno::ENOENT));
    assert_eq!({ t.fs.getattr(&cred, ino).unwrap().nlink }, 0);
    let mut buf = [0u8; 16];
    let (count, _) = t.fs.read2(&state, 0, &mut buf).unwrap();
    assert_eq!(&buf[..count], b"payload");

    t.fs.close2(&handle, &state).unwrap();

    // The last close destroyed the object and its data.
    assert_eq!(t.fs.getattr(&cred, ino), Err(Errno::ENOENT));
    assert!(t.ext.is_empty());
}

#[test]
fn close_of_unopened_state_fails() {
    let t = common::mount();
    let cred = Cred::ROOT;
    let ino = t.fs.creat(&cred, ROOT, b"f", 0o644).unwrap();
    let handle = FileHandle::from_ino(&t.fs, ino, None).unwrap();

    let state = FileState::new_share();
    assert_eq!(t.fs.close2(&handle, &state), Err(Errno::EBADF));

    t.fs.open2(
        &cred,
        &handle,
        None,
        &state,
        OpenFlags::READ,
        CreateMode::NoCreate,
        None,
    )
    .unwrap();
    t.fs.close2(&handle, &state).unwrap();
    assert_eq!(t.fs.close2(&handle, &state), Err(Errno::EBADF));
}

#[test]
fn write_through_read_only_state_fails() {
    let t = common::mount();
    let cred = Cred::ROOT;
    let ino = t.fs.creat(&cred, ROOT, b"f", 0o644).unwrap();
    let handle = FileHandle::from_ino(&t.fs, ino, None).unwrap();

    let state = FileState::new_share();
    t.fs.open2(
        &cred,
        &handle,
        None,
        &state,
        OpenFlags::READ,
        CreateMode::NoCreate,
        None,
    )
    .unwrap();

    assert_eq!(t.fs.write2(&state, 0, b"x", false), Err(Errno::EBADF));

    t.fs.reopen2(&handle, &state, OpenFlags::RDWR).unwrap();
    assert_eq!(t.fs.write2(&state, 0, b"x", false).unwrap(), 1);

    t.fs.close2(&handle, &state).unwrap();
}

#[test]
fn lock_state_borrows_the_open_descriptor() {
    let t = common::mount();
    let cred = Cred::ROOT;
    let ino = t.fs.creat(&cred, ROOT, b"f", 0o644).unwrap();
    let handle = FileHandle::from_ino(&t.fs, ino, None).unwrap();

    let open = Arc::new(FileState::new_share());
    t.fs.open2(
        &cred,
        &handle,
        None,
        &open,
        OpenFlags::RDWR,
        CreateMode::NoCreate,
        None,
    )
    .unwrap();

    let lock = FileState::new_lock(open.clone());
    assert_eq!(t.fs.write2(&lock, 0, b"via lock", false).unwrap(), 8);

    // Closing the lock state is a no-op; the open state stays open.
    t.fs.close2(&handle, &lock).unwrap();
    let mut buf = [0u8; 8];
    assert!(t.fs.read2(&open, 0, &mut buf).is_ok());

    t.fs.close2(&handle, &open).unwrap();
}

#[test]
fn delegations_open_and_close_without_delete_on_close() {
    let t = common::mount();
    let cred = Cred::ROOT;
    let ino = t.fs.creat(&cred, ROOT, b"f", 0o644).unwrap();
    let handle = FileHandle::from_ino(&t.fs, ino, None).unwrap();

    let deleg = FileState::new_deleg();
    t.fs.lease_op2(&handle, &deleg, LeaseOp::Read).unwrap();

    let mut buf = [0u8; 4];
    assert!(t.fs.read2(&deleg, 0, &mut buf).is_ok());
    assert_eq!(t.fs.write2(&deleg, 0, b"x", false), Err(Errno::EBADF));

    t.fs.lease_op2(&handle, &deleg, LeaseOp::None).unwrap();

    let write_deleg = FileState::new_deleg();
    t.fs.lease_op2(&handle, &write_deleg, LeaseOp::Write).unwrap();
    assert_eq!(t.fs.write2(&write_deleg, 0, b"w", false).unwrap(), 1);
    t.fs.lease_op2(&handle, &write_deleg, LeaseOp::None).unwrap();
}

#[test]
fn exclusive_create_stores_the_verifier() {
    let t = common::mount();
    let cred = Cred::ROOT;
    let root = root_handle(&t.fs);

    let verifier = *b"verify!!";
    let state = FileState::new_share();
    let (stat_in, flags_in) = common::attrs_with_mode(0o644);
    let created = t
        .fs
        .open2(
            &cred,
            &root,
            Some(b"excl"),
            &state,
            OpenFlags::RDWR,
            CreateMode::Exclusive(verifier),
            Some((&stat_in, flags_in)),
        )
        .unwrap()
        .unwrap();

    let stat = t.fs.getattr(&cred, created.ino()).unwrap();
    let atime_secs = { stat.atime }.secs;
    let mtime_secs = { stat.mtime }.secs;
    assert_eq!(
        atime_secs,
        u32::from_le_bytes(verifier[0..4].try_into().unwrap()) as i64
    );
    assert_eq!(
        mtime_secs,
        u32::from_le_bytes(verifier[4..8].try_into().unwrap()) as i64
    );

    t.fs.close2(&created, &state).unwrap();
}

#[test]
fn exclusive_create_rejects_truncation() {
    let t = common::mount();
    let cred = Cred::ROOT;
    let root = root_handle(&t.fs);

    let state = FileState::new_share();
    let (stat_in, flags_in) = common::attrs_with_mode(0o644);
    assert_eq!(
        t.fs.open2(
            &cred,
            &root,
            Some(b"excl"),
            &state,
            OpenFlags::RDWR | OpenFlags::TRUNC,
            CreateMode::Exclusive([0; 8]),
            Some((&stat_in, flags_in)),
        ),
        Err(Errno::EINVAL)
    );
}

#[test]
fn newer_exclusive_modes_are_unsupported() {
    let t = common::mount();
    let cred = Cred::ROOT;
    let root = root_handle(&t.fs);
    let state = FileState::new_share();

    for mode in [CreateMode::Exclusive41, CreateMode::Exclusive9p] {
        assert_eq!(
            t.fs.open2(
                &cred,
                &root,
                Some(b"x"),
                &state,
                OpenFlags::RDWR,
                mode,
                None,
            ),
            Err(Errno::ENOTSUP)
        );
    }
}

#[test]
fn open_by_name_without_create_requires_existence() {
    let t = common::mount();
    let cred = Cred::ROOT;
    let root = root_handle(&t.fs);
    let state = FileState::new_share();

    assert_eq!(
        t.fs.open2(
            &cred,
            &root,
            Some(b"missing"),
            &state,
            OpenFlags::READ,
            CreateMode::NoCreate,
            None,
        ),
        Err(Errno::ENOENT)
    );

    let ino = t.fs.creat(&cred, ROOT, b"present", 0o644).unwrap();
    let opened = t
        .fs
        .open2(
            &cred,
            &root,
            Some(b"present"),
            &state,
            OpenFlags::READ,
            CreateMode::NoCreate,
            None,
        )
        .unwrap()
        .unwrap();
    assert_eq!(opened.ino(), ino);
    t.fs.close2(&opened, &state).unwrap();
}

#[test]
fn handle_round_trips_over_the_wire() {
    let t = common::mount();
    let cred = Cred::ROOT;

    let ino = t.fs.creat(&cred, ROOT, b"f", 0o644).unwrap();
    let handle = FileHandle::from_ino(&t.fs, ino, None).unwrap();

    let mut wire = vec![0u8; FileHandle::serialized_size()];
    handle.serialize(&mut wire).unwrap();

    let restored = FileHandle::deserialize(&t.fs, &wire).unwrap();
    assert_eq!(restored.ino(), ino);
    assert_eq!(restored.key(), handle.key());

    // A restored handle is good enough to open and do I/O with.
    let state = FileState::new_share();
    t.fs.open2(
        &cred,
        &restored,
        None,
        &state,
        OpenFlags::RDWR,
        CreateMode::NoCreate,
        None,
    )
    .unwrap();
    t.fs.write2(&state, 0, b"hi", false).unwrap();
    t.fs.close2(&restored, &state).unwrap();
}

#[test]
fn commit_is_a_no_op() {
    let t = common::mount();
    let ino = t.fs.creat(&Cred::ROOT, ROOT, b"f", 0o644).unwrap();
    assert!(t.fs.commit2(ino, 0, 4096).is_ok());
}

#[test]
fn stable_write_hits_fsync() {
    let t = common::mount();
    let cred = Cred::ROOT;
    let ino = t.fs.creat(&cred, ROOT, b"f", 0o644).unwrap();
    let handle = FileHandle::from_ino(&t.fs, ino, None).unwrap();
    let state = FileState::new_share();
    t.fs.open2(
        &cred,
        &handle,
        None,
        &state,
        OpenFlags::WRITE,
        CreateMode::NoCreate,
        None,
    )
    .unwrap();

    assert_eq!(t.fs.write2(&state, 0, b"durable", true).unwrap(), 7);
    t.fs.close2(&handle, &state).unwrap();
}

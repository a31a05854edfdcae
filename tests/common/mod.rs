use std::sync::Arc;

use kvfs::Cred;
use kvfs::Fid;
use kvfs::Filesystem;
use kvfs::MemExtStore;
use kvfs::MemKvs;
use kvfs::SetStatFlags;
use kvfs::Stat;

#[allow(dead_code)]
pub const FSID: u64 = 1;

pub struct TestFs {
    pub fs: Filesystem,
    pub ext: Arc<MemExtStore>,
}

/// A fresh single-index filesystem over in-memory backends, with the
/// extent store kept reachable for assertions.
pub fn mount() -> TestFs {
    let _ = env_logger::builder().is_test(true).try_init();

    let kvs = MemKvs::new();
    let ext = Arc::new(MemExtStore::new());
    let fs = Filesystem::create(
        &kvs,
        Box::new(ext.clone()),
        &Fid::new(0, FSID),
        FSID,
        &Cred::ROOT,
        0o755,
    )
    .unwrap();
    TestFs { fs, ext }
}

/// Initial attributes for create-style opens: just a mode.
#[allow(dead_code)]
pub fn attrs_with_mode(mode: u32) -> (Stat, SetStatFlags) {
    let stat = Stat {
        mode,
        ..Stat::default()
    };
    (stat, SetStatFlags::empty())
}

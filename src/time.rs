//! Wall-clock timestamps as stored in the stat record.

use std::time::SystemTime;
use std::time::UNIX_EPOCH;

use zerocopy::FromBytes;
use zerocopy::Immutable;
use zerocopy::IntoBytes;
use zerocopy::KnownLayout;
use zerocopy::Unaligned;

/// A second/nanosecond timestamp with the epoch at 0.
///
/// Stored packed inside the stat blob, so the layout must stay stable.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    FromBytes,
    IntoBytes,
    KnownLayout,
    Immutable,
    Unaligned,
)]
#[repr(C, packed)]
pub struct TimeSpec {
    /// Seconds since the Unix epoch; negative values are before the epoch.
    pub secs: i64,
    /// Nanosecond part, in `[0, 1_000_000_000)`.
    pub nsecs: u32,
}

impl TimeSpec {
    /// The zero timestamp (the Unix epoch).
    pub const ZERO: TimeSpec = TimeSpec { secs: 0, nsecs: 0 };

    /// The current wall-clock time.
    pub fn now() -> TimeSpec {
        TimeSpec::from(SystemTime::now())
    }
}

impl From<SystemTime> for TimeSpec {
    fn from(time: SystemTime) -> TimeSpec {
        match time.duration_since(UNIX_EPOCH) {
            Ok(duration) => TimeSpec {
                secs: duration.as_secs() as i64,
                nsecs: duration.subsec_nanos(),
            },
            Err(before_epoch) => TimeSpec {
                secs: -(before_epoch.duration().as_secs() as i64),
                nsecs: before_epoch.duration().subsec_nanos(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_after_epoch() {
        let now = TimeSpec::now();
        assert!(now.secs > 0);
        assert!(now.nsecs < 1_000_000_000);
    }

    #[test]
    fn layout_is_packed() {
        assert_eq!(std::mem::size_of::<TimeSpec>(), 12);
    }
}

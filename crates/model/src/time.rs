use serde::{Deserialize, Serialize};

pub const SECONDS_PER_DAY: u64 = 86_400;

/// A unix timestamp in seconds.
///
/// The engines reason in whole elapsed days with truncation: 47 hours
/// after a checkpoint is one elapsed day, and the leftover 23 hours stay
/// attributed to the checkpoint until a full day has passed.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default,
)]
#[serde(transparent)]
pub struct Timestamp(pub u64);

impl Timestamp {
    pub fn as_secs(&self) -> u64 {
        self.0
    }

    /// Whole days elapsed since `earlier`, truncating; zero when
    /// `earlier` is in the future.
    pub fn days_since(&self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0) / SECONDS_PER_DAY
    }

    pub fn plus_days(&self, days: u64) -> Timestamp {
        Timestamp(self.0 + days * SECONDS_PER_DAY)
    }

    pub fn plus_secs(&self, secs: u64) -> Timestamp {
        Timestamp(self.0 + secs)
    }
}

//! Domain types shared by the auction and reward-accrual engines.

pub mod ids;
pub mod time;

pub use {
    ids::{BidId, ClusterId},
    time::{SECONDS_PER_DAY, Timestamp},
};

use serde::{Deserialize, Serialize};

/// Amounts are wei-denominated [`alloy_primitives::U256`] values
/// throughout.
pub type Wei = alloy_primitives::U256;

/// A cluster-size class. The class *is* the number of seats K; every
/// sub-auction ranks bids competing for a cluster of exactly this size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SizeClass(u64);

impl SizeClass {
    pub fn new(size: u64) -> Option<Self> {
        (size > 0).then_some(Self(size))
    }

    /// Number of seats in a cluster of this class.
    pub fn seats(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for SizeClass {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "k{}", self.0)
    }
}

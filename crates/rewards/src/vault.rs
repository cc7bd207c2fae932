use {
    alloy_primitives::Address,
    model::{ClusterId, Timestamp},
    serde::{Deserialize, Serialize},
};

/// What the vault is still allowed to claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ClaimPermission {
    /// Cluster is live; claims accrue day by day.
    Open,
    /// Cluster retired or exited; exactly the unclaimed remainder may
    /// still be collected.
    LastClaimOnly,
    /// Terminal: every payable day has been claimed.
    Exhausted,
}

/// Per-vault accrual record, created when its cluster activates.
///
/// The weakest member bounds the vault: `smallest_remaining` is the
/// smallest credit count any member brought, and no vault may claim
/// more days than that.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VaultAccrual {
    pub vault: Address,
    pub cluster: ClusterId,
    /// Claimable-day ceiling set by the weakest member, possibly
    /// lowered by an early exit.
    pub smallest_remaining: u64,
    pub days_claimed: u64,
    pub activated_at: Timestamp,
    pub last_update: Timestamp,
    pub exit_deadline: Timestamp,
    /// Total member credits issued with the cluster, for retirement
    /// accounting.
    pub credits_issued: u64,
    pub permission: ClaimPermission,
}

impl VaultAccrual {
    /// Days payable right now: elapsed days capped by the remaining
    /// allowance.
    pub fn claimable_days(&self, now: Timestamp) -> u64 {
        now.days_since(self.last_update)
            .min(self.smallest_remaining.saturating_sub(self.days_claimed))
    }

    /// Credits the cluster has not consumed. The cluster burns for at
    /// most `smallest_remaining` days, so members that brought more
    /// than the weakest leave this excess behind when it retires.
    pub fn remaining_credits(&self, now: Timestamp, burn_per_cluster_day: u64) -> u64 {
        let burn_days = now
            .days_since(self.activated_at)
            .min(self.smallest_remaining);
        self.credits_issued
            .saturating_sub(burn_per_cluster_day.saturating_mul(burn_days))
    }
}

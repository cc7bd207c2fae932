use {
    alloy_primitives::U256,
    model::{Timestamp, Wei},
    serde::{Deserialize, Serialize},
};

/// The global accrual snapshot.
///
/// `total_accrued_unclaimed` is the reserve already promised to active
/// clusters; whatever the pool holds beyond it is allocatable and backs
/// the daily rate. The reserve grows during aging and shrinks on
/// payouts, and can never exceed the pool balance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub updated_at: Timestamp,
    /// Credits (member-days of entitlement) currently in circulation.
    pub credits_in_circulation: u64,
    /// Payout reserved per active cluster per elapsed day.
    pub daily_rate_per_credit: Wei,
    pub active_clusters: u64,
    /// Reserved for active clusters but not yet claimed.
    pub total_accrued_unclaimed: Wei,
    /// Funds held by the reward pool.
    pub pool_balance: Wei,
}

impl Checkpoint {
    /// Funds not yet promised to anyone.
    pub fn allocatable(&self) -> Wei {
        self.pool_balance
            .saturating_sub(self.total_accrued_unclaimed)
    }

    /// Advances the snapshot over the whole days elapsed since the last
    /// update: reserves the active clusters' earnings at the old rate
    /// and burns the credits they consumed. Partial days stay pending
    /// until a full one has passed.
    pub(crate) fn age(&mut self, now: Timestamp, burn_per_cluster_day: u64) {
        let days = now.days_since(self.updated_at);
        if days == 0 {
            return;
        }
        if self.active_clusters > 0 {
            let reserve = self.daily_rate_per_credit
                * U256::from(days)
                * U256::from(self.active_clusters);
            // The reserve is capped by what the pool can still back;
            // the rate is re-derived at every event, so hitting the cap
            // means the credit supply outlived the pool.
            self.total_accrued_unclaimed += reserve.min(self.allocatable());
            let burned = days
                .saturating_mul(self.active_clusters)
                .saturating_mul(burn_per_cluster_day);
            self.credits_in_circulation = self.credits_in_circulation.saturating_sub(burned);
        }
        self.updated_at = self.updated_at.plus_days(days);
    }

    /// Re-derives the daily rate from the current pool and supply. With
    /// nothing in circulation the rate is parked at zero; operations
    /// that require a usable rate reject that state explicitly.
    pub(crate) fn reprice(&mut self) {
        self.daily_rate_per_credit = if self.credits_in_circulation == 0 {
            Wei::ZERO
        } else {
            self.allocatable() / U256::from(self.credits_in_circulation)
        };
    }
}

use {
    alloy_primitives::Address,
    model::Wei,
    serde::{Deserialize, Serialize},
};

/// Auction parameters, mutable only through the admin surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuctionConfig {
    /// The single privileged identity allowed to change parameters and
    /// manage the whitelist.
    pub admin: Address,
    /// Upper bound on a bid's discount rate, in basis points.
    pub max_discount_rate: u64,
    /// Lower bound on the number of credit days a bid purchases.
    pub min_duration_days: u64,
    /// Upper bound on the number of credit days a bid purchases. Keeps
    /// the compounded score factor well inside `U256` range; an
    /// unbounded duration would eventually wrap the multiplication and
    /// rank with a garbage score.
    pub max_duration_days: u64,
    /// Base daily return used to price one credit, in wei.
    pub daily_base_return: Wei,
    /// Bond required from non-whitelisted operators, per pending bid.
    pub bond_amount: Wei,
}

impl AuctionConfig {
    pub fn accepts(&self, discount_rate: u64, duration_days: u64) -> bool {
        discount_rate <= self.max_discount_rate
            && duration_days >= self.min_duration_days
            && duration_days <= self.max_duration_days
    }
}

//! Truncating fixed-point arithmetic for bid pricing and scoring.
//!
//! All quantities share the basis-point scale [`ONE`]. Every division
//! truncates toward zero; that rounding is part of the contract, so two
//! calls with identical integer inputs always produce bit-identical
//! results no matter where they run.

use alloy_primitives::U256;

/// The fixed-point scale: 10_000 basis points represent 1.0.
pub const ONE: u64 = 10_000;

/// Daily score growth factor, 1.001 at [`ONE`] scale.
///
/// A longer commitment compounds this once per purchased day, so bids
/// that lock in more days rank above equally priced shorter bids.
pub const GROWTH_PER_DAY: u64 = 10_010;

/// Operator reputation multiplier, stubbed to 1.0 until reputation
/// scoring exists.
pub const DEFAULT_REPUTATION: u64 = ONE;

/// Raises a [`ONE`]-scaled base to an integer power by squaring,
/// truncating to the [`ONE`] scale after every multiplication.
///
/// Callers bound the exponent (bid durations have a configured
/// maximum); far beyond that the running product would wrap `U256` and
/// the result would no longer be monotone in the exponent.
pub fn compound(base: u64, mut exponent: u64) -> U256 {
    let one = U256::from(ONE);
    let mut base = U256::from(base);
    let mut result = one;
    while exponent > 0 {
        if exponent & 1 == 1 {
            result = result * base / one;
        }
        base = base * base / one;
        exponent >>= 1;
    }
    result
}

/// Price of a single credit (one day of service for one cluster seat).
///
/// `daily_base_return * (ONE - discount_rate) / (cluster_size * ONE)`
/// with truncating division. `discount_rate` must not exceed [`ONE`];
/// callers validate it against the configured maximum first.
pub fn credit_price(daily_base_return: U256, discount_rate: u64, cluster_size: u64) -> U256 {
    daily_base_return * U256::from(ONE - discount_rate) / U256::from(cluster_size * ONE)
}

/// Total amount owed for a bid, excluding any bond.
pub fn bid_price(duration_days: u64, credit_price: U256) -> U256 {
    U256::from(duration_days) * credit_price
}

/// Sortable auction score of a bid.
///
/// `credit_price * compound(GROWTH_PER_DAY, days) * reputation / ONE`.
/// The result keeps one extra factor of [`ONE`] relative to wei; the
/// scaling is uniform across all bids so it never affects ordering.
pub fn auction_score(credit_price: U256, duration_days: u64, reputation: u64) -> U256 {
    credit_price * compound(GROWTH_PER_DAY, duration_days) * U256::from(reputation)
        / U256::from(ONE)
}

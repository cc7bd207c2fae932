pub mod fixed_point;
pub mod units;

pub use fixed_point::{
    DEFAULT_REPUTATION, GROWTH_PER_DAY, ONE, auction_score, bid_price, compound, credit_price,
};

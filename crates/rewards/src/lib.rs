//! Reward accrual for stakers, driven by cluster lifecycle events.
//!
//! A single global checkpoint converts the reward pool and the supply of
//! circulating credits into a daily payout rate. Cluster activations,
//! exits, deposits and claims all age the checkpoint first — reserving
//! what active clusters earned at the old rate and burning the credits
//! they consumed — before folding in their own effect and recomputing
//! the rate. Skipped periods therefore cost nothing: however many days
//! pass between events, one aging step accounts for all of them.

pub mod checkpoint;
pub mod engine;
pub mod vault;

pub use {
    checkpoint::Checkpoint,
    engine::{AccrualError, RewardAccrual, RewardsConfig, RewardsPool, UpkeepError},
    vault::{ClaimPermission, VaultAccrual},
};

//! Continuous sealed-style auction that allocates node operators into
//! fixed-size service clusters.
//!
//! Every size class runs its own sub-auction: an ordered ranking of the
//! pending bids competing for a seat in a cluster of that size. Whenever
//! the top K of a sub-auction changes, the engine incrementally re-forms
//! the class's candidate cluster and publishes it to the main auction,
//! where one candidate per class is ranked by average member score.
//! Consumers take the best candidate, which consumes its member bids and
//! settles their funds through the escrow collaborator.

pub mod bid;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod escrow;

pub use {
    bid::{Bid, BidLedger, BidState, OperatorAggregate},
    cluster::{ClusterRecord, LatestWinningInfo},
    config::AuctionConfig,
    engine::{
        AdminError, ClusterAuction, ConsumeError, ConsumedCluster, OutbidError, PlaceBidError,
        WithdrawError,
    },
    escrow::Escrow,
};

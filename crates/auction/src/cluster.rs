use {
    alloy_primitives::{U256, keccak256},
    model::{BidId, ClusterId, SizeClass, Timestamp},
    serde::{Deserialize, Serialize},
};

/// A formed candidate cluster: the best K distinct-submitter bids of one
/// size class, ranked in the main auction by their average score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterRecord {
    pub id: ClusterId,
    pub size_class: SizeClass,
    /// Member bids in rank order, best first.
    pub members: Vec<BidId>,
    /// Truncated mean of the K member scores.
    pub average_score: U256,
    pub formed_at: Timestamp,
    /// Set once the cluster has been handed to a consumer.
    pub consumed_at: Option<Timestamp>,
}

/// Cached summary of a class's current candidate: the score of its worst
/// member is the threshold a future bid must beat to force a
/// re-formation, which keeps irrelevant bids O(log n).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestWinningInfo {
    pub threshold_score: U256,
    pub cluster_id: ClusterId,
}

/// Content hash identifying a cluster.
///
/// Members are hashed in sorted order so the id depends on the member
/// set, not the rank order they were collected in; including the mean
/// score and formation time keeps ids comparable across replays while
/// distinguishing re-formations of the same set.
pub fn derive_cluster_id(
    class: SizeClass,
    members: &[BidId],
    average_score: U256,
    formed_at: Timestamp,
) -> ClusterId {
    let mut sorted = members.to_vec();
    sorted.sort();
    let mut buf = Vec::with_capacity(8 + 8 + 32 * sorted.len() + 32 + 8);
    buf.extend_from_slice(&class.seats().to_be_bytes());
    buf.extend_from_slice(&(sorted.len() as u64).to_be_bytes());
    for member in &sorted {
        buf.extend_from_slice(member.as_bytes());
    }
    buf.extend_from_slice(&average_score.to_be_bytes::<32>());
    buf.extend_from_slice(&formed_at.as_secs().to_be_bytes());
    ClusterId(keccak256(&buf))
}

//! The cluster-formation engine: bid lifecycle and incremental top-K
//! re-formation.

use {
    crate::{
        bid::{Bid, BidLedger, BidState, OperatorAggregate},
        cluster::{ClusterRecord, LatestWinningInfo, derive_cluster_id},
        config::AuctionConfig,
        escrow::Escrow,
    },
    alloy_primitives::{Address, U256},
    anyhow::Context,
    model::{BidId, ClusterId, SizeClass, Timestamp, Wei},
    number::{DEFAULT_REPUTATION, auction_score, bid_price, credit_price},
    score_tree::ScoreTree,
    std::collections::{HashMap, HashSet},
    thiserror::Error,
};

#[derive(Debug, Error)]
pub enum PlaceBidError {
    #[error("discount rate or duration outside the configured bounds")]
    InvalidParameters,
    #[error("submitter already has a pending bid in this size class")]
    DuplicateBid,
    #[error("payment of {sent} does not cover the required {required}")]
    InsufficientFunds { required: Wei, sent: Wei },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum OutbidError {
    #[error("discount rate or duration outside the configured bounds")]
    InvalidParameters,
    #[error("no pending bid to outbid in this size class")]
    BidNotFound,
    #[error("payment of {sent} does not cover the additional {required}")]
    InsufficientFunds { required: Wei, sent: Wei },
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum WithdrawError {
    #[error("no pending bid in this size class")]
    BidNotFound,
    #[error("bid is seated in the current candidate cluster")]
    BidLocked,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error)]
pub enum ConsumeError {
    #[error("no candidate cluster formed for this size class")]
    NoCandidate,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdminError {
    #[error("caller is not the configured admin")]
    Unauthorized,
    #[error("parameter outside its legal range")]
    InvalidParameters,
}

/// A consumed cluster as handed to the consumer: the record plus the
/// member bids at the moment of consumption.
#[derive(Debug, Clone)]
pub struct ConsumedCluster {
    pub record: ClusterRecord,
    pub members: Vec<Bid>,
}

#[derive(Debug, Default)]
struct SubAuction {
    tree: ScoreTree,
    winning: Option<LatestWinningInfo>,
}

/// Engine owning the bid lifecycle and both auction layers.
///
/// Operations apply one at a time and commit either all of their effects
/// or none: validations run first, escrow transfers second, and state
/// mutation only once nothing can fail any more. The ordering of
/// submitted operations is assumed adversarial, so every public method
/// leaves all invariants intact rather than relying on a later fix-up.
pub struct ClusterAuction<E> {
    config: AuctionConfig,
    escrow: E,
    ledger: BidLedger,
    sub_auctions: HashMap<SizeClass, SubAuction>,
    main_auction: ScoreTree,
    clusters: HashMap<ClusterId, ClusterRecord>,
}

impl<E: Escrow> ClusterAuction<E> {
    pub fn new(config: AuctionConfig, escrow: E) -> Self {
        Self {
            config,
            escrow,
            ledger: BidLedger::default(),
            sub_auctions: HashMap::new(),
            main_auction: ScoreTree::new(),
            clusters: HashMap::new(),
        }
    }

    /// Submits a new bid for one seat in a cluster of `class`.
    ///
    /// The payment must cover the bid price plus, for non-whitelisted
    /// operators, the configured bond; any excess is refunded.
    pub fn place_bid(
        &mut self,
        submitter: Address,
        discount_rate: u64,
        duration_days: u64,
        class: SizeClass,
        payment: Wei,
        now: Timestamp,
    ) -> Result<BidId, PlaceBidError> {
        if !self.config.accepts(discount_rate, duration_days) {
            return Err(PlaceBidError::InvalidParameters);
        }
        if self.ledger.pending_bid(&submitter, class).is_some() {
            return Err(PlaceBidError::DuplicateBid);
        }
        let unit = credit_price(self.config.daily_base_return, discount_rate, class.seats());
        let price = bid_price(duration_days, unit);
        let score = auction_score(unit, duration_days, DEFAULT_REPUTATION);
        let bond = if self.ledger.is_whitelisted(&submitter) {
            Wei::ZERO
        } else {
            self.config.bond_amount
        };
        let required = price + bond;
        if payment < required {
            return Err(PlaceBidError::InsufficientFunds {
                required,
                sent: payment,
            });
        }
        self.escrow
            .hold(submitter, required)
            .context("escrow hold failed")?;
        let excess = payment - required;
        if !excess.is_zero() {
            self.escrow
                .refund(submitter, excess)
                .context("excess refund failed")?;
        }

        let id = self.ledger.next_bid_id(submitter, class, now);
        self.ledger.record(Bid {
            id,
            submitter,
            size_class: class,
            score,
            price,
            credit_count: duration_days,
            discount_rate,
            bond,
            state: BidState::Pending,
            submitted_at: now,
        });
        let sub = self.sub_auctions.entry(class).or_default();
        sub.tree
            .insert(id.0, score)
            .context("bid id already ranked")?;
        tracing::debug!(bid = %id, %class, %score, %price, "bid placed");

        let should_reform = sub.tree.len() >= class.seats()
            && sub
                .winning
                .as_ref()
                .is_none_or(|winning| score > winning.threshold_score);
        if should_reform {
            self.reform(class, now)?;
        }
        Ok(id)
    }

    /// Replaces the caller's pending bid in `class` with new terms,
    /// keeping its identity. Price increases require the difference to
    /// be paid in; decreases are refunded through escrow.
    pub fn outbid(
        &mut self,
        submitter: Address,
        class: SizeClass,
        discount_rate: u64,
        duration_days: u64,
        payment: Wei,
        now: Timestamp,
    ) -> Result<BidId, OutbidError> {
        if !self.config.accepts(discount_rate, duration_days) {
            return Err(OutbidError::InvalidParameters);
        }
        let Some(id) = self.ledger.pending_bid(&submitter, class) else {
            return Err(OutbidError::BidNotFound);
        };
        let (old_score, old_price) = {
            let bid = self.ledger.bid(&id).context("pending bid missing")?;
            (bid.score, bid.price)
        };
        let unit = credit_price(self.config.daily_base_return, discount_rate, class.seats());
        let price = bid_price(duration_days, unit);
        let score = auction_score(unit, duration_days, DEFAULT_REPUTATION);

        let additional = price.saturating_sub(old_price);
        if payment < additional {
            return Err(OutbidError::InsufficientFunds {
                required: additional,
                sent: payment,
            });
        }
        if !additional.is_zero() {
            self.escrow
                .hold(submitter, additional)
                .context("escrow hold failed")?;
        }
        let refund = payment - additional + old_price.saturating_sub(price);
        if !refund.is_zero() {
            self.escrow
                .refund(submitter, refund)
                .context("refund failed")?;
        }

        let was_seated = self.is_seated(class, &id);
        let sub = self
            .sub_auctions
            .get_mut(&class)
            .context("sub-auction missing")?;
        sub.tree
            .remove(id.0, old_score)
            .context("pending bid not ranked")?;
        sub.tree
            .insert(id.0, score)
            .context("bid id already ranked")?;
        let bid = self.ledger.bid_mut(&id).context("pending bid missing")?;
        bid.score = score;
        bid.price = price;
        bid.credit_count = duration_days;
        bid.discount_rate = discount_rate;
        tracing::debug!(bid = %id, %class, old = %old_score, new = %score, "bid outbid");

        let sub = self
            .sub_auctions
            .get(&class)
            .context("sub-auction missing")?;
        let should_reform = sub.tree.len() >= class.seats()
            && (was_seated
                || sub
                    .winning
                    .as_ref()
                    .is_none_or(|winning| score > winning.threshold_score));
        if should_reform {
            self.reform(class, now)?;
        }
        Ok(id)
    }

    /// Withdraws the caller's pending bid in `class`, refunding its
    /// price and bond. Bids seated in the current candidate cluster are
    /// locked: they can be outbid but not withdrawn, which is what lets
    /// withdrawal skip re-formation without ever leaving a candidate
    /// referencing a dead bid.
    pub fn withdraw(&mut self, submitter: Address, class: SizeClass) -> Result<Wei, WithdrawError> {
        let Some(id) = self.ledger.pending_bid(&submitter, class) else {
            return Err(WithdrawError::BidNotFound);
        };
        if self.is_seated(class, &id) {
            return Err(WithdrawError::BidLocked);
        }
        let (score, refund) = {
            let bid = self.ledger.bid(&id).context("pending bid missing")?;
            (bid.score, bid.price + bid.bond)
        };
        self.escrow
            .refund(submitter, refund)
            .context("withdraw refund failed")?;
        self.sub_auctions
            .get_mut(&class)
            .context("sub-auction missing")?
            .tree
            .remove(id.0, score)
            .context("pending bid not ranked")?;
        self.ledger.retire(&id, BidState::Withdrawn);
        tracing::debug!(bid = %id, %class, amount = %refund, "bid withdrawn");
        Ok(refund)
    }

    /// Hands the class's candidate cluster to the caller, consuming its
    /// member bids and releasing their funds. The only way a bid leaves
    /// the sub-auction without an explicit withdrawal.
    pub fn consume_winning_cluster(
        &mut self,
        class: SizeClass,
        now: Timestamp,
    ) -> Result<ConsumedCluster, ConsumeError> {
        let Some(winning) = self.sub_auctions.get(&class).and_then(|sub| sub.winning) else {
            return Err(ConsumeError::NoCandidate);
        };
        let record = self
            .clusters
            .get(&winning.cluster_id)
            .context("candidate record missing")?
            .clone();

        let mut members = Vec::with_capacity(record.members.len());
        let mut total = Wei::ZERO;
        for id in &record.members {
            let bid = self.ledger.bid(id).context("member bid missing")?;
            total += bid.price + bid.bond;
            members.push(bid.clone());
        }
        self.escrow
            .release_funds(total)
            .context("winner payout failed")?;

        let sub = self
            .sub_auctions
            .get_mut(&class)
            .context("sub-auction missing")?;
        for bid in &members {
            sub.tree
                .remove(bid.id.0, bid.score)
                .context("member bid not ranked")?;
        }
        sub.winning = None;
        for bid in members.iter_mut() {
            self.ledger.retire(&bid.id, BidState::Consumed);
            bid.state = BidState::Consumed;
        }
        self.main_auction
            .remove(record.id.0, record.average_score)
            .context("candidate missing from main auction")?;
        let stored = self
            .clusters
            .get_mut(&record.id)
            .context("candidate record missing")?;
        stored.consumed_at = Some(now);
        tracing::info!(cluster = %record.id, %class, amount = %total, "cluster consumed");

        // The survivors immediately compete for the next candidate.
        let enough_left = self
            .sub_auctions
            .get(&class)
            .is_some_and(|sub| sub.tree.len() >= class.seats());
        if enough_left {
            self.reform(class, now).map_err(ConsumeError::Other)?;
        }

        let mut record = record;
        record.consumed_at = Some(now);
        Ok(ConsumedCluster { record, members })
    }

    /// Re-derives the class's candidate cluster from the top of its
    /// sub-auction: walk downward from the best score, seat the first K
    /// distinct submitters, and atomically swap the candidate in the
    /// main auction.
    fn reform(&mut self, class: SizeClass, now: Timestamp) -> anyhow::Result<()> {
        let seats = class.seats() as usize;
        let Some(sub) = self.sub_auctions.get(&class) else {
            return Ok(());
        };
        let mut members = Vec::with_capacity(seats);
        let mut scores = Vec::with_capacity(seats);
        let mut seen = HashSet::new();
        let mut cursor = sub.tree.last();
        'walk: while let Some(score) = cursor {
            for raw in sub.tree.ids_at(score) {
                let id = BidId(raw);
                let Some(bid) = self.ledger.bid(&id) else {
                    continue;
                };
                // One seat per submitter, whatever score levels they
                // appear at.
                if !seen.insert(bid.submitter) {
                    continue;
                }
                members.push(id);
                scores.push(score);
                if members.len() == seats {
                    break 'walk;
                }
            }
            cursor = sub.tree.prev(score);
        }
        if members.len() < seats {
            return Ok(());
        }
        let Some(&threshold) = scores.last() else {
            return Ok(());
        };
        let sum = scores.iter().fold(U256::ZERO, |acc, score| acc + score);
        let average = sum / U256::from(class.seats());
        let id = derive_cluster_id(class, &members, average, now);

        let sub = self
            .sub_auctions
            .get_mut(&class)
            .context("sub-auction missing")?;
        if let Some(previous) = sub.winning.take() {
            if let Some(old) = self.clusters.remove(&previous.cluster_id) {
                self.main_auction
                    .remove(old.id.0, old.average_score)
                    .context("stale candidate missing from main auction")?;
            }
        }
        self.main_auction
            .insert(id.0, average)
            .context("cluster id already ranked")?;
        self.clusters.insert(
            id,
            ClusterRecord {
                id,
                size_class: class,
                members,
                average_score: average,
                formed_at: now,
                consumed_at: None,
            },
        );
        sub.winning = Some(LatestWinningInfo {
            threshold_score: threshold,
            cluster_id: id,
        });
        tracing::debug!(%class, cluster = %id, score = %average, %threshold, "candidate re-formed");
        Ok(())
    }

    fn is_seated(&self, class: SizeClass, id: &BidId) -> bool {
        self.sub_auctions
            .get(&class)
            .and_then(|sub| sub.winning.as_ref())
            .and_then(|winning| self.clusters.get(&winning.cluster_id))
            .is_some_and(|cluster| cluster.members.contains(id))
    }

    // ---- admin surface ----

    fn ensure_admin(&self, caller: Address) -> Result<(), AdminError> {
        if caller == self.config.admin {
            Ok(())
        } else {
            Err(AdminError::Unauthorized)
        }
    }

    pub fn set_max_discount_rate(&mut self, caller: Address, rate: u64) -> Result<(), AdminError> {
        self.ensure_admin(caller)?;
        if rate > number::ONE {
            return Err(AdminError::InvalidParameters);
        }
        self.config.max_discount_rate = rate;
        tracing::info!(rate, "max discount rate updated");
        Ok(())
    }

    pub fn set_min_duration(&mut self, caller: Address, days: u64) -> Result<(), AdminError> {
        self.ensure_admin(caller)?;
        if days == 0 {
            return Err(AdminError::InvalidParameters);
        }
        self.config.min_duration_days = days;
        tracing::info!(days, "min duration updated");
        Ok(())
    }

    pub fn set_daily_base_return(&mut self, caller: Address, amount: Wei) -> Result<(), AdminError> {
        self.ensure_admin(caller)?;
        self.config.daily_base_return = amount;
        tracing::info!(%amount, "daily base return updated");
        Ok(())
    }

    pub fn add_to_whitelist(&mut self, caller: Address, operator: Address) -> Result<(), AdminError> {
        self.ensure_admin(caller)?;
        self.ledger.operator_mut(operator).whitelisted = true;
        tracing::info!(%operator, "operator whitelisted");
        Ok(())
    }

    pub fn remove_from_whitelist(
        &mut self,
        caller: Address,
        operator: Address,
    ) -> Result<(), AdminError> {
        self.ensure_admin(caller)?;
        self.ledger.operator_mut(operator).whitelisted = false;
        tracing::info!(%operator, "operator removed from whitelist");
        Ok(())
    }

    // ---- read surface ----

    pub fn bid(&self, id: &BidId) -> Option<&Bid> {
        self.ledger.bid(id)
    }

    pub fn cluster(&self, id: &ClusterId) -> Option<&ClusterRecord> {
        self.clusters.get(id)
    }

    pub fn operator(&self, submitter: &Address) -> Option<&OperatorAggregate> {
        self.ledger.operator(submitter)
    }

    /// The class's candidate summary: worst seated score and candidate
    /// cluster id.
    pub fn winning_info(&self, class: SizeClass) -> Option<LatestWinningInfo> {
        self.sub_auctions.get(&class).and_then(|sub| sub.winning)
    }

    /// The class's full candidate cluster record.
    pub fn current_winner(&self, class: SizeClass) -> Option<&ClusterRecord> {
        let winning = self.winning_info(class)?;
        self.clusters.get(&winning.cluster_id)
    }

    /// The best candidate across all size classes, ties resolved by
    /// formation order.
    pub fn best_cluster(&self) -> Option<&ClusterRecord> {
        let top = self.main_auction.last()?;
        let raw = self.main_auction.ids_at(top).next()?;
        self.clusters.get(&ClusterId(raw))
    }

    /// Number of pending bids in the class's sub-auction.
    pub fn pending_count(&self, class: SizeClass) -> u64 {
        self.sub_auctions
            .get(&class)
            .map_or(0, |sub| sub.tree.len())
    }

    /// Whether the bid currently occupies a slot in its class's
    /// sub-auction ranking.
    pub fn is_ranked(&self, class: SizeClass, id: &BidId) -> bool {
        let Some(bid) = self.ledger.bid(id) else {
            return false;
        };
        self.sub_auctions
            .get(&class)
            .is_some_and(|sub| sub.tree.contains(id.0, bid.score))
    }

    pub fn config(&self) -> &AuctionConfig {
        &self.config
    }
}

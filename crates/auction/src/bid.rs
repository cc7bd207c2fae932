use {
    alloy_primitives::{Address, U256, keccak256},
    model::{BidId, SizeClass, Timestamp, Wei},
    serde::{Deserialize, Serialize},
    std::collections::HashMap,
};

/// Lifecycle of a bid. `Pending` bids live in their class's sub-auction;
/// the two other states are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BidState {
    Pending,
    Withdrawn,
    Consumed,
}

/// A recorded bid. An outbid mutates score, price, credit count and
/// discount in place; the identity (id, submitter, class) never changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub submitter: Address,
    pub size_class: SizeClass,
    /// Sortable auction score at the system's fixed-point scale.
    pub score: U256,
    /// Amount owed excluding any bond.
    pub price: Wei,
    /// Duration units (days) purchased.
    pub credit_count: u64,
    /// Discount rate in basis points.
    pub discount_rate: u64,
    /// Bond held in escrow for this bid, zero for whitelisted
    /// operators. Recorded at placement time so a later change of the
    /// configured bond amount cannot skew the refund.
    pub bond: Wei,
    pub state: BidState,
    pub submitted_at: Timestamp,
}

impl Bid {
    pub fn is_bonded(&self) -> bool {
        !self.bond.is_zero()
    }
}

/// Per-operator aggregate counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OperatorAggregate {
    pub whitelisted: bool,
    /// Bonds currently held; equals the operator's non-whitelisted
    /// active bids.
    pub bonds_held: u64,
    /// The operator's single pending bid per size class, if any.
    pub pending: HashMap<SizeClass, BidId>,
    /// Lifetime bid count, used as the sequence number when deriving
    /// fresh bid ids.
    pub bids_submitted: u64,
}

/// Append-only record of every bid plus per-operator aggregates.
///
/// Terminal bids stay in the ledger so the read surface can serve bid
/// details after withdrawal or consumption.
#[derive(Debug, Default)]
pub struct BidLedger {
    bids: HashMap<BidId, Bid>,
    operators: HashMap<Address, OperatorAggregate>,
}

impl BidLedger {
    /// Derives the id for an operator's next bid from their identity,
    /// the submission time, the class and their bid sequence number.
    pub fn next_bid_id(&self, submitter: Address, class: SizeClass, now: Timestamp) -> BidId {
        let sequence = self
            .operators
            .get(&submitter)
            .map_or(0, |operator| operator.bids_submitted);
        let mut buf = Vec::with_capacity(20 + 8 + 8 + 8);
        buf.extend_from_slice(submitter.as_slice());
        buf.extend_from_slice(&now.as_secs().to_be_bytes());
        buf.extend_from_slice(&class.seats().to_be_bytes());
        buf.extend_from_slice(&sequence.to_be_bytes());
        BidId(keccak256(&buf))
    }

    pub fn record(&mut self, bid: Bid) {
        let operator = self.operators.entry(bid.submitter).or_default();
        operator.pending.insert(bid.size_class, bid.id);
        operator.bids_submitted += 1;
        if bid.is_bonded() {
            operator.bonds_held += 1;
        }
        self.bids.insert(bid.id, bid);
    }

    pub fn bid(&self, id: &BidId) -> Option<&Bid> {
        self.bids.get(id)
    }

    pub fn bid_mut(&mut self, id: &BidId) -> Option<&mut Bid> {
        self.bids.get_mut(id)
    }

    pub fn operator(&self, submitter: &Address) -> Option<&OperatorAggregate> {
        self.operators.get(submitter)
    }

    pub fn operator_mut(&mut self, submitter: Address) -> &mut OperatorAggregate {
        self.operators.entry(submitter).or_default()
    }

    pub fn pending_bid(&self, submitter: &Address, class: SizeClass) -> Option<BidId> {
        self.operators
            .get(submitter)?
            .pending
            .get(&class)
            .copied()
    }

    pub fn is_whitelisted(&self, submitter: &Address) -> bool {
        self.operators
            .get(submitter)
            .is_some_and(|operator| operator.whitelisted)
    }

    /// Moves a pending bid into a terminal state, releasing its pending
    /// slot and bond counter.
    pub fn retire(&mut self, id: &BidId, state: BidState) {
        debug_assert!(state != BidState::Pending);
        let Some(bid) = self.bids.get_mut(id) else {
            return;
        };
        bid.state = state;
        let (submitter, class, bonded) = (bid.submitter, bid.size_class, bid.is_bonded());
        if let Some(operator) = self.operators.get_mut(&submitter) {
            operator.pending.remove(&class);
            if bonded {
                operator.bonds_held = operator.bonds_held.saturating_sub(1);
            }
        }
    }
}

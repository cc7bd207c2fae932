use {
    alloy_primitives::Address,
    anyhow::Result,
    model::Wei,
};

/// Settlement collaborator holding funds pending a win or refund
/// decision.
///
/// Calls are synchronous; a failure aborts the whole engine operation
/// before any state is mutated, so a rejected transfer never leaves a
/// half-applied bid behind. The engine never retries on its own.
#[cfg_attr(test, mockall::automock)]
pub trait Escrow {
    /// Moves `amount` from the submitter into escrow custody.
    fn hold(&self, from: Address, amount: Wei) -> Result<()>;

    /// Returns `amount` to `recipient` out of escrow custody.
    fn refund(&self, recipient: Address, amount: Wei) -> Result<()>;

    /// Pays `amount` out to the winner's fund recipient.
    fn release_funds(&self, amount: Wei) -> Result<()>;
}

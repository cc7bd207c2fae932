//! The checkpoint engine: lifecycle events in, stable daily rate out.

use {
    crate::{
        checkpoint::Checkpoint,
        vault::{ClaimPermission, VaultAccrual},
    },
    alloy_primitives::{Address, U256},
    anyhow::Context,
    model::{ClusterId, Timestamp, Wei},
    serde::{Deserialize, Serialize},
    std::{collections::HashMap, time::Duration},
    thiserror::Error,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardsConfig {
    /// Credits one active cluster consumes per day; integrators set
    /// this to the cluster size so each member burns one credit per
    /// day.
    pub credits_per_cluster_day: u64,
    /// Minimum gap between two maintenance scans.
    #[serde(with = "humantime_serde")]
    pub upkeep_interval: Duration,
}

/// Pool collaborator paying claims out. Synchronous; a failure aborts
/// the claim before any state changes.
#[cfg_attr(test, mockall::automock)]
pub trait RewardsPool {
    fn pay(&self, vault: Address, amount: Wei) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum AccrualError {
    #[error("no credits in circulation to derive a rate from")]
    ZeroCirculation,
    #[error("member credit list must not be empty")]
    InvalidParameters,
    #[error("credit supply overflow")]
    SupplyOverflow,
    #[error("vault has no accrual record")]
    UnknownVault,
    #[error("vault is already accruing for a live cluster")]
    VaultActive,
    #[error("cluster has no accrual record")]
    UnknownCluster,
    #[error("cluster already retired or exited")]
    AlreadyRetired,
    #[error("all payable credits have been claimed")]
    VaultExhausted,
    #[error("accrued reserve cannot cover the payout")]
    ReserveUnderflow,
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Maintenance-trigger rejection, distinct from a due-but-empty scan
/// (which is a successful no-op).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum UpkeepError {
    #[error("upkeep interval has not elapsed")]
    NotDue,
}

/// Engine tracking the global checkpoint and one accrual record per
/// vault.
///
/// Failable operations age a copy of the checkpoint, validate against
/// it and only then commit, so a rejected call leaves no trace.
pub struct RewardAccrual<P> {
    config: RewardsConfig,
    pool: P,
    checkpoint: Checkpoint,
    vaults: HashMap<Address, VaultAccrual>,
    by_cluster: HashMap<ClusterId, Address>,
    last_scan: Timestamp,
}

impl<P: RewardsPool> RewardAccrual<P> {
    pub fn new(config: RewardsConfig, pool: P, genesis: Timestamp) -> Self {
        Self {
            config,
            pool,
            checkpoint: Checkpoint {
                updated_at: genesis,
                ..Default::default()
            },
            vaults: HashMap::new(),
            by_cluster: HashMap::new(),
            last_scan: genesis,
        }
    }

    /// Replenishes the reward pool and re-derives the rate.
    pub fn deposit_rewards(&mut self, amount: Wei, now: Timestamp) {
        self.checkpoint.age(now, self.config.credits_per_cluster_day);
        self.checkpoint.pool_balance += amount;
        self.checkpoint.reprice();
        tracing::info!(%amount, rate = %self.checkpoint.daily_rate_per_credit, "rewards deposited");
    }

    /// Folds freshly issued credits (the member durations of a newly
    /// formed cluster) into circulation.
    pub fn on_credits_issued(
        &mut self,
        new_credits: u64,
        now: Timestamp,
    ) -> Result<(), AccrualError> {
        let mut next = self.checkpoint.clone();
        next.age(now, self.config.credits_per_cluster_day);
        next.credits_in_circulation = next
            .credits_in_circulation
            .checked_add(new_credits)
            .ok_or(AccrualError::SupplyOverflow)?;
        if next.credits_in_circulation == 0 {
            return Err(AccrualError::ZeroCirculation);
        }
        next.reprice();
        self.checkpoint = next;
        tracing::debug!(
            new_credits,
            circulation = self.checkpoint.credits_in_circulation,
            rate = %self.checkpoint.daily_rate_per_credit,
            "credits issued"
        );
        Ok(())
    }

    /// Starts accrual for `vault` once its cluster goes live. The
    /// weakest member's credit count bounds the vault's claimable days
    /// and sets the exit deadline.
    pub fn on_cluster_activated(
        &mut self,
        vault: Address,
        cluster: ClusterId,
        member_credits: &[u64],
        now: Timestamp,
    ) -> Result<(), AccrualError> {
        let Some(&smallest) = member_credits.iter().min() else {
            return Err(AccrualError::InvalidParameters);
        };
        if self
            .vaults
            .get(&vault)
            .is_some_and(|accrual| accrual.permission != ClaimPermission::Exhausted)
        {
            return Err(AccrualError::VaultActive);
        }
        let mut next = self.checkpoint.clone();
        next.age(now, self.config.credits_per_cluster_day);
        if next.credits_in_circulation == 0 {
            return Err(AccrualError::ZeroCirculation);
        }
        next.active_clusters += 1;
        next.reprice();
        self.checkpoint = next;

        let issued = member_credits.iter().sum();
        if let Some(previous) = self.vaults.insert(
            vault,
            VaultAccrual {
                vault,
                cluster,
                smallest_remaining: smallest,
                days_claimed: 0,
                activated_at: now,
                last_update: now,
                exit_deadline: now.plus_days(smallest),
                credits_issued: issued,
                permission: ClaimPermission::Open,
            },
        ) {
            self.by_cluster.remove(&previous.cluster);
        }
        self.by_cluster.insert(cluster, vault);
        tracing::info!(%vault, %cluster, smallest, issued, "cluster activated");
        Ok(())
    }

    /// Pays the vault for its elapsed days at the current rate.
    ///
    /// Once the claimed days reach the weakest member's credit count
    /// the record turns terminal and further claims are rejected
    /// instead of silently paying zero.
    pub fn claim(&mut self, vault: Address, now: Timestamp) -> Result<Wei, AccrualError> {
        let Some(accrual) = self.vaults.get(&vault) else {
            return Err(AccrualError::UnknownVault);
        };
        if accrual.permission == ClaimPermission::Exhausted {
            return Err(AccrualError::VaultExhausted);
        }
        let mut next = self.checkpoint.clone();
        next.age(now, self.config.credits_per_cluster_day);
        let payable = accrual.claimable_days(now);
        let amount = next.daily_rate_per_credit * U256::from(payable);
        if amount > next.total_accrued_unclaimed {
            return Err(AccrualError::ReserveUnderflow);
        }
        if !amount.is_zero() {
            self.pool
                .pay(vault, amount)
                .context("reward payout failed")?;
        }

        next.total_accrued_unclaimed -= amount;
        next.pool_balance -= amount;
        let was_open = accrual.permission == ClaimPermission::Open;
        let accrual = self
            .vaults
            .get_mut(&vault)
            .expect("present above; single thread of control");
        accrual.days_claimed += payable;
        accrual.last_update = accrual.last_update.plus_days(payable);
        if accrual.days_claimed >= accrual.smallest_remaining {
            // Final payable claim. A still-open cluster retires here;
            // one already retired by the scan or an exit was released
            // back then.
            if was_open {
                let remaining =
                    accrual.remaining_credits(now, self.config.credits_per_cluster_day);
                next.credits_in_circulation =
                    next.credits_in_circulation.saturating_sub(remaining);
                next.active_clusters = next.active_clusters.saturating_sub(1);
            }
            accrual.permission = ClaimPermission::Exhausted;
        }
        next.reprice();
        self.checkpoint = next;
        tracing::debug!(%vault, %amount, payable, "claim paid");
        Ok(amount)
    }

    /// Consumer-reported early exit of a live cluster: returns its
    /// unconsumed credits, stops its accrual and caps the vault's
    /// allowance at the days actually served.
    pub fn on_cluster_exited(
        &mut self,
        cluster: ClusterId,
        now: Timestamp,
    ) -> Result<(), AccrualError> {
        let Some(&vault) = self.by_cluster.get(&cluster) else {
            return Err(AccrualError::UnknownCluster);
        };
        let accrual = self
            .vaults
            .get_mut(&vault)
            .ok_or(AccrualError::UnknownVault)?;
        if accrual.permission != ClaimPermission::Open {
            return Err(AccrualError::AlreadyRetired);
        }
        self.checkpoint
            .age(now, self.config.credits_per_cluster_day);
        let remaining = accrual.remaining_credits(now, self.config.credits_per_cluster_day);
        self.checkpoint.credits_in_circulation = self
            .checkpoint
            .credits_in_circulation
            .saturating_sub(remaining);
        self.checkpoint.active_clusters = self.checkpoint.active_clusters.saturating_sub(1);
        let served = accrual.days_claimed + now.days_since(accrual.last_update);
        accrual.smallest_remaining = accrual.smallest_remaining.min(served);
        accrual.permission = if accrual.smallest_remaining <= accrual.days_claimed {
            ClaimPermission::Exhausted
        } else {
            ClaimPermission::LastClaimOnly
        };
        self.checkpoint.reprice();
        tracing::info!(%cluster, %vault, remaining, "cluster exited early");
        Ok(())
    }

    /// Periodic maintenance: retires every live cluster past its exit
    /// deadline, returning the excess credits of members that outlasted
    /// the weakest. Safe to call when nothing is due (a no-op), but
    /// rejected outright before the upkeep interval has elapsed.
    pub fn scan_and_retire(&mut self, now: Timestamp) -> Result<u64, UpkeepError> {
        let due_at = self
            .last_scan
            .plus_secs(self.config.upkeep_interval.as_secs());
        if now < due_at {
            return Err(UpkeepError::NotDue);
        }
        self.last_scan = now;
        self.checkpoint
            .age(now, self.config.credits_per_cluster_day);
        let burn = self.config.credits_per_cluster_day;
        let mut retired = 0;
        for accrual in self.vaults.values_mut() {
            if accrual.permission != ClaimPermission::Open || now < accrual.exit_deadline {
                continue;
            }
            let remaining = accrual.remaining_credits(now, burn);
            self.checkpoint.credits_in_circulation = self
                .checkpoint
                .credits_in_circulation
                .saturating_sub(remaining);
            self.checkpoint.active_clusters = self.checkpoint.active_clusters.saturating_sub(1);
            accrual.permission = ClaimPermission::LastClaimOnly;
            retired += 1;
            tracing::info!(vault = %accrual.vault, cluster = %accrual.cluster, remaining, "cluster retired");
        }
        if retired > 0 {
            self.checkpoint.reprice();
        }
        Ok(retired)
    }

    // ---- read surface ----

    pub fn checkpoint(&self) -> &Checkpoint {
        &self.checkpoint
    }

    pub fn vault_accrual(&self, vault: &Address) -> Option<&VaultAccrual> {
        self.vaults.get(vault)
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::vault::ClaimPermission,
        alloy_primitives::B256,
        model::SECONDS_PER_DAY,
    };

    fn config() -> RewardsConfig {
        RewardsConfig {
            credits_per_cluster_day: 4,
            upkeep_interval: Duration::from_secs(SECONDS_PER_DAY),
        }
    }

    fn cluster(byte: u8) -> ClusterId {
        ClusterId(B256::repeat_byte(byte))
    }

    fn vault(byte: u8) -> Address {
        Address::repeat_byte(byte)
    }

    fn day(n: u64) -> Timestamp {
        Timestamp(n * SECONDS_PER_DAY)
    }

    fn silent_pool() -> MockRewardsPool {
        let mut pool = MockRewardsPool::new();
        pool.expect_pay().never();
        pool
    }

    #[test]
    fn activation_with_no_circulation_is_rejected() {
        let mut engine = RewardAccrual::new(config(), silent_pool(), day(0));
        engine.deposit_rewards(Wei::from(1_000_000u64), day(0));
        let result =
            engine.on_cluster_activated(vault(1), cluster(1), &[30, 30, 30, 30], day(0));
        assert!(matches!(result, Err(AccrualError::ZeroCirculation)));
        assert_eq!(engine.checkpoint().active_clusters, 0);
        assert!(engine.vault_accrual(&vault(1)).is_none());
    }

    #[test]
    fn deposit_and_issuance_derive_the_rate() {
        let mut engine = RewardAccrual::new(config(), silent_pool(), day(0));
        engine.deposit_rewards(Wei::from(1_000_000u64), day(0));
        engine.on_credits_issued(120, day(0)).unwrap();
        // 1_000_000 / 120 truncates to 8_333.
        assert_eq!(engine.checkpoint().daily_rate_per_credit, Wei::from(8_333u64));
        assert_eq!(engine.checkpoint().credits_in_circulation, 120);
    }

    #[test]
    fn empty_member_list_is_invalid() {
        let mut engine = RewardAccrual::new(config(), silent_pool(), day(0));
        let result = engine.on_cluster_activated(vault(1), cluster(1), &[], day(0));
        assert!(matches!(result, Err(AccrualError::InvalidParameters)));
    }

    #[test]
    fn a_live_vault_cannot_host_a_second_cluster() {
        let mut engine = RewardAccrual::new(config(), silent_pool(), day(0));
        engine.deposit_rewards(Wei::from(1_000_000u64), day(0));
        engine.on_credits_issued(120, day(0)).unwrap();
        engine
            .on_cluster_activated(vault(1), cluster(1), &[30, 30, 30, 30], day(0))
            .unwrap();
        let result =
            engine.on_cluster_activated(vault(1), cluster(2), &[10, 10, 10, 10], day(1));
        assert!(matches!(result, Err(AccrualError::VaultActive)));
    }

    #[test]
    fn claims_pay_elapsed_days_at_the_reserved_rate() {
        let mut pool = MockRewardsPool::new();
        pool.expect_pay()
            .withf(|to, amount| *to == vault(1) && *amount == Wei::from(10 * 8_333u64))
            .times(1)
            .returning(|_, _| Ok(()));
        let mut engine = RewardAccrual::new(config(), pool, day(0));
        engine.deposit_rewards(Wei::from(1_000_000u64), day(0));
        engine.on_credits_issued(120, day(0)).unwrap();
        engine
            .on_cluster_activated(vault(1), cluster(1), &[30, 30, 30, 30], day(0))
            .unwrap();

        let paid = engine.claim(vault(1), day(10)).unwrap();
        assert_eq!(paid, Wei::from(10 * 8_333u64));
        let accrual = engine.vault_accrual(&vault(1)).unwrap();
        assert_eq!(accrual.days_claimed, 10);
        assert_eq!(accrual.permission, ClaimPermission::Open);
        // Payout left both the reserve and the pool.
        assert_eq!(
            engine.checkpoint().pool_balance,
            Wei::from(1_000_000u64 - 10 * 8_333)
        );
    }

    #[test]
    fn final_claim_exhausts_the_vault_and_retires_the_cluster() {
        let mut pool = MockRewardsPool::new();
        pool.expect_pay().times(1).returning(|_, _| Ok(()));
        let mut engine = RewardAccrual::new(config(), pool, day(0));
        engine.deposit_rewards(Wei::from(1_000_000u64), day(0));
        engine.on_credits_issued(120, day(0)).unwrap();
        engine
            .on_cluster_activated(vault(1), cluster(1), &[30, 30, 30, 30], day(0))
            .unwrap();

        // 90 elapsed days pay out only the 30 the weakest member backs.
        engine.claim(vault(1), day(90)).unwrap();
        let accrual = engine.vault_accrual(&vault(1)).unwrap();
        assert_eq!(accrual.days_claimed, 30);
        assert_eq!(accrual.permission, ClaimPermission::Exhausted);
        assert_eq!(engine.checkpoint().active_clusters, 0);
        assert!(matches!(
            engine.claim(vault(1), day(91)),
            Err(AccrualError::VaultExhausted)
        ));
    }

    #[test]
    fn failed_payout_leaves_no_trace() {
        let mut pool = MockRewardsPool::new();
        pool.expect_pay()
            .times(1)
            .returning(|_, _| Err(anyhow::anyhow!("transfer reverted")));
        let mut engine = RewardAccrual::new(config(), pool, day(0));
        engine.deposit_rewards(Wei::from(1_000_000u64), day(0));
        engine.on_credits_issued(120, day(0)).unwrap();
        engine
            .on_cluster_activated(vault(1), cluster(1), &[30, 30, 30, 30], day(0))
            .unwrap();
        let before = engine.checkpoint().clone();

        assert!(matches!(
            engine.claim(vault(1), day(10)),
            Err(AccrualError::Other(_))
        ));
        assert_eq!(engine.checkpoint(), &before);
        assert_eq!(engine.vault_accrual(&vault(1)).unwrap().days_claimed, 0);
    }

    #[test]
    fn early_exit_caps_the_allowance_at_days_served() {
        let mut pool = MockRewardsPool::new();
        pool.expect_pay().times(1).returning(|_, _| Ok(()));
        let mut engine = RewardAccrual::new(config(), pool, day(0));
        engine.deposit_rewards(Wei::from(1_000_000u64), day(0));
        engine.on_credits_issued(240, day(0)).unwrap();
        engine
            .on_cluster_activated(vault(1), cluster(1), &[30, 30, 30, 30], day(0))
            .unwrap();
        // A second live cluster keeps credits circulating past the exit.
        engine
            .on_cluster_activated(vault(2), cluster(2), &[30, 30, 30, 30], day(0))
            .unwrap();

        engine.on_cluster_exited(cluster(1), day(12)).unwrap();
        let accrual = engine.vault_accrual(&vault(1)).unwrap();
        assert_eq!(accrual.permission, ClaimPermission::LastClaimOnly);
        assert_eq!(accrual.smallest_remaining, 12);
        assert_eq!(engine.checkpoint().active_clusters, 1);
        assert!(matches!(
            engine.on_cluster_exited(cluster(1), day(13)),
            Err(AccrualError::AlreadyRetired)
        ));

        // The one remaining claim collects the 12 served days, then the
        // record is terminal.
        engine.claim(vault(1), day(40)).unwrap();
        let accrual = engine.vault_accrual(&vault(1)).unwrap();
        assert_eq!(accrual.days_claimed, 12);
        assert_eq!(accrual.permission, ClaimPermission::Exhausted);
    }

    #[test]
    fn exit_of_an_unknown_cluster_is_rejected() {
        let mut engine = RewardAccrual::new(config(), silent_pool(), day(0));
        assert!(matches!(
            engine.on_cluster_exited(cluster(9), day(1)),
            Err(AccrualError::UnknownCluster)
        ));
    }

    #[test]
    fn scan_respects_the_upkeep_interval() {
        let mut engine = RewardAccrual::new(config(), silent_pool(), day(0));
        assert_eq!(
            engine.scan_and_retire(Timestamp(SECONDS_PER_DAY / 2)),
            Err(UpkeepError::NotDue)
        );
        // Due but nothing to retire: a successful no-op.
        assert_eq!(engine.scan_and_retire(day(1)), Ok(0));
    }

    #[test]
    fn scan_retires_expired_clusters_and_returns_excess_credits() {
        let mut engine = RewardAccrual::new(config(), silent_pool(), day(0));
        engine.deposit_rewards(Wei::from(1_000_000u64), day(0));
        // 30 + 30 + 30 + 60: the long member leaves 30 excess credits.
        engine.on_credits_issued(150, day(0)).unwrap();
        engine
            .on_cluster_activated(vault(1), cluster(1), &[30, 30, 30, 60], day(0))
            .unwrap();

        // Deadline is day 30; day 20 scan retires nothing.
        assert_eq!(engine.scan_and_retire(day(20)), Ok(0));
        assert_eq!(engine.scan_and_retire(day(35)), Ok(1));
        let accrual = engine.vault_accrual(&vault(1)).unwrap();
        assert_eq!(accrual.permission, ClaimPermission::LastClaimOnly);
        assert_eq!(engine.checkpoint().active_clusters, 0);
        // 150 issued - 4/day * 30 days burned = 30 excess returned, so
        // the scan leaves circulation at zero.
        assert_eq!(engine.checkpoint().credits_in_circulation, 0);
        // Re-running past the interval retires nothing further.
        assert_eq!(engine.scan_and_retire(day(37)), Ok(0));
    }

    #[test]
    fn an_exhausted_vault_can_host_again() {
        let mut pool = MockRewardsPool::new();
        pool.expect_pay().times(1).returning(|_, _| Ok(()));
        let mut engine = RewardAccrual::new(config(), pool, day(0));
        engine.deposit_rewards(Wei::from(1_000_000u64), day(0));
        engine.on_credits_issued(120, day(0)).unwrap();
        engine
            .on_cluster_activated(vault(1), cluster(1), &[30, 30, 30, 30], day(0))
            .unwrap();
        engine.claim(vault(1), day(30)).unwrap();

        engine.on_credits_issued(40, day(30)).unwrap();
        engine
            .on_cluster_activated(vault(1), cluster(2), &[10, 10, 10, 10], day(30))
            .unwrap();
        let accrual = engine.vault_accrual(&vault(1)).unwrap();
        assert_eq!(accrual.cluster, cluster(2));
        assert_eq!(accrual.smallest_remaining, 10);
        assert_eq!(accrual.days_claimed, 0);
    }
}

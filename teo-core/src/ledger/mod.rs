//! Balance Ledger
//!
//! Owns the available, staked and pending-withdrawal buckets and the
//! append-only transaction log. Every balance mutation in the crate goes
//! through an `AccountSession`.
//!
//! Core invariants:
//! - No bucket is ever negative
//! - A balance change and its log entry are written in the same batch
//! - Mutations of one account are serialized by a per-account lock

mod session;

pub use session::*;

use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::{debug, info};

use crate::absorption::{TierTable, TierThreshold};
use crate::error::{TeoError, TeoResult};
use crate::storage::LedgerStore;
use crate::types::{
    AccountBalance, BalanceSnapshot, Clock, CourseId, LedgerTransaction, TransactionKind, UserId,
};

/// Optional transaction metadata
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionMeta {
    pub course_id: Option<CourseId>,
    pub reference: Option<String>,
}

impl TransactionMeta {
    pub fn course(course_id: CourseId) -> Self {
        Self {
            course_id: Some(course_id),
            reference: None,
        }
    }

    pub fn reference(reference: impl Into<String>) -> Self {
        Self {
            course_id: None,
            reference: Some(reference.into()),
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Per-account lock registry
#[derive(Debug, Default)]
pub struct AccountLocks {
    locks: Mutex<HashMap<UserId, Arc<tokio::sync::Mutex<()>>>>,
}

impl AccountLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn handle(&self, user: &UserId) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(user.clone()).or_default().clone()
    }

    /// Drop lock entries nobody holds or waits on
    pub fn prune_idle(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Balance ledger
pub struct BalanceLedger {
    store: Arc<dyn LedgerStore>,
    locks: AccountLocks,
    clock: Arc<dyn Clock>,
    tiers: TierTable,
}

impl BalanceLedger {
    /// Create a ledger
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, tiers: TierTable) -> Self {
        Self {
            store,
            locks: AccountLocks::new(),
            clock,
            tiers,
        }
    }

    /// Storage handle
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Clock handle
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Lock registry
    pub fn locks(&self) -> &AccountLocks {
        &self.locks
    }

    /// Acquire the account's lock and load its current row
    pub async fn open(&self, user: &UserId) -> TeoResult<AccountSession> {
        let guard = self.locks.handle(user).lock_owned().await;
        let now = self.clock.now();
        let balance = self
            .store
            .get_balance(user)
            .await?
            .unwrap_or_else(|| AccountBalance::new(user.clone(), now));
        Ok(AccountSession::new(guard, self.store.clone(), balance, now))
    }

    /// Add to available; returns the new available balance
    pub async fn credit(
        &self,
        user: &UserId,
        amount: Decimal,
        kind: TransactionKind,
        description: &str,
        meta: Option<TransactionMeta>,
    ) -> TeoResult<Decimal> {
        if !kind.is_credit() {
            return Err(TeoError::InvalidState {
                reason: format!("{} is not a credit kind", kind),
            });
        }
        let mut session = self.open(user).await?;
        let available = session.credit(amount, kind, description, meta.unwrap_or_default())?;
        session.commit().await?;

        info!(user = %user, amount = %amount, kind = %kind, available = %available, "ledger credit");
        Ok(available)
    }

    /// Remove from available; returns the new available balance
    pub async fn debit(
        &self,
        user: &UserId,
        amount: Decimal,
        kind: TransactionKind,
        description: &str,
        course_id: Option<CourseId>,
    ) -> TeoResult<Decimal> {
        if !kind.is_debit() {
            return Err(TeoError::InvalidState {
                reason: format!("{} is not a debit kind", kind),
            });
        }
        let mut session = self.open(user).await?;
        let meta = TransactionMeta {
            course_id,
            reference: None,
        };
        let available = session.debit(amount, kind, description, meta)?;
        session.commit().await?;

        info!(user = %user, amount = %amount, kind = %kind, available = %available, "ledger debit");
        Ok(available)
    }

    /// Move available to staked; returns the new staked balance
    pub async fn stake(&self, user: &UserId, amount: Decimal) -> TeoResult<Decimal> {
        let mut session = self.open(user).await?;
        let staked = session.stake(amount)?;
        session.commit().await?;

        info!(user = %user, amount = %amount, staked = %staked, "stake");
        Ok(staked)
    }

    /// Move staked to available; returns the new staked balance
    pub async fn unstake(&self, user: &UserId, amount: Decimal) -> TeoResult<Decimal> {
        let mut session = self.open(user).await?;
        let staked = session.unstake(amount)?;
        session.commit().await?;

        info!(user = %user, amount = %amount, staked = %staked, "unstake");
        Ok(staked)
    }

    /// Balance snapshot; zero for unknown users
    pub async fn balance(&self, user: &UserId) -> TeoResult<BalanceSnapshot> {
        Ok(self
            .store
            .get_balance(user)
            .await?
            .map(|b| b.snapshot())
            .unwrap_or_default())
    }

    /// Most recent transactions first
    pub async fn transactions(&self, user: &UserId, limit: usize) -> TeoResult<Vec<LedgerTransaction>> {
        self.store.list_transactions(user, limit).await
    }

    /// Staking tier and commission rate from the staked bucket
    pub async fn tier_for(&self, user: &UserId) -> TeoResult<TierThreshold> {
        let staked = self.balance(user).await?.staked;
        let tier = self.tiers.classify(staked);
        debug!(user = %user, staked = %staked, tier = %tier.tier, "tier resolved");
        Ok(tier)
    }

    /// Tier table
    pub fn tiers(&self) -> &TierTable {
        &self.tiers
    }
}

//! Account session
//!
//! Holds the account's exclusive lock from `open` until `commit` or drop.
//! Bucket moves and row updates are staged in memory and written as one
//! batch on commit; dropping an uncommitted session writes nothing.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tokio::sync::OwnedMutexGuard;

use super::TransactionMeta;
use crate::error::{TeoError, TeoResult};
use crate::storage::{LedgerStore, WriteBatch};
use crate::types::{
    validate_amount, AbsorptionOpportunity, AccountBalance, LedgerTransaction, TransactionKind,
    UserId, WithdrawalRequest,
};

/// Exclusive, staged view of one account
pub struct AccountSession {
    _guard: OwnedMutexGuard<()>,
    store: Arc<dyn LedgerStore>,
    balance: AccountBalance,
    batch: WriteBatch,
    balance_changed: bool,
    now: DateTime<Utc>,
}

impl AccountSession {
    pub(crate) fn new(
        guard: OwnedMutexGuard<()>,
        store: Arc<dyn LedgerStore>,
        balance: AccountBalance,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            _guard: guard,
            store,
            balance,
            batch: WriteBatch::new(),
            balance_changed: false,
            now,
        }
    }

    /// Account owner
    pub fn user(&self) -> &UserId {
        &self.balance.user
    }

    /// Balance including staged moves
    pub fn balance(&self) -> &AccountBalance {
        &self.balance
    }

    /// Time the session was opened
    pub fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Storage behind this session, for reads made under the lock
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    // ==================== Bucket moves ====================

    /// Add to available
    pub fn credit(
        &mut self,
        amount: Decimal,
        kind: TransactionKind,
        description: impl Into<String>,
        meta: TransactionMeta,
    ) -> TeoResult<Decimal> {
        validate_amount(amount)?;
        self.balance.credit_available(amount)?;
        self.record(amount, kind, description, meta);
        Ok(self.balance.available)
    }

    /// Remove from available
    pub fn debit(
        &mut self,
        amount: Decimal,
        kind: TransactionKind,
        description: impl Into<String>,
        meta: TransactionMeta,
    ) -> TeoResult<Decimal> {
        validate_amount(amount)?;
        self.balance.debit_available(amount)?;
        self.record(-amount, kind, description, meta);
        Ok(self.balance.available)
    }

    /// available -> staked
    pub fn stake(&mut self, amount: Decimal) -> TeoResult<Decimal> {
        validate_amount(amount)?;
        self.balance.stake(amount)?;
        self.record(-amount, TransactionKind::Stake, format!("Staked {} TEO", amount), TransactionMeta::default());
        Ok(self.balance.staked)
    }

    /// staked -> available
    pub fn unstake(&mut self, amount: Decimal) -> TeoResult<Decimal> {
        validate_amount(amount)?;
        self.balance.unstake(amount)?;
        self.record(amount, TransactionKind::Unstake, format!("Unstaked {} TEO", amount), TransactionMeta::default());
        Ok(self.balance.staked)
    }

    /// available -> pending_withdrawal for a new request
    pub fn reserve_withdrawal(&mut self, request: &WithdrawalRequest) -> TeoResult<()> {
        self.ensure_owner(request)?;
        self.balance.reserve_withdrawal(request.amount)?;
        self.record(
            -request.amount,
            TransactionKind::WithdrawalRequest,
            format!("Withdrawal of {} TEO to {}", request.amount, request.destination_address),
            TransactionMeta::reference(request.id.as_str()),
        );
        Ok(())
    }

    /// pending_withdrawal -> available after cancellation or failure
    pub fn release_withdrawal(&mut self, request: &WithdrawalRequest, kind: TransactionKind) -> TeoResult<()> {
        self.ensure_owner(request)?;
        if !matches!(kind, TransactionKind::WithdrawalCancelled | TransactionKind::WithdrawalFailed) {
            return Err(TeoError::InvalidState {
                reason: format!("{} cannot release a withdrawal", kind),
            });
        }
        self.balance.release_withdrawal(request.amount)?;
        let description = match kind {
            TransactionKind::WithdrawalCancelled => format!("Withdrawal {} cancelled", request.id),
            _ => format!("Withdrawal {} failed", request.id),
        };
        self.record(request.amount, kind, description, TransactionMeta::reference(request.id.as_str()));
        Ok(())
    }

    /// pending_withdrawal -> out of the ledger
    pub fn settle_withdrawal(&mut self, request: &WithdrawalRequest) -> TeoResult<()> {
        self.ensure_owner(request)?;
        self.balance.settle_withdrawal(request.amount)?;
        let reference = request
            .transaction_hash
            .clone()
            .unwrap_or_else(|| request.id.to_string());
        self.record(
            -request.amount,
            TransactionKind::WithdrawalCompleted,
            format!("Withdrawal {} completed", request.id),
            TransactionMeta::reference(reference),
        );
        Ok(())
    }

    // ==================== Rows ====================

    /// Stage a withdrawal request row
    pub fn put_withdrawal(&mut self, request: WithdrawalRequest) {
        self.batch.put_withdrawal(request);
    }

    /// Stage an opportunity row
    pub fn put_opportunity(&mut self, opportunity: AbsorptionOpportunity) {
        self.batch.put_opportunity(opportunity);
    }

    /// Write all staged changes atomically and release the lock
    pub async fn commit(mut self) -> TeoResult<AccountBalance> {
        if !self.balance.is_consistent() {
            return Err(TeoError::InvariantViolation {
                details: format!("negative bucket for {}", self.balance.user),
            });
        }
        if self.balance_changed {
            self.balance.updated_at = self.now;
            self.batch.put_balance(self.balance.clone());
        }
        let batch = std::mem::take(&mut self.batch);
        if !batch.is_empty() {
            self.store.apply(batch).await?;
        }
        Ok(self.balance)
    }

    fn ensure_owner(&self, request: &WithdrawalRequest) -> TeoResult<()> {
        if request.user != self.balance.user {
            return Err(TeoError::forbidden("withdrawal", request.id.as_str(), self.balance.user.as_str()));
        }
        Ok(())
    }

    fn record(
        &mut self,
        amount: Decimal,
        kind: TransactionKind,
        description: impl Into<String>,
        meta: TransactionMeta,
    ) {
        let mut tx = LedgerTransaction::new(
            self.balance.user.clone(),
            amount,
            kind,
            description,
            self.balance.available,
            self.now,
        )
        .with_course(meta.course_id);
        tx.reference = meta.reference;
        self.batch.append_transaction(tx);
        self.balance_changed = true;
    }
}

//! Account balance
//!
//! Three buckets per user. Every move between buckets checks that no bucket
//! goes negative before mutating anything.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::common::UserId;
use crate::error::{TeoError, TeoResult};

/// Account balance row
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Owner
    pub user: UserId,
    /// Spendable balance
    pub available: Decimal,
    /// Locked for staking
    pub staked: Decimal,
    /// Reserved by open withdrawal requests
    pub pending_withdrawal: Decimal,
    /// Last mutation
    pub updated_at: DateTime<Utc>,
}

impl AccountBalance {
    /// Create an empty balance
    pub fn new(user: UserId, now: DateTime<Utc>) -> Self {
        Self {
            user,
            available: Decimal::ZERO,
            staked: Decimal::ZERO,
            pending_withdrawal: Decimal::ZERO,
            updated_at: now,
        }
    }

    /// Sum of all buckets, saturating at `Decimal::MAX`
    pub fn total(&self) -> Decimal {
        self.available
            .saturating_add(self.staked)
            .saturating_add(self.pending_withdrawal)
    }

    /// Add to available
    pub fn credit_available(&mut self, amount: Decimal) -> TeoResult<()> {
        self.available = checked_sum(self.available, amount, "available")?;
        Ok(())
    }

    /// Remove from available
    pub fn debit_available(&mut self, amount: Decimal) -> TeoResult<()> {
        if amount > self.available {
            return Err(TeoError::InsufficientBalance {
                required: amount,
                available: self.available,
            });
        }
        self.available -= amount;
        Ok(())
    }

    /// available -> staked
    pub fn stake(&mut self, amount: Decimal) -> TeoResult<()> {
        let staked = checked_sum(self.staked, amount, "staked")?;
        self.debit_available(amount)?;
        self.staked = staked;
        Ok(())
    }

    /// staked -> available
    pub fn unstake(&mut self, amount: Decimal) -> TeoResult<()> {
        if amount > self.staked {
            return Err(TeoError::InsufficientStake {
                required: amount,
                staked: self.staked,
            });
        }
        let available = checked_sum(self.available, amount, "available")?;
        self.staked -= amount;
        self.available = available;
        Ok(())
    }

    /// available -> pending_withdrawal
    pub fn reserve_withdrawal(&mut self, amount: Decimal) -> TeoResult<()> {
        let pending = checked_sum(self.pending_withdrawal, amount, "pending_withdrawal")?;
        self.debit_available(amount)?;
        self.pending_withdrawal = pending;
        Ok(())
    }

    /// pending_withdrawal -> available
    pub fn release_withdrawal(&mut self, amount: Decimal) -> TeoResult<()> {
        let available = checked_sum(self.available, amount, "available")?;
        self.take_pending(amount)?;
        self.available = available;
        Ok(())
    }

    /// pending_withdrawal -> out of the ledger
    pub fn settle_withdrawal(&mut self, amount: Decimal) -> TeoResult<()> {
        self.take_pending(amount)
    }

    fn take_pending(&mut self, amount: Decimal) -> TeoResult<()> {
        if amount > self.pending_withdrawal {
            return Err(TeoError::InvariantViolation {
                details: format!(
                    "pending_withdrawal {} of {} is below {}",
                    self.pending_withdrawal, self.user, amount
                ),
            });
        }
        self.pending_withdrawal -= amount;
        Ok(())
    }

    /// Check that every bucket is non-negative
    pub fn is_consistent(&self) -> bool {
        self.available >= Decimal::ZERO
            && self.staked >= Decimal::ZERO
            && self.pending_withdrawal >= Decimal::ZERO
    }

    /// Read-only view
    pub fn snapshot(&self) -> BalanceSnapshot {
        BalanceSnapshot {
            available: self.available,
            staked: self.staked,
            pending_withdrawal: self.pending_withdrawal,
            total: self.total(),
        }
    }
}

fn checked_sum(current: Decimal, amount: Decimal, bucket: &str) -> TeoResult<Decimal> {
    current.checked_add(amount).ok_or_else(|| {
        TeoError::invalid_amount(format!("adding {} to {} {} overflows", amount, bucket, current))
    })
}

/// Balance snapshot returned to callers
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub available: Decimal,
    pub staked: Decimal,
    pub pending_withdrawal: Decimal,
    pub total: Decimal,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded(amount: i64) -> AccountBalance {
        let mut balance = AccountBalance::new(UserId::new("alice"), Utc::now());
        balance.credit_available(Decimal::new(amount, 0)).unwrap();
        balance
    }

    #[test]
    fn test_debit_beyond_available_leaves_balance_untouched() {
        let mut balance = funded(10);
        let err = balance.debit_available(Decimal::new(11, 0)).unwrap_err();
        assert!(matches!(err, TeoError::InsufficientBalance { .. }));
        assert_eq!(balance.available, Decimal::new(10, 0));
    }

    #[test]
    fn test_stake_and_unstake() {
        let mut balance = funded(100);
        balance.stake(Decimal::new(40, 0)).unwrap();
        assert_eq!(balance.available, Decimal::new(60, 0));
        assert_eq!(balance.staked, Decimal::new(40, 0));

        let err = balance.unstake(Decimal::new(41, 0)).unwrap_err();
        assert!(matches!(err, TeoError::InsufficientStake { .. }));

        balance.unstake(Decimal::new(40, 0)).unwrap();
        assert_eq!(balance.available, Decimal::new(100, 0));
        assert_eq!(balance.total(), Decimal::new(100, 0));
    }

    #[test]
    fn test_withdrawal_buckets() {
        let mut balance = funded(100);
        balance.reserve_withdrawal(Decimal::new(50, 0)).unwrap();
        assert_eq!(balance.total(), Decimal::new(100, 0));

        balance.settle_withdrawal(Decimal::new(20, 0)).unwrap();
        assert_eq!(balance.total(), Decimal::new(80, 0));

        balance.release_withdrawal(Decimal::new(30, 0)).unwrap();
        assert_eq!(balance.available, Decimal::new(80, 0));
        assert_eq!(balance.pending_withdrawal, Decimal::ZERO);

        assert!(matches!(
            balance.settle_withdrawal(Decimal::ONE),
            Err(TeoError::InvariantViolation { .. })
        ));
        assert!(balance.is_consistent());
    }

    #[test]
    fn test_overflowing_credit_is_rejected() {
        let mut balance = AccountBalance::new(UserId::new("whale"), Utc::now());
        balance.credit_available(Decimal::MAX).unwrap();

        let err = balance.credit_available(Decimal::ONE).unwrap_err();
        assert!(matches!(err, TeoError::InvalidAmount { .. }));
        assert_eq!(balance.available, Decimal::MAX);
    }

    #[test]
    fn test_overflowing_bucket_moves_leave_balance_untouched() {
        let mut balance = AccountBalance::new(UserId::new("whale"), Utc::now());
        balance.staked = Decimal::MAX;
        balance.credit_available(Decimal::ONE).unwrap();

        assert!(matches!(balance.stake(Decimal::ONE), Err(TeoError::InvalidAmount { .. })));
        assert_eq!(balance.available, Decimal::ONE);
        assert_eq!(balance.staked, Decimal::MAX);
        assert_eq!(balance.total(), Decimal::MAX);
    }
}

//! Ledger transactions
//!
//! One row per balance change, written in the same batch as the balance
//! it describes.
//!
//! # Core types
//!
//! - `TransactionKind`: why the balance moved, and which kinds the plain
//!   credit and debit operations accept
//! - `LedgerTransaction`: signed amount, resulting available balance and
//!   optional course and reference links
//!
//! # Rules
//!
//! - The log is append-only; rows are never rewritten
//! - `available_after` is the account's available balance right after the
//!   row's own move

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::common::{CourseId, TransactionId, UserId};

/// Transaction kind
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Reward for learning or teaching activity
    Earned,
    /// Student paid part of a course price
    SpentDiscount,
    /// Funds moved to pending for a withdrawal request
    WithdrawalRequest,
    /// Pending funds returned on cancellation
    WithdrawalCancelled,
    /// Pending funds left the ledger
    WithdrawalCompleted,
    /// Pending funds returned after a rail failure
    WithdrawalFailed,
    Stake,
    Unstake,
    /// Teacher bonus for absorbing a student discount
    DiscountAbsorption,
    Deposit,
    TestCredit,
}

impl TransactionKind {
    /// Stable name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Earned => "earned",
            Self::SpentDiscount => "spent_discount",
            Self::WithdrawalRequest => "withdrawal_request",
            Self::WithdrawalCancelled => "withdrawal_cancelled",
            Self::WithdrawalCompleted => "withdrawal_completed",
            Self::WithdrawalFailed => "withdrawal_failed",
            Self::Stake => "stake",
            Self::Unstake => "unstake",
            Self::DiscountAbsorption => "discount_absorption",
            Self::Deposit => "deposit",
            Self::TestCredit => "test_credit",
        }
    }

    /// Kinds a caller may use with a plain credit
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            Self::Earned | Self::Deposit | Self::TestCredit | Self::DiscountAbsorption
        )
    }

    /// Kinds a caller may use with a plain debit
    pub fn is_debit(&self) -> bool {
        matches!(self, Self::SpentDiscount)
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Immutable ledger entry
///
/// `amount` is the signed change to the available bucket, except for
/// `withdrawal_completed` where it is the change to pending_withdrawal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: TransactionId,
    pub user: UserId,
    pub amount: Decimal,
    pub kind: TransactionKind,
    pub description: String,
    #[serde(default)]
    pub course_id: Option<CourseId>,
    /// Withdrawal id, opportunity id or external tx hash
    #[serde(default)]
    pub reference: Option<String>,
    /// Available balance right after this entry
    pub available_after: Decimal,
    pub created_at: DateTime<Utc>,
}

impl LedgerTransaction {
    /// Create a new entry
    pub fn new(
        user: UserId,
        amount: Decimal,
        kind: TransactionKind,
        description: impl Into<String>,
        available_after: Decimal,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: TransactionId::generate(),
            user,
            amount,
            kind,
            description: description.into(),
            course_id: None,
            reference: None,
            available_after,
            created_at,
        }
    }

    /// Attach a course
    pub fn with_course(mut self, course_id: Option<CourseId>) -> Self {
        self.course_id = course_id;
        self
    }

    /// Attach a reference
    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

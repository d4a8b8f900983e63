//! Withdrawal requests
//!
//! State machine:
//! - pending → processing → completed
//! - pending → failed, processing → failed (rail failure)
//! - pending → cancelled (owner only)
//! - terminal states never change

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::common::{UserId, WithdrawalId};
use crate::error::{TeoError, TeoResult};

/// Withdrawal status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WithdrawalStatus {
    /// Funds reserved, waiting for the processor
    #[default]
    Pending,
    /// Handed to the payment rail
    Processing,
    /// Rail confirmed; funds left the ledger
    Completed,
    /// Rail rejected; funds returned
    Failed,
    /// Owner cancelled; funds returned
    Cancelled,
}

impl WithdrawalStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Whether this is a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Whether the request still holds funds in pending_withdrawal
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Pending | Self::Processing)
    }

    /// Whether the transition is allowed
    pub fn can_transition_to(&self, target: WithdrawalStatus) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Processing)
                | (Self::Pending, Self::Failed)
                | (Self::Pending, Self::Cancelled)
                | (Self::Processing, Self::Completed)
                | (Self::Processing, Self::Failed)
        )
    }
}

impl std::fmt::Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Caller metadata kept for audit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditContext {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl AuditContext {
    pub fn new(ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip_address: Some(ip_address.into()),
            user_agent: Some(user_agent.into()),
        }
    }
}

/// Confirmation returned by the payment rail
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RailReceipt {
    /// External transaction hash
    pub transaction_hash: String,
}

impl RailReceipt {
    pub fn new(transaction_hash: impl Into<String>) -> Self {
        Self {
            transaction_hash: transaction_hash.into(),
        }
    }
}

/// Withdrawal request row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalRequest {
    pub id: WithdrawalId,
    pub user: UserId,
    pub amount: Decimal,
    pub destination_address: String,
    pub status: WithdrawalStatus,
    /// Position of this request among the owner's requests that UTC day
    pub daily_withdrawal_count: u32,
    #[serde(default)]
    pub audit: AuditContext,
    #[serde(default)]
    pub transaction_hash: Option<String>,
    #[serde(default)]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub processed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl WithdrawalRequest {
    /// Create a pending request
    pub fn new(
        user: UserId,
        amount: Decimal,
        destination_address: impl Into<String>,
        daily_withdrawal_count: u32,
        audit: AuditContext,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: WithdrawalId::generate(),
            user,
            amount,
            destination_address: destination_address.into(),
            status: WithdrawalStatus::Pending,
            daily_withdrawal_count,
            audit,
            transaction_hash: None,
            error_message: None,
            created_at,
            processed_at: None,
            completed_at: None,
        }
    }

    /// Transition status
    pub fn transition_to(&mut self, target: WithdrawalStatus) -> TeoResult<()> {
        if !self.status.can_transition_to(target) {
            return Err(TeoError::InvalidTransition {
                entity: "withdrawal".to_string(),
                id: self.id.to_string(),
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        self.status = target;
        Ok(())
    }

    /// Mark as handed to the rail
    pub fn mark_processing(&mut self, now: DateTime<Utc>) -> TeoResult<()> {
        self.transition_to(WithdrawalStatus::Processing)?;
        self.processed_at = Some(now);
        Ok(())
    }

    /// Mark as confirmed by the rail
    pub fn mark_completed(&mut self, receipt: &RailReceipt, now: DateTime<Utc>) -> TeoResult<()> {
        self.transition_to(WithdrawalStatus::Completed)?;
        self.transaction_hash = Some(receipt.transaction_hash.clone());
        self.completed_at = Some(now);
        Ok(())
    }

    /// Mark as failed
    pub fn mark_failed(&mut self, reason: impl Into<String>, now: DateTime<Utc>) -> TeoResult<()> {
        self.transition_to(WithdrawalStatus::Failed)?;
        self.error_message = Some(reason.into());
        if self.processed_at.is_none() {
            self.processed_at = Some(now);
        }
        Ok(())
    }

    /// Mark as cancelled
    pub fn mark_cancelled(&mut self) -> TeoResult<()> {
        self.transition_to(WithdrawalStatus::Cancelled)
    }

    /// Whether the request has sat in processing for longer than `threshold`
    pub fn is_stale_processing(&self, now: DateTime<Utc>, threshold: Duration) -> bool {
        self.status == WithdrawalStatus::Processing
            && self.processed_at.map_or(true, |since| now - since > threshold)
    }

    /// Whether the request counts toward the daily amount cap
    pub fn counts_toward_daily_amount(&self) -> bool {
        self.status != WithdrawalStatus::Cancelled
    }
}

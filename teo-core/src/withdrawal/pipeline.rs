//! Withdrawal pipeline
//!
//! Every transition runs inside the owner's account session, so limit
//! checks, the bucket move, the log entry and the request row are one
//! atomic unit and two transitions of the same request cannot interleave.

use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::limits::{check_range, check_usage, DailyUsage};
use crate::config::WithdrawalLimits;
use crate::error::{TeoError, TeoResult};
use crate::ledger::{AccountSession, BalanceLedger};
use crate::ports::PaymentRail;
use crate::types::{
    validate_amount, AuditContext, RailReceipt, TransactionKind, UserId, WithdrawalId,
    WithdrawalRequest, WithdrawalStatus,
};

/// Withdrawal pipeline
pub struct WithdrawalPipeline {
    ledger: Arc<BalanceLedger>,
    rail: Arc<dyn PaymentRail>,
    limits: WithdrawalLimits,
}

impl WithdrawalPipeline {
    pub fn new(ledger: Arc<BalanceLedger>, rail: Arc<dyn PaymentRail>, limits: WithdrawalLimits) -> Self {
        Self { ledger, rail, limits }
    }

    pub fn limits(&self) -> &WithdrawalLimits {
        &self.limits
    }

    pub fn ledger(&self) -> &Arc<BalanceLedger> {
        &self.ledger
    }

    /// Validate and open a withdrawal request
    pub async fn create_request(
        &self,
        user: &UserId,
        amount: Decimal,
        destination_address: &str,
        audit: AuditContext,
    ) -> TeoResult<WithdrawalRequest> {
        validate_amount(amount)?;
        check_range(&self.limits, amount)?;
        if !self.rail.validate_address(destination_address) {
            return Err(TeoError::InvalidAddress {
                address: destination_address.to_string(),
            });
        }

        let mut session = self.ledger.open(user).await?;
        let existing = session.store().list_withdrawals_for_user(user).await?;
        let usage = DailyUsage::compute(&existing, session.now());
        if let Err(e) = check_usage(&self.limits, &usage, amount) {
            debug!(user = %user, amount = %amount, error = %e, "withdrawal limit reached");
            return Err(e);
        }

        let request = WithdrawalRequest::new(
            user.clone(),
            amount,
            destination_address,
            usage.count + 1,
            audit,
            session.now(),
        );
        session.reserve_withdrawal(&request)?;
        session.put_withdrawal(request.clone());
        session.commit().await?;

        info!(
            request_id = %request.id,
            user = %user,
            amount = %amount,
            daily_count = request.daily_withdrawal_count,
            "withdrawal requested"
        );
        Ok(request)
    }

    /// Cancel a pending request; owner only
    pub async fn cancel(&self, request_id: &WithdrawalId, user: &UserId) -> TeoResult<WithdrawalRequest> {
        let owner = self.owner_of(request_id).await?;
        if &owner != user {
            warn!(request_id = %request_id, user = %user, "cancel attempted by non-owner");
            return Err(TeoError::forbidden("withdrawal", request_id.as_str(), user.as_str()));
        }

        let (mut session, mut request) = self.lock_request(request_id, &owner).await?;
        if request.status != WithdrawalStatus::Pending {
            return Err(TeoError::CannotCancel {
                id: request_id.to_string(),
                status: request.status.to_string(),
            });
        }
        request.mark_cancelled()?;
        session.release_withdrawal(&request, TransactionKind::WithdrawalCancelled)?;
        session.put_withdrawal(request.clone());
        session.commit().await?;

        info!(request_id = %request_id, user = %user, amount = %request.amount, "withdrawal cancelled");
        Ok(request)
    }

    /// pending → processing
    pub async fn begin_processing(&self, request_id: &WithdrawalId) -> TeoResult<WithdrawalRequest> {
        let owner = self.owner_of(request_id).await?;
        let (mut session, mut request) = self.lock_request(request_id, &owner).await?;
        request.mark_processing(session.now())?;
        session.put_withdrawal(request.clone());
        session.commit().await?;

        debug!(request_id = %request_id, "withdrawal processing");
        Ok(request)
    }

    /// processing → completed; repeated calls return the stored request
    pub async fn complete(&self, request_id: &WithdrawalId, receipt: RailReceipt) -> TeoResult<WithdrawalRequest> {
        let owner = self.owner_of(request_id).await?;
        let (mut session, mut request) = self.lock_request(request_id, &owner).await?;
        if request.status == WithdrawalStatus::Completed {
            debug!(request_id = %request_id, "withdrawal already completed");
            return Ok(request);
        }
        request.mark_completed(&receipt, session.now())?;
        session.settle_withdrawal(&request)?;
        session.put_withdrawal(request.clone());
        session.commit().await?;

        info!(
            request_id = %request_id,
            user = %owner,
            amount = %request.amount,
            tx_hash = %receipt.transaction_hash,
            "withdrawal completed"
        );
        Ok(request)
    }

    /// pending|processing → failed, funds returned; repeated calls return the stored request
    pub async fn fail(&self, request_id: &WithdrawalId, reason: &str) -> TeoResult<WithdrawalRequest> {
        let owner = self.owner_of(request_id).await?;
        let (mut session, mut request) = self.lock_request(request_id, &owner).await?;
        if request.status == WithdrawalStatus::Failed {
            debug!(request_id = %request_id, "withdrawal already failed");
            return Ok(request);
        }
        request.mark_failed(reason, session.now())?;
        session.release_withdrawal(&request, TransactionKind::WithdrawalFailed)?;
        session.put_withdrawal(request.clone());
        session.commit().await?;

        warn!(request_id = %request_id, user = %owner, amount = %request.amount, reason, "withdrawal failed");
        Ok(request)
    }

    /// Get a request
    pub async fn get(&self, request_id: &WithdrawalId) -> TeoResult<WithdrawalRequest> {
        self.ledger
            .store()
            .get_withdrawal(request_id)
            .await?
            .ok_or_else(|| TeoError::not_found("withdrawal", request_id.as_str()))
    }

    /// All requests of a user, oldest first
    pub async fn list_for_user(&self, user: &UserId) -> TeoResult<Vec<WithdrawalRequest>> {
        self.ledger.store().list_withdrawals_for_user(user).await
    }

    /// Current UTC-day usage
    pub async fn daily_usage(&self, user: &UserId) -> TeoResult<DailyUsage> {
        let requests = self.list_for_user(user).await?;
        Ok(DailyUsage::compute(&requests, self.ledger.clock().now()))
    }

    async fn owner_of(&self, request_id: &WithdrawalId) -> TeoResult<UserId> {
        Ok(self.get(request_id).await?.user)
    }

    /// Open the owner's session and re-read the request under the lock
    async fn lock_request(
        &self,
        request_id: &WithdrawalId,
        owner: &UserId,
    ) -> TeoResult<(AccountSession, WithdrawalRequest)> {
        let session = self.ledger.open(owner).await?;
        let request = session
            .store()
            .get_withdrawal(request_id)
            .await?
            .ok_or_else(|| TeoError::not_found("withdrawal", request_id.as_str()))?;
        Ok((session, request))
    }
}

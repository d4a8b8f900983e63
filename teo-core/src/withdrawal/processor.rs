//! Withdrawal processor
//!
//! Drains pending requests: begin processing under the account lock, call
//! the payment rail with no lock held, then complete or fail under the lock
//! again. Requests left in processing past a threshold are re-driven
//! through the rail.

use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use super::pipeline::WithdrawalPipeline;
use crate::error::{TeoError, TeoResult};
use crate::ports::{notify_best_effort, NotificationCategory, Notifier, PaymentRail};
use crate::storage::LedgerStore;
use crate::types::{WithdrawalId, WithdrawalRequest, WithdrawalStatus};

/// Outcome of one processing pass
#[derive(Debug, Clone, Default)]
pub struct ProcessingReport {
    /// Requests picked up
    pub picked: usize,
    pub completed: Vec<WithdrawalId>,
    pub failed: Vec<WithdrawalId>,
    /// Requests that changed state before this pass reached them
    pub skipped: Vec<WithdrawalId>,
    /// Requests left untouched because of an internal error
    pub errors: Vec<(WithdrawalId, String)>,
}

impl ProcessingReport {
    fn record(&mut self, request_id: WithdrawalId, result: TeoResult<ProcessOutcome>) {
        match result {
            Ok(ProcessOutcome::Completed(req)) => self.completed.push(req.id),
            Ok(ProcessOutcome::Failed(req)) => self.failed.push(req.id),
            Err(TeoError::InvalidTransition { .. }) => {
                debug!(request_id = %request_id, "withdrawal moved on before processing");
                self.skipped.push(request_id);
            }
            Err(e) => {
                error!(request_id = %request_id, error = %e, "withdrawal processing error");
                self.errors.push((request_id, e.to_string()));
            }
        }
    }

    pub fn completed_count(&self) -> usize {
        self.completed.len()
    }

    pub fn failed_count(&self) -> usize {
        self.failed.len()
    }
}

/// Outcome for a single request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    Completed(WithdrawalRequest),
    Failed(WithdrawalRequest),
}

/// Withdrawal processor
pub struct WithdrawalProcessor {
    pipeline: Arc<WithdrawalPipeline>,
    store: Arc<dyn LedgerStore>,
    rail: Arc<dyn PaymentRail>,
    notifier: Arc<dyn Notifier>,
}

impl WithdrawalProcessor {
    pub fn new(
        pipeline: Arc<WithdrawalPipeline>,
        store: Arc<dyn LedgerStore>,
        rail: Arc<dyn PaymentRail>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            pipeline,
            store,
            rail,
            notifier,
        }
    }

    /// Process up to `batch_size` pending requests, oldest first
    pub async fn process_pending(&self, batch_size: usize) -> TeoResult<ProcessingReport> {
        let pending = self
            .store
            .list_withdrawals_by_status(WithdrawalStatus::Pending, batch_size)
            .await?;
        let mut report = ProcessingReport {
            picked: pending.len(),
            ..ProcessingReport::default()
        };

        for request in pending {
            let result = self.process_one(&request.id).await;
            report.record(request.id, result);
        }

        if report.picked > 0 {
            info!(
                picked = report.picked,
                completed = report.completed.len(),
                failed = report.failed.len(),
                skipped = report.skipped.len(),
                errors = report.errors.len(),
                "withdrawal pass finished"
            );
        }
        Ok(report)
    }

    /// Re-drive requests left in processing for longer than `stale_after`
    ///
    /// Covers a crash between handing a request to the rail and recording
    /// the outcome. The rail is called again, so it must tolerate a repeated
    /// transfer for the same request.
    pub async fn recover_stale(&self, stale_after: Duration, batch_size: usize) -> TeoResult<ProcessingReport> {
        let now = self.pipeline.ledger().clock().now();
        let stale: Vec<WithdrawalRequest> = self
            .store
            .list_withdrawals_by_status(WithdrawalStatus::Processing, batch_size)
            .await?
            .into_iter()
            .filter(|request| request.is_stale_processing(now, stale_after))
            .collect();
        let mut report = ProcessingReport {
            picked: stale.len(),
            ..ProcessingReport::default()
        };

        for request in stale {
            warn!(
                request_id = %request.id,
                processed_at = ?request.processed_at,
                "re-driving stale withdrawal"
            );
            let id = request.id.clone();
            let result = self.settle(request).await;
            report.record(id, result);
        }

        if report.picked > 0 {
            info!(
                picked = report.picked,
                completed = report.completed.len(),
                failed = report.failed.len(),
                errors = report.errors.len(),
                "stale withdrawal recovery finished"
            );
        }
        Ok(report)
    }

    /// Drive one pending request to a terminal state
    pub async fn process_one(&self, request_id: &WithdrawalId) -> TeoResult<ProcessOutcome> {
        let request = self.pipeline.begin_processing(request_id).await?;
        self.settle(request).await
    }

    /// Hand a processing request to the rail and record the outcome
    async fn settle(&self, request: WithdrawalRequest) -> TeoResult<ProcessOutcome> {
        let request_id = &request.id;
        match self
            .rail
            .mint_or_transfer(&request.destination_address, request.amount)
            .await
        {
            Ok(receipt) => {
                let completed = self.pipeline.complete(request_id, receipt).await?;
                notify_best_effort(
                    self.notifier.as_ref(),
                    &completed.user,
                    NotificationCategory::WithdrawalCompleted,
                    json!({
                        "request_id": completed.id.as_str(),
                        "amount": completed.amount.to_string(),
                        "transaction_hash": completed.transaction_hash,
                    }),
                )
                .await;
                Ok(ProcessOutcome::Completed(completed))
            }
            Err(e) => {
                if !matches!(e, TeoError::ExternalRailFailure { .. }) {
                    warn!(request_id = %request_id, error = %e, "unexpected rail error, failing request");
                }
                let failed = self.pipeline.fail(request_id, &e.to_string()).await?;
                notify_best_effort(
                    self.notifier.as_ref(),
                    &failed.user,
                    NotificationCategory::WithdrawalFailed,
                    json!({
                        "request_id": failed.id.as_str(),
                        "amount": failed.amount.to_string(),
                        "reason": failed.error_message,
                    }),
                )
                .await;
                Ok(ProcessOutcome::Failed(failed))
            }
        }
    }
}

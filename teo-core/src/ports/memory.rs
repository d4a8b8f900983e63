//! In-memory collaborators
//!
//! Used by tests and development wiring.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use teo_signer::Address;
use tokio::sync::RwLock;

use super::{AccountDirectory, EnrollmentCollaborator, NotificationCategory, Notifier, PaymentRail};
use crate::error::{TeoError, TeoResult};
use crate::types::{CourseId, RailReceipt, UserId};

/// Directory backed by a map
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    wallets: RwLock<HashMap<UserId, Address>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Link a wallet to a user
    pub async fn link(&self, user: UserId, wallet: Address) {
        self.wallets.write().await.insert(user, wallet);
    }

    /// Remove a link
    pub async fn unlink(&self, user: &UserId) {
        self.wallets.write().await.remove(user);
    }
}

#[async_trait]
impl AccountDirectory for InMemoryDirectory {
    async fn resolve_wallet(&self, user: &UserId) -> TeoResult<Address> {
        self.wallets
            .read()
            .await
            .get(user)
            .copied()
            .ok_or_else(|| TeoError::NotLinked {
                user: user.to_string(),
            })
    }
}

/// A transfer the mock rail accepted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RailTransfer {
    pub destination: String,
    pub amount: Decimal,
    pub transaction_hash: String,
}

/// Payment rail that records transfers and can be told to fail
#[derive(Debug, Default)]
pub struct MockPaymentRail {
    transfers: RwLock<Vec<RailTransfer>>,
    failures_remaining: AtomicUsize,
    fail_always: AtomicBool,
    sequence: AtomicU64,
}

impl MockPaymentRail {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject the next `count` transfers
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Reject every transfer until turned off
    pub fn set_fail_always(&self, fail: bool) {
        self.fail_always.store(fail, Ordering::SeqCst);
    }

    /// Accepted transfers in order
    pub async fn transfers(&self) -> Vec<RailTransfer> {
        self.transfers.read().await.clone()
    }

    fn should_fail(&self) -> bool {
        if self.fail_always.load(Ordering::SeqCst) {
            return true;
        }
        self.failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl PaymentRail for MockPaymentRail {
    async fn mint_or_transfer(&self, destination: &str, amount: Decimal) -> TeoResult<RailReceipt> {
        if self.should_fail() {
            return Err(TeoError::ExternalRailFailure {
                reason: format!("transfer of {} to {} rejected", amount, destination),
            });
        }
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let transaction_hash = format!("0x{:064x}", seq);
        self.transfers.write().await.push(RailTransfer {
            destination: destination.to_string(),
            amount,
            transaction_hash: transaction_hash.clone(),
        });
        Ok(RailReceipt::new(transaction_hash))
    }

    async fn balance_of(&self, address: &str) -> TeoResult<Decimal> {
        Ok(self
            .transfers
            .read()
            .await
            .iter()
            .filter(|t| t.destination.eq_ignore_ascii_case(address))
            .map(|t| t.amount)
            .sum())
    }
}

/// A delivered notification
#[derive(Debug, Clone, PartialEq)]
pub struct SentNotification {
    pub user: UserId,
    pub category: NotificationCategory,
    pub payload: serde_json::Value,
}

/// Notifier that records messages
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: RwLock<Vec<SentNotification>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every delivery fail
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<SentNotification> {
        self.sent.read().await.clone()
    }

    /// Messages of one category
    pub async fn sent_with(&self, category: NotificationCategory) -> Vec<SentNotification> {
        self.sent
            .read()
            .await
            .iter()
            .filter(|n| n.category == category)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        user: &UserId,
        category: NotificationCategory,
        payload: serde_json::Value,
    ) -> TeoResult<()> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TeoError::InvalidState {
                reason: "notification channel unavailable".to_string(),
            });
        }
        self.sent.write().await.push(SentNotification {
            user: user.clone(),
            category,
            payload,
        });
        Ok(())
    }
}

/// A redemption reported to the enrollment side
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub student: UserId,
    pub course: CourseId,
    pub teo_amount: Decimal,
}

/// Enrollment collaborator that records redemptions
#[derive(Debug, Default)]
pub struct RecordingEnrollment {
    redemptions: RwLock<Vec<Redemption>>,
}

impl RecordingEnrollment {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn redemptions(&self) -> Vec<Redemption> {
        self.redemptions.read().await.clone()
    }
}

#[async_trait]
impl EnrollmentCollaborator for RecordingEnrollment {
    async fn discount_redeemed(&self, student: &UserId, course: CourseId, teo_amount: Decimal) -> TeoResult<()> {
        self.redemptions.write().await.push(Redemption {
            student: student.clone(),
            course,
            teo_amount,
        });
        Ok(())
    }
}

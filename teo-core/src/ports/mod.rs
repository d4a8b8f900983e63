//! External collaborators
//!
//! The core reaches the outside world only through these traits:
//! - `AccountDirectory`: user → linked wallet
//! - `PaymentRail`: moves value on the external token network
//! - `Notifier`: asynchronous user messages
//! - `EnrollmentCollaborator`: grants course access after a redemption
//!
//! Notifier and enrollment failures are logged and never roll back ledger
//! state.

pub mod memory;

pub use memory::*;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use teo_signer::Address;
use tracing::warn;

use crate::error::TeoResult;
use crate::types::{CourseId, RailReceipt, UserId};

/// Resolves users to wallet addresses
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    /// Linked wallet, or `NotLinked`
    async fn resolve_wallet(&self, user: &UserId) -> TeoResult<Address>;
}

/// External token network
#[async_trait]
pub trait PaymentRail: Send + Sync {
    /// Mint or transfer `amount` to `destination`; `ExternalRailFailure` on rejection
    async fn mint_or_transfer(&self, destination: &str, amount: Decimal) -> TeoResult<RailReceipt>;

    /// On-chain balance of an address
    async fn balance_of(&self, address: &str) -> TeoResult<Decimal>;

    /// Whether the rail accepts the address syntax
    fn validate_address(&self, address: &str) -> bool {
        is_hex_address(address)
    }
}

/// `0x` followed by 40 hex digits
pub fn is_hex_address(address: &str) -> bool {
    address.len() == 42
        && address.starts_with("0x")
        && address[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// Notification category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationCategory {
    /// Teacher is asked to decide
    AbsorptionOpportunity,
    /// Student is told the teacher absorbed the discount
    AbsorptionAbsorbed,
    /// Student is told the teacher refused
    AbsorptionRefused,
    /// Teacher is told the window closed
    AbsorptionExpired,
    WithdrawalCompleted,
    WithdrawalFailed,
}

impl NotificationCategory {
    pub fn name(&self) -> &'static str {
        match self {
            Self::AbsorptionOpportunity => "absorption_opportunity",
            Self::AbsorptionAbsorbed => "absorption_absorbed",
            Self::AbsorptionRefused => "absorption_refused",
            Self::AbsorptionExpired => "absorption_expired",
            Self::WithdrawalCompleted => "withdrawal_completed",
            Self::WithdrawalFailed => "withdrawal_failed",
        }
    }
}

/// Delivers user messages
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        user: &UserId,
        category: NotificationCategory,
        payload: serde_json::Value,
    ) -> TeoResult<()>;
}

/// Course access side of a discount redemption
#[async_trait]
pub trait EnrollmentCollaborator: Send + Sync {
    async fn discount_redeemed(&self, student: &UserId, course: CourseId, teo_amount: Decimal) -> TeoResult<()>;
}

/// Send a notification, logging instead of propagating failure
pub async fn notify_best_effort(
    notifier: &dyn Notifier,
    user: &UserId,
    category: NotificationCategory,
    payload: serde_json::Value,
) {
    if let Err(e) = notifier.notify(user, category, payload).await {
        warn!(user = %user, category = category.name(), error = %e, "notification failed");
    }
}

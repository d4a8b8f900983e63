//! TeoCoin Core
//!
//! Custodial reward-token economy for an education platform: an off-chain
//! balance ledger that users earn into, spend from and stake from, a
//! withdrawal pipeline that moves balance out through an external payment
//! rail, and a discount absorption engine that lets teachers trade the fiat
//! commission of a discounted sale for the student's TEO plus a bonus.
//!
//! # Architecture
//!
//! - **Balance Ledger**: per-user buckets (available, staked,
//!   pending_withdrawal) and an append-only transaction log, mutated through
//!   per-account sessions that commit atomically
//! - **Withdrawal Pipeline**: request validation, daily and concurrency
//!   limits, reservation and the pending → processing → completed | failed
//!   lifecycle; the processor drives the payment rail
//! - **Discount Absorption Engine**: tiered commission rates and the
//!   teacher's time-boxed absorb/refuse decision
//! - **Authorized Executor**: executes stake, unstake and discount
//!   redemptions approved by wallet signature (`teo_signer`)
//! - **Ports**: payment rail, notifier, account directory and enrollment
//!   collaborators, with in-memory doubles
//!
//! # Usage
//!
//! ```rust,ignore
//! use teo_core::{TeoConfig, TeoService, TransactionKind, UserId};
//!
//! let service = TeoService::builder()
//!     .config(TeoConfig::development())
//!     .payment_rail(rail)
//!     .notifier(notifier)
//!     .directory(directory)
//!     .enrollment(enrollment)
//!     .build()
//!     .await?;
//!
//! let user = UserId::new("alice");
//! service.ledger().credit(&user, amount, TransactionKind::Earned, "lesson reward", None).await?;
//! ```

pub mod absorption;
pub mod authorization;
pub mod config;
pub mod error;
pub mod ledger;
pub mod ports;
pub mod service;
pub mod storage;
pub mod types;
pub mod withdrawal;

pub use absorption::{AbsorptionEngine, OpportunityRequest, TierTable, TierThreshold};
pub use authorization::{AuthorizedCall, AuthorizedExecutor, ExecutionOutcome, ExecutionResult};
pub use config::{AbsorptionConfig, RunnerConfig, TeoConfig, WithdrawalLimits};
pub use error::{ErrorKind, TeoError, TeoResult};
pub use ledger::{AccountSession, BalanceLedger, TransactionMeta};
pub use ports::{AccountDirectory, EnrollmentCollaborator, NotificationCategory, Notifier, PaymentRail};
pub use service::{ServiceStats, ServiceStatus, TeoService, TeoServiceBuilder};
pub use storage::{LedgerStore, MemoryStorage, SledStorage, StorageConfig};
pub use types::*;
pub use withdrawal::{DailyUsage, ProcessingReport, WithdrawalPipeline, WithdrawalProcessor};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

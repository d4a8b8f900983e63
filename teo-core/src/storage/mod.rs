//! Ledger storage
//!
//! Persistence for balances, the transaction log, withdrawal requests and
//! absorption opportunities.
//!
//! # Design
//!
//! - Every mutation reaches storage as one `WriteBatch`; a batch is applied
//!   atomically or not at all
//! - The transaction log is append-only
//! - Callers serialize writes per account; storage only guarantees batch
//!   atomicity

pub mod memory;
pub mod sled;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TeoResult;
use crate::types::{
    AbsorptionOpportunity, AbsorptionStatus, AccountBalance, LedgerTransaction, OpportunityId,
    UserId, WithdrawalId, WithdrawalRequest, WithdrawalStatus,
};

/// Rows written together
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    pub balances: Vec<AccountBalance>,
    pub transactions: Vec<LedgerTransaction>,
    pub withdrawals: Vec<WithdrawalRequest>,
    pub opportunities: Vec<AbsorptionOpportunity>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_balance(&mut self, balance: AccountBalance) {
        self.balances.push(balance);
    }

    pub fn append_transaction(&mut self, tx: LedgerTransaction) {
        self.transactions.push(tx);
    }

    pub fn put_withdrawal(&mut self, request: WithdrawalRequest) {
        self.withdrawals.push(request);
    }

    pub fn put_opportunity(&mut self, opportunity: AbsorptionOpportunity) {
        self.opportunities.push(opportunity);
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
            && self.transactions.is_empty()
            && self.withdrawals.is_empty()
            && self.opportunities.is_empty()
    }
}

/// Ledger storage interface
#[async_trait]
pub trait LedgerStore: Send + Sync {
    // ==================== Balances ====================

    /// Get a balance row
    async fn get_balance(&self, user: &UserId) -> TeoResult<Option<AccountBalance>>;

    // ==================== Transactions ====================

    /// Most recent transactions first
    async fn list_transactions(&self, user: &UserId, limit: usize) -> TeoResult<Vec<LedgerTransaction>>;

    // ==================== Withdrawals ====================

    /// Get a withdrawal request
    async fn get_withdrawal(&self, id: &WithdrawalId) -> TeoResult<Option<WithdrawalRequest>>;

    /// All requests of a user, oldest first
    async fn list_withdrawals_for_user(&self, user: &UserId) -> TeoResult<Vec<WithdrawalRequest>>;

    /// Requests in a status, oldest first
    async fn list_withdrawals_by_status(
        &self,
        status: WithdrawalStatus,
        limit: usize,
    ) -> TeoResult<Vec<WithdrawalRequest>>;

    // ==================== Opportunities ====================

    /// Get an opportunity
    async fn get_opportunity(&self, id: &OpportunityId) -> TeoResult<Option<AbsorptionOpportunity>>;

    /// Opportunities of a teacher, optionally filtered by status, oldest first
    async fn list_opportunities_for_teacher(
        &self,
        teacher: &UserId,
        status: Option<AbsorptionStatus>,
    ) -> TeoResult<Vec<AbsorptionOpportunity>>;

    /// Pending opportunities whose window closed before `now`
    async fn list_expired_opportunities(&self, now: DateTime<Utc>) -> TeoResult<Vec<AbsorptionOpportunity>>;

    // ==================== Writes ====================

    /// Apply a batch atomically
    async fn apply(&self, batch: WriteBatch) -> TeoResult<()>;

    /// Statistics
    async fn get_stats(&self) -> TeoResult<StorageStats>;
}

/// Storage statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageStats {
    pub accounts: u64,
    pub transactions: u64,
    pub withdrawals: u64,
    pub open_withdrawals: u64,
    pub opportunities: u64,
    pub pending_opportunities: u64,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Data directory; empty selects in-memory storage
    pub data_dir: String,
    /// Sled page cache size in bytes
    #[serde(default = "default_cache_size")]
    pub cache_size: u64,
    /// Flush to disk after every batch
    #[serde(default)]
    pub flush_every_write: bool,
}

fn default_cache_size() -> u64 {
    64 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./teo_data".to_string(),
            cache_size: default_cache_size(),
            flush_every_write: true,
        }
    }
}

impl StorageConfig {
    /// Development configuration
    pub fn development() -> Self {
        Self {
            data_dir: "./teo_dev_data".to_string(),
            cache_size: 16 * 1024 * 1024,
            flush_every_write: false,
        }
    }

    /// Test configuration (in-memory)
    pub fn test() -> Self {
        Self {
            data_dir: String::new(),
            cache_size: 4 * 1024 * 1024,
            flush_every_write: false,
        }
    }

    /// Whether this selects in-memory storage
    pub fn is_memory(&self) -> bool {
        self.data_dir.is_empty()
    }
}

pub use memory::MemoryStorage;
pub use self::sled::SledStorage;

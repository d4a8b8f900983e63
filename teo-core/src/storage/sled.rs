//! Sled persistent storage
//!
//! Values are JSON. Each `WriteBatch` is one multi-tree sled transaction,
//! and the secondary indexes are rewritten inside that same transaction.
//!
//! Key layout:
//! - `balances`: user
//! - `transactions`: user ‖ 0xff ‖ seq (big-endian u64)
//! - `withdrawals`: request id
//! - `withdrawals_by_user`: user ‖ 0xff ‖ request id
//! - `withdrawals_by_status`: status ‖ 0xff ‖ created_at ‖ request id
//! - `opportunities`: opportunity id
//! - `opportunities_by_teacher`: teacher ‖ 0xff ‖ opportunity id
//! - `pending_opportunities_by_expiry`: expires_at ‖ opportunity id, pending rows only
//!
//! 0xff never occurs in UTF-8, so a user prefix cannot collide with another.
//! Timestamps are 8-byte big-endian microseconds with the sign bit flipped,
//! so byte order is time order.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{de::DeserializeOwned, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::Transactional;
use std::path::Path;
use tracing::{debug, info};

use super::{LedgerStore, StorageConfig, StorageStats, WriteBatch};
use crate::error::{TeoError, TeoResult};
use crate::types::{
    AbsorptionOpportunity, AbsorptionStatus, AccountBalance, LedgerTransaction, OpportunityId,
    UserId, WithdrawalId, WithdrawalRequest, WithdrawalStatus,
};

const BALANCES_TREE: &str = "balances";
const TRANSACTIONS_TREE: &str = "transactions";
const WITHDRAWALS_TREE: &str = "withdrawals";
const WITHDRAWALS_BY_USER_TREE: &str = "withdrawals_by_user";
const WITHDRAWALS_BY_STATUS_TREE: &str = "withdrawals_by_status";
const OPPORTUNITIES_TREE: &str = "opportunities";
const OPPORTUNITIES_BY_TEACHER_TREE: &str = "opportunities_by_teacher";
const PENDING_BY_EXPIRY_TREE: &str = "pending_opportunities_by_expiry";

const KEY_SEPARATOR: u8 = 0xff;
const TIME_KEY_LEN: usize = 8;

type Entries = Vec<(Vec<u8>, Vec<u8>)>;

/// A row plus the index keys it should own after the write
struct IndexedRow {
    key: Vec<u8>,
    value: Vec<u8>,
    owner_key: Vec<u8>,
    /// Status or expiry key; `None` when the row leaves the index
    ordered_key: Option<Vec<u8>>,
}

/// Sled persistent storage
#[derive(Debug, Clone)]
pub struct SledStorage {
    db: sled::Db,
    balances: sled::Tree,
    transactions: sled::Tree,
    withdrawals: sled::Tree,
    withdrawals_by_user: sled::Tree,
    withdrawals_by_status: sled::Tree,
    opportunities: sled::Tree,
    opportunities_by_teacher: sled::Tree,
    pending_by_expiry: sled::Tree,
    flush_every_write: bool,
}

impl SledStorage {
    /// Open using configuration
    pub fn new(config: &StorageConfig) -> TeoResult<Self> {
        let db = sled::Config::new()
            .path(&config.data_dir)
            .cache_capacity(config.cache_size)
            .open()
            .map_err(|e| TeoError::Storage(format!("Failed to open sled db: {}", e)))?;
        let mut storage = Self::from_db(db)?;
        storage.flush_every_write = config.flush_every_write;
        Ok(storage)
    }

    /// Open or create a database at `path`
    pub fn open<P: AsRef<Path>>(path: P) -> TeoResult<Self> {
        let db = sled::open(path).map_err(|e| TeoError::Storage(format!("Failed to open sled db: {}", e)))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> TeoResult<Self> {
        let open = |name: &str| {
            db.open_tree(name)
                .map_err(|e| TeoError::Storage(format!("Failed to open {} tree: {}", name, e)))
        };
        let storage = Self {
            balances: open(BALANCES_TREE)?,
            transactions: open(TRANSACTIONS_TREE)?,
            withdrawals: open(WITHDRAWALS_TREE)?,
            withdrawals_by_user: open(WITHDRAWALS_BY_USER_TREE)?,
            withdrawals_by_status: open(WITHDRAWALS_BY_STATUS_TREE)?,
            opportunities: open(OPPORTUNITIES_TREE)?,
            opportunities_by_teacher: open(OPPORTUNITIES_BY_TEACHER_TREE)?,
            pending_by_expiry: open(PENDING_BY_EXPIRY_TREE)?,
            db,
            flush_every_write: false,
        };
        storage.backfill_ordered_indexes()?;
        Ok(storage)
    }

    /// Flush to disk
    pub fn flush(&self) -> TeoResult<()> {
        self.db
            .flush()
            .map_err(|e| TeoError::Storage(format!("Failed to flush db: {}", e)))?;
        Ok(())
    }

    /// Build the status and expiry indexes for a database written before they existed
    fn backfill_ordered_indexes(&self) -> TeoResult<()> {
        if self.withdrawals_by_status.is_empty() && !self.withdrawals.is_empty() {
            let rows: Vec<WithdrawalRequest> = Self::load_all(&self.withdrawals)?;
            for request in &rows {
                self.withdrawals_by_status.insert(Self::status_key(request), &[] as &[u8])?;
            }
            info!(rows = rows.len(), "withdrawal status index rebuilt");
        }
        if self.pending_by_expiry.is_empty() && !self.opportunities.is_empty() {
            let rows: Vec<AbsorptionOpportunity> = Self::load_all(&self.opportunities)?;
            let mut indexed = 0;
            for opportunity in rows.iter().filter(|o| o.status == AbsorptionStatus::Pending) {
                self.pending_by_expiry.insert(Self::expiry_key(opportunity), &[] as &[u8])?;
                indexed += 1;
            }
            info!(rows = indexed, "opportunity expiry index rebuilt");
        }
        Ok(())
    }

    // ==================== Helpers ====================

    fn serialize<T: Serialize>(value: &T) -> TeoResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| TeoError::Serialization(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(bytes: &[u8]) -> TeoResult<T> {
        serde_json::from_slice(bytes).map_err(|e| TeoError::Serialization(e.to_string()))
    }

    fn user_prefix(user: &UserId) -> Vec<u8> {
        let mut key = user.as_str().as_bytes().to_vec();
        key.push(KEY_SEPARATOR);
        key
    }

    fn index_key(owner: &UserId, id: &str) -> Vec<u8> {
        let mut key = Self::user_prefix(owner);
        key.extend_from_slice(id.as_bytes());
        key
    }

    fn time_key(at: &DateTime<Utc>) -> [u8; TIME_KEY_LEN] {
        ((at.timestamp_micros() as u64) ^ (1 << 63)).to_be_bytes()
    }

    fn status_prefix(status: WithdrawalStatus) -> Vec<u8> {
        let mut key = status.name().as_bytes().to_vec();
        key.push(KEY_SEPARATOR);
        key
    }

    fn status_key(request: &WithdrawalRequest) -> Vec<u8> {
        let mut key = Self::status_prefix(request.status);
        key.extend_from_slice(&Self::time_key(&request.created_at));
        key.extend_from_slice(request.id.as_str().as_bytes());
        key
    }

    fn expiry_key(opportunity: &AbsorptionOpportunity) -> Vec<u8> {
        let mut key = Self::time_key(&opportunity.expires_at).to_vec();
        key.extend_from_slice(opportunity.id.as_str().as_bytes());
        key
    }

    fn transaction_key(&self, user: &UserId) -> TeoResult<Vec<u8>> {
        let seq = self
            .db
            .generate_id()
            .map_err(|e| TeoError::Storage(format!("Failed to allocate sequence: {}", e)))?;
        let mut key = Self::user_prefix(user);
        key.extend_from_slice(&seq.to_be_bytes());
        Ok(key)
    }

    fn load_all<T: DeserializeOwned>(tree: &sled::Tree) -> TeoResult<Vec<T>> {
        tree.iter()
            .values()
            .map(|value| {
                let value = value.map_err(|e| TeoError::Storage(e.to_string()))?;
                Self::deserialize(&value)
            })
            .collect()
    }

    fn load_indexed<T: DeserializeOwned>(
        index: &sled::Tree,
        rows: &sled::Tree,
        owner: &UserId,
    ) -> TeoResult<Vec<T>> {
        let prefix = Self::user_prefix(owner);
        let mut out = Vec::new();
        for entry in index.scan_prefix(&prefix) {
            let (key, _) = entry.map_err(|e| TeoError::Storage(e.to_string()))?;
            if let Some(value) = rows
                .get(&key[prefix.len()..])
                .map_err(|e| TeoError::Storage(e.to_string()))?
            {
                out.push(Self::deserialize(&value)?);
            }
        }
        Ok(out)
    }

    fn count_prefix(tree: &sled::Tree, prefix: &[u8]) -> TeoResult<u64> {
        let mut count = 0;
        for key in tree.scan_prefix(prefix).keys() {
            key.map_err(|e| TeoError::Storage(e.to_string()))?;
            count += 1;
        }
        Ok(count)
    }
}

#[async_trait]
impl LedgerStore for SledStorage {
    async fn get_balance(&self, user: &UserId) -> TeoResult<Option<AccountBalance>> {
        match self.balances.get(user.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_transactions(&self, user: &UserId, limit: usize) -> TeoResult<Vec<LedgerTransaction>> {
        self.transactions
            .scan_prefix(Self::user_prefix(user))
            .values()
            .rev()
            .take(limit)
            .map(|value| {
                let value = value.map_err(|e| TeoError::Storage(e.to_string()))?;
                Self::deserialize(&value)
            })
            .collect()
    }

    async fn get_withdrawal(&self, id: &WithdrawalId) -> TeoResult<Option<WithdrawalRequest>> {
        match self.withdrawals.get(id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_withdrawals_for_user(&self, user: &UserId) -> TeoResult<Vec<WithdrawalRequest>> {
        let mut rows: Vec<WithdrawalRequest> =
            Self::load_indexed(&self.withdrawals_by_user, &self.withdrawals, user)?;
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn list_withdrawals_by_status(
        &self,
        status: WithdrawalStatus,
        limit: usize,
    ) -> TeoResult<Vec<WithdrawalRequest>> {
        let prefix = Self::status_prefix(status);
        let mut rows = Vec::new();
        for key in self.withdrawals_by_status.scan_prefix(&prefix).keys().take(limit) {
            let key = key.map_err(|e| TeoError::Storage(e.to_string()))?;
            let id = &key[prefix.len() + TIME_KEY_LEN..];
            if let Some(value) = self.withdrawals.get(id)? {
                rows.push(Self::deserialize(&value)?);
            }
        }
        Ok(rows)
    }

    async fn get_opportunity(&self, id: &OpportunityId) -> TeoResult<Option<AbsorptionOpportunity>> {
        match self.opportunities.get(id.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(Self::deserialize(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn list_opportunities_for_teacher(
        &self,
        teacher: &UserId,
        status: Option<AbsorptionStatus>,
    ) -> TeoResult<Vec<AbsorptionOpportunity>> {
        let mut rows: Vec<AbsorptionOpportunity> =
            Self::load_indexed::<AbsorptionOpportunity>(&self.opportunities_by_teacher, &self.opportunities, teacher)?
                .into_iter()
                .filter(|o| status.map_or(true, |s| o.status == s))
                .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn list_expired_opportunities(&self, now: DateTime<Utc>) -> TeoResult<Vec<AbsorptionOpportunity>> {
        // One microsecond past `now` so sub-microsecond deadlines are not skipped
        let upper = Self::time_key(&(now + Duration::microseconds(1)));
        let mut rows = Vec::new();
        for key in self.pending_by_expiry.range(..upper).keys() {
            let key = key.map_err(|e| TeoError::Storage(e.to_string()))?;
            if let Some(value) = self.opportunities.get(&key[TIME_KEY_LEN..])? {
                let opportunity: AbsorptionOpportunity = Self::deserialize(&value)?;
                if opportunity.status == AbsorptionStatus::Pending && opportunity.is_past_deadline(now) {
                    rows.push(opportunity);
                }
            }
        }
        Ok(rows)
    }

    async fn apply(&self, batch: WriteBatch) -> TeoResult<()> {
        if batch.is_empty() {
            return Ok(());
        }

        // Encode outside the transaction; the closure may run more than once
        let mut balances: Entries = Vec::with_capacity(batch.balances.len());
        for balance in &batch.balances {
            balances.push((balance.user.as_str().as_bytes().to_vec(), Self::serialize(balance)?));
        }
        let mut transactions: Entries = Vec::with_capacity(batch.transactions.len());
        for tx in &batch.transactions {
            transactions.push((self.transaction_key(&tx.user)?, Self::serialize(tx)?));
        }
        let mut withdrawals: Vec<IndexedRow> = Vec::with_capacity(batch.withdrawals.len());
        for request in &batch.withdrawals {
            withdrawals.push(IndexedRow {
                key: request.id.as_str().as_bytes().to_vec(),
                value: Self::serialize(request)?,
                owner_key: Self::index_key(&request.user, request.id.as_str()),
                ordered_key: Some(Self::status_key(request)),
            });
        }
        let mut opportunities: Vec<IndexedRow> = Vec::with_capacity(batch.opportunities.len());
        for opportunity in &batch.opportunities {
            opportunities.push(IndexedRow {
                key: opportunity.id.as_str().as_bytes().to_vec(),
                value: Self::serialize(opportunity)?,
                owner_key: Self::index_key(&opportunity.teacher, opportunity.id.as_str()),
                ordered_key: (opportunity.status == AbsorptionStatus::Pending)
                    .then(|| Self::expiry_key(opportunity)),
            });
        }

        let result: Result<(), TransactionError<TeoError>> = (
            &self.balances,
            &self.transactions,
            &self.withdrawals,
            &self.withdrawals_by_user,
            &self.withdrawals_by_status,
            &self.opportunities,
            &self.opportunities_by_teacher,
            &self.pending_by_expiry,
        )
            .transaction(|(bal, txs, wds, wd_user, wd_status, opps, opp_teacher, opp_expiry)| {
                for (key, value) in &balances {
                    bal.insert(key.as_slice(), value.as_slice())?;
                }
                for (key, value) in &transactions {
                    if txs.insert(key.as_slice(), value.as_slice())?.is_some() {
                        return Err(ConflictableTransactionError::Abort(TeoError::InvariantViolation {
                            details: "transaction log entry overwritten".to_string(),
                        }));
                    }
                }
                for row in &withdrawals {
                    if let Some(old) = wds.insert(row.key.as_slice(), row.value.as_slice())? {
                        let old: WithdrawalRequest =
                            Self::deserialize(&old).map_err(ConflictableTransactionError::Abort)?;
                        wd_status.remove(Self::status_key(&old))?;
                    }
                    wd_user.insert(row.owner_key.as_slice(), &[] as &[u8])?;
                    if let Some(key) = &row.ordered_key {
                        wd_status.insert(key.as_slice(), &[] as &[u8])?;
                    }
                }
                for row in &opportunities {
                    if let Some(old) = opps.insert(row.key.as_slice(), row.value.as_slice())? {
                        let old: AbsorptionOpportunity =
                            Self::deserialize(&old).map_err(ConflictableTransactionError::Abort)?;
                        if old.status == AbsorptionStatus::Pending {
                            opp_expiry.remove(Self::expiry_key(&old))?;
                        }
                    }
                    opp_teacher.insert(row.owner_key.as_slice(), &[] as &[u8])?;
                    if let Some(key) = &row.ordered_key {
                        opp_expiry.insert(key.as_slice(), &[] as &[u8])?;
                    }
                }
                Ok(())
            });

        match result {
            Ok(()) => {}
            Err(TransactionError::Abort(e)) => return Err(e),
            Err(TransactionError::Storage(e)) => {
                return Err(TeoError::Storage(format!("Batch transaction failed: {}", e)))
            }
        }

        if self.flush_every_write {
            self.db
                .flush_async()
                .await
                .map_err(|e| TeoError::Storage(format!("Failed to flush db: {}", e)))?;
        }

        debug!(
            balances = batch.balances.len(),
            transactions = batch.transactions.len(),
            withdrawals = batch.withdrawals.len(),
            opportunities = batch.opportunities.len(),
            "batch applied"
        );
        Ok(())
    }

    async fn get_stats(&self) -> TeoResult<StorageStats> {
        let open_withdrawals = Self::count_prefix(
            &self.withdrawals_by_status,
            &Self::status_prefix(WithdrawalStatus::Pending),
        )? + Self::count_prefix(
            &self.withdrawals_by_status,
            &Self::status_prefix(WithdrawalStatus::Processing),
        )?;
        Ok(StorageStats {
            accounts: self.balances.len() as u64,
            transactions: self.transactions.len() as u64,
            withdrawals: self.withdrawals.len() as u64,
            open_withdrawals,
            opportunities: self.opportunities.len() as u64,
            pending_opportunities: self.pending_by_expiry.len() as u64,
        })
    }
}

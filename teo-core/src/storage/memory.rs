//! In-memory storage
//!
//! Used by tests and development. One lock guards all tables so a batch is
//! applied atomically.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::{LedgerStore, StorageStats, WriteBatch};
use crate::error::TeoResult;
use crate::types::{
    AbsorptionOpportunity, AbsorptionStatus, AccountBalance, LedgerTransaction, OpportunityId,
    UserId, WithdrawalId, WithdrawalRequest, WithdrawalStatus,
};

#[derive(Debug, Default)]
struct Tables {
    balances: HashMap<UserId, AccountBalance>,
    /// Per-user log in append order
    transactions: HashMap<UserId, Vec<LedgerTransaction>>,
    withdrawals: HashMap<WithdrawalId, WithdrawalRequest>,
    withdrawals_by_user: HashMap<UserId, Vec<WithdrawalId>>,
    opportunities: HashMap<OpportunityId, AbsorptionOpportunity>,
}

/// In-memory storage
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear all data
    pub async fn clear(&self) {
        *self.tables.write().await = Tables::default();
    }
}

fn oldest_first_withdrawals(mut rows: Vec<WithdrawalRequest>) -> Vec<WithdrawalRequest> {
    rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    rows
}

fn oldest_first_opportunities(mut rows: Vec<AbsorptionOpportunity>) -> Vec<AbsorptionOpportunity> {
    rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
    rows
}

#[async_trait]
impl LedgerStore for MemoryStorage {
    async fn get_balance(&self, user: &UserId) -> TeoResult<Option<AccountBalance>> {
        Ok(self.tables.read().await.balances.get(user).cloned())
    }

    async fn list_transactions(&self, user: &UserId, limit: usize) -> TeoResult<Vec<LedgerTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .get(user)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_withdrawal(&self, id: &WithdrawalId) -> TeoResult<Option<WithdrawalRequest>> {
        Ok(self.tables.read().await.withdrawals.get(id).cloned())
    }

    async fn list_withdrawals_for_user(&self, user: &UserId) -> TeoResult<Vec<WithdrawalRequest>> {
        let tables = self.tables.read().await;
        let rows = tables
            .withdrawals_by_user
            .get(user)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| tables.withdrawals.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default();
        Ok(oldest_first_withdrawals(rows))
    }

    async fn list_withdrawals_by_status(
        &self,
        status: WithdrawalStatus,
        limit: usize,
    ) -> TeoResult<Vec<WithdrawalRequest>> {
        let tables = self.tables.read().await;
        let rows = tables
            .withdrawals
            .values()
            .filter(|r| r.status == status)
            .cloned()
            .collect();
        let mut rows = oldest_first_withdrawals(rows);
        rows.truncate(limit);
        Ok(rows)
    }

    async fn get_opportunity(&self, id: &OpportunityId) -> TeoResult<Option<AbsorptionOpportunity>> {
        Ok(self.tables.read().await.opportunities.get(id).cloned())
    }

    async fn list_opportunities_for_teacher(
        &self,
        teacher: &UserId,
        status: Option<AbsorptionStatus>,
    ) -> TeoResult<Vec<AbsorptionOpportunity>> {
        let tables = self.tables.read().await;
        let rows = tables
            .opportunities
            .values()
            .filter(|o| &o.teacher == teacher && status.map_or(true, |s| o.status == s))
            .cloned()
            .collect();
        Ok(oldest_first_opportunities(rows))
    }

    async fn list_expired_opportunities(&self, now: DateTime<Utc>) -> TeoResult<Vec<AbsorptionOpportunity>> {
        let tables = self.tables.read().await;
        let rows = tables
            .opportunities
            .values()
            .filter(|o| o.status == AbsorptionStatus::Pending && o.is_past_deadline(now))
            .cloned()
            .collect();
        Ok(oldest_first_opportunities(rows))
    }

    async fn apply(&self, batch: WriteBatch) -> TeoResult<()> {
        let mut tables = self.tables.write().await;

        for balance in batch.balances {
            tables.balances.insert(balance.user.clone(), balance);
        }
        for tx in batch.transactions {
            tables.transactions.entry(tx.user.clone()).or_default().push(tx);
        }
        for request in batch.withdrawals {
            if !tables.withdrawals.contains_key(&request.id) {
                tables
                    .withdrawals_by_user
                    .entry(request.user.clone())
                    .or_default()
                    .push(request.id.clone());
            }
            tables.withdrawals.insert(request.id.clone(), request);
        }
        for opportunity in batch.opportunities {
            tables.opportunities.insert(opportunity.id.clone(), opportunity);
        }
        Ok(())
    }

    async fn get_stats(&self) -> TeoResult<StorageStats> {
        let tables = self.tables.read().await;
        Ok(StorageStats {
            accounts: tables.balances.len() as u64,
            transactions: tables.transactions.values().map(|log| log.len() as u64).sum(),
            withdrawals: tables.withdrawals.len() as u64,
            open_withdrawals: tables.withdrawals.values().filter(|r| r.status.is_open()).count() as u64,
            opportunities: tables.opportunities.len() as u64,
            pending_opportunities: tables
                .opportunities
                .values()
                .filter(|o| o.status == AbsorptionStatus::Pending)
                .count() as u64,
        })
    }
}

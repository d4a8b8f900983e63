//! Service Layer
//!
//! Wires the ledger, withdrawal pipeline, absorption engine and signature
//! authorizer together and owns the background runner.
//!
//! # Usage
//!
//! ```rust,ignore
//! use teo_core::{TeoConfig, TeoService};
//!
//! let service = TeoService::builder()
//!     .config(TeoConfig::from_env())
//!     .payment_rail(rail)
//!     .notifier(notifier)
//!     .directory(directory)
//!     .enrollment(enrollment)
//!     .build()
//!     .await?;
//!
//! service.start().await?;
//! let request = service.withdrawals().create_request(&user, amount, &address, audit).await?;
//! ```

mod builder;
mod runner;

pub use builder::{open_storage, TeoServiceBuilder};
pub use runner::{BackgroundRunner, RunnerHandle};

use chrono::{DateTime, Utc};
use std::sync::Arc;
use teo_signer::{ReplayCacheStats, SignatureAuthorizer};
use tokio::sync::RwLock;
use tracing::info;

use crate::absorption::AbsorptionEngine;
use crate::authorization::AuthorizedExecutor;
use crate::config::TeoConfig;
use crate::error::{TeoError, TeoResult};
use crate::ledger::BalanceLedger;
use crate::storage::StorageStats;
use crate::withdrawal::{WithdrawalPipeline, WithdrawalProcessor};

/// Service status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    Initializing,
    Running,
    Paused,
    Stopped,
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "INITIALIZING"),
            Self::Running => write!(f, "RUNNING"),
            Self::Paused => write!(f, "PAUSED"),
            Self::Stopped => write!(f, "STOPPED"),
        }
    }
}

/// Service statistics
#[derive(Debug, Clone)]
pub struct ServiceStats {
    pub status: ServiceStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub storage: StorageStats,
    pub replay: ReplayCacheStats,
    /// Account lock entries currently registered
    pub account_locks: usize,
}

/// TeoCoin service
pub struct TeoService {
    config: TeoConfig,
    ledger: Arc<BalanceLedger>,
    pipeline: Arc<WithdrawalPipeline>,
    processor: Arc<WithdrawalProcessor>,
    absorption: Arc<AbsorptionEngine>,
    authorizer: Arc<SignatureAuthorizer>,
    executor: Arc<AuthorizedExecutor>,
    status: Arc<RwLock<ServiceStatus>>,
    started_at: Arc<RwLock<Option<DateTime<Utc>>>>,
    runner_handle: Arc<RwLock<Option<RunnerHandle>>>,
}

impl TeoService {
    pub fn builder() -> TeoServiceBuilder {
        TeoServiceBuilder::new()
    }

    pub fn config(&self) -> &TeoConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<BalanceLedger> {
        &self.ledger
    }

    pub fn withdrawals(&self) -> &Arc<WithdrawalPipeline> {
        &self.pipeline
    }

    pub fn processor(&self) -> &Arc<WithdrawalProcessor> {
        &self.processor
    }

    pub fn absorption(&self) -> &Arc<AbsorptionEngine> {
        &self.absorption
    }

    pub fn authorizer(&self) -> &Arc<SignatureAuthorizer> {
        &self.authorizer
    }

    pub fn executor(&self) -> &Arc<AuthorizedExecutor> {
        &self.executor
    }

    pub async fn status(&self) -> ServiceStatus {
        *self.status.read().await
    }

    pub async fn stats(&self) -> TeoResult<ServiceStats> {
        Ok(ServiceStats {
            status: self.status().await,
            started_at: *self.started_at.read().await,
            storage: self.ledger.store().get_stats().await?,
            replay: self.authorizer.cache_stats().await,
            account_locks: self.ledger.locks().len(),
        })
    }

    /// Start the background runner
    pub async fn start(&self) -> TeoResult<()> {
        let mut handle = self.runner_handle.write().await;
        if handle.is_some() {
            return Err(TeoError::InvalidState {
                reason: "service already started".to_string(),
            });
        }

        let runner = BackgroundRunner::new(
            self.processor.clone(),
            self.absorption.clone(),
            self.authorizer.clone(),
            self.ledger.clone(),
            self.config.runner.clone(),
        );
        *handle = Some(runner.start());
        *self.status.write().await = ServiceStatus::Running;
        *self.started_at.write().await = Some(self.ledger.clock().now());

        info!(
            processing_interval_secs = self.config.runner.processing_interval_secs,
            sweep_interval_secs = self.config.runner.sweep_interval_secs,
            "TeoCoin service started"
        );
        Ok(())
    }

    /// Pause background work; foreground operations stay available
    pub async fn pause(&self) {
        if let Some(handle) = self.runner_handle.read().await.as_ref() {
            handle.pause().await;
            *self.status.write().await = ServiceStatus::Paused;
        }
    }

    pub async fn resume(&self) {
        if let Some(handle) = self.runner_handle.read().await.as_ref() {
            handle.resume().await;
            *self.status.write().await = ServiceStatus::Running;
        }
    }

    /// Stop the background runner
    pub async fn stop(&self) {
        if let Some(handle) = self.runner_handle.write().await.take() {
            handle.stop().await;
        }
        *self.status.write().await = ServiceStatus::Stopped;
        info!("TeoCoin service stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{InMemoryDirectory, MockPaymentRail, RecordingEnrollment, RecordingNotifier};
    use crate::types::{AuditContext, TransactionKind, UserId, WithdrawalStatus};
    use rust_decimal::Decimal;
    use std::time::Duration;

    async fn service(rail: Arc<MockPaymentRail>) -> TeoService {
        TeoService::builder()
            .config(TeoConfig::test())
            .payment_rail(rail)
            .notifier(Arc::new(RecordingNotifier::new()))
            .directory(Arc::new(InMemoryDirectory::new()))
            .enrollment(Arc::new(RecordingEnrollment::new()))
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let service = service(Arc::new(MockPaymentRail::new())).await;

        service.start().await.unwrap();
        assert_eq!(service.status().await, ServiceStatus::Running);
        assert!(service.start().await.is_err());

        service.pause().await;
        assert_eq!(service.status().await, ServiceStatus::Paused);

        service.resume().await;
        assert_eq!(service.status().await, ServiceStatus::Running);

        service.stop().await;
        assert_eq!(service.status().await, ServiceStatus::Stopped);
    }

    #[tokio::test]
    async fn test_runner_drains_pending_withdrawals() {
        let rail = Arc::new(MockPaymentRail::new());
        let service = service(rail.clone()).await;
        let user = UserId::new("alice");

        service
            .ledger()
            .credit(&user, Decimal::new(100, 0), TransactionKind::Earned, "reward", None)
            .await
            .unwrap();
        let request = service
            .withdrawals()
            .create_request(
                &user,
                Decimal::new(40, 0),
                "0x2222222222222222222222222222222222222222",
                AuditContext::default(),
            )
            .await
            .unwrap();

        service.start().await.unwrap();

        let mut status = WithdrawalStatus::Pending;
        for _ in 0..50 {
            status = service.withdrawals().get(&request.id).await.unwrap().status;
            if status == WithdrawalStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        service.stop().await;

        assert_eq!(status, WithdrawalStatus::Completed);
        assert_eq!(rail.transfers().await.len(), 1);
        let balance = service.ledger().balance(&user).await.unwrap();
        assert_eq!(balance.available, Decimal::new(60, 0));
        assert_eq!(balance.pending_withdrawal, Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_runner_recovers_stuck_processing() {
        use crate::types::ManualClock;
        use chrono::TimeZone;

        let rail = Arc::new(MockPaymentRail::new());
        let clock = Arc::new(ManualClock::new(Utc.with_ymd_and_hms(2026, 5, 4, 8, 0, 0).unwrap()));
        let service = TeoService::builder()
            .config(TeoConfig::test())
            .payment_rail(rail.clone())
            .notifier(Arc::new(RecordingNotifier::new()))
            .directory(Arc::new(InMemoryDirectory::new()))
            .enrollment(Arc::new(RecordingEnrollment::new()))
            .clock(clock.clone())
            .build()
            .await
            .unwrap();
        let user = UserId::new("frank");

        service
            .ledger()
            .credit(&user, Decimal::new(50, 0), TransactionKind::Earned, "reward", None)
            .await
            .unwrap();
        let request = service
            .withdrawals()
            .create_request(
                &user,
                Decimal::new(50, 0),
                "0x2222222222222222222222222222222222222222",
                AuditContext::default(),
            )
            .await
            .unwrap();
        service.withdrawals().begin_processing(&request.id).await.unwrap();
        clock.advance(chrono::Duration::seconds(service.config().runner.stale_processing_secs as i64 + 1));

        service.start().await.unwrap();

        let mut status = WithdrawalStatus::Processing;
        for _ in 0..50 {
            status = service.withdrawals().get(&request.id).await.unwrap().status;
            if status == WithdrawalStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        service.stop().await;

        assert_eq!(status, WithdrawalStatus::Completed);
        assert_eq!(rail.transfers().await.len(), 1);
        assert_eq!(service.ledger().balance(&user).await.unwrap().pending_withdrawal, Decimal::ZERO);
    }
}

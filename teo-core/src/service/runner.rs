//! Background Runner
//!
//! Periodic work:
//! - process pending withdrawals through the payment rail
//! - re-drive withdrawals stuck in processing past the stale threshold
//! - expire absorption opportunities whose window closed
//! - purge the replay cache and idle account locks

use std::sync::Arc;
use std::time::Duration;
use teo_signer::SignatureAuthorizer;
use tokio::sync::{mpsc, RwLock};
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::absorption::AbsorptionEngine;
use crate::config::RunnerConfig;
use crate::error::TeoResult;
use crate::ledger::BalanceLedger;
use crate::withdrawal::WithdrawalProcessor;

/// Background runner
pub struct BackgroundRunner {
    processor: Arc<WithdrawalProcessor>,
    absorption: Arc<AbsorptionEngine>,
    authorizer: Arc<SignatureAuthorizer>,
    ledger: Arc<BalanceLedger>,
    config: RunnerConfig,
}

impl BackgroundRunner {
    pub fn new(
        processor: Arc<WithdrawalProcessor>,
        absorption: Arc<AbsorptionEngine>,
        authorizer: Arc<SignatureAuthorizer>,
        ledger: Arc<BalanceLedger>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            processor,
            absorption,
            authorizer,
            ledger,
            config,
        }
    }

    /// Spawn the runner loop
    pub fn start(self) -> RunnerHandle {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        let running = Arc::new(RwLock::new(true));
        let running_clone = running.clone();

        let processing_interval = Duration::from_secs(self.config.processing_interval_secs.max(1));
        let sweep_interval = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let maintenance_interval = Duration::from_secs(self.config.maintenance_interval_secs.max(1));
        let batch_size = self.config.processing_batch_size;
        let stale_after = chrono::Duration::seconds(self.config.stale_processing_secs.min(u32::MAX as u64) as i64);

        let processor = self.processor;
        let absorption = self.absorption;
        let authorizer = self.authorizer;
        let ledger = self.ledger;

        tokio::spawn(async move {
            let mut processing_timer = interval(processing_interval);
            let mut sweep_timer = interval(sweep_interval);
            let mut maintenance_timer = interval(maintenance_interval);

            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Background runner received shutdown signal");
                        break;
                    }
                    _ = processing_timer.tick() => {
                        if *running_clone.read().await {
                            if let Err(e) = Self::process_withdrawals(&processor, batch_size, stale_after).await {
                                error!(error = %e, "withdrawal processing pass failed");
                            }
                        }
                    }
                    _ = sweep_timer.tick() => {
                        if *running_clone.read().await {
                            if let Err(e) = Self::sweep_opportunities(&absorption).await {
                                error!(error = %e, "absorption sweep failed");
                            }
                        }
                    }
                    _ = maintenance_timer.tick() => {
                        if *running_clone.read().await {
                            Self::run_maintenance(&authorizer, &ledger).await;
                        }
                    }
                }
            }

            info!("Background runner stopped");
        });

        RunnerHandle { shutdown_tx, running }
    }

    async fn process_withdrawals(
        processor: &Arc<WithdrawalProcessor>,
        batch_size: usize,
        stale_after: chrono::Duration,
    ) -> TeoResult<()> {
        let recovered = match processor.recover_stale(stale_after, batch_size).await {
            Ok(report) => report.picked,
            Err(e) => {
                error!(error = %e, "stale withdrawal recovery failed");
                0
            }
        };
        let report = processor.process_pending(batch_size).await?;
        if report.picked == 0 && recovered == 0 {
            debug!("no pending withdrawals");
        }
        Ok(())
    }

    async fn sweep_opportunities(absorption: &Arc<AbsorptionEngine>) -> TeoResult<()> {
        absorption.sweep_expired().await?;
        Ok(())
    }

    async fn run_maintenance(authorizer: &Arc<SignatureAuthorizer>, ledger: &Arc<BalanceLedger>) {
        let purged = authorizer.purge_expired_at(ledger.clock().now()).await;
        let pruned = ledger.locks().prune_idle();
        debug!(purged, pruned, "maintenance pass");
    }
}

/// Runner handle
pub struct RunnerHandle {
    shutdown_tx: mpsc::Sender<()>,
    running: Arc<RwLock<bool>>,
}

impl RunnerHandle {
    /// Stop the runner
    pub async fn stop(self) {
        *self.running.write().await = false;
        let _ = self.shutdown_tx.send(()).await;
    }

    /// Skip ticks until resumed
    pub async fn pause(&self) {
        *self.running.write().await = false;
    }

    pub async fn resume(&self) {
        *self.running.write().await = true;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}

//! Service builder

use std::sync::Arc;
use teo_signer::SignatureAuthorizer;
use tokio::sync::RwLock;
use tracing::info;

use crate::absorption::AbsorptionEngine;
use crate::authorization::AuthorizedExecutor;
use crate::config::TeoConfig;
use crate::error::{TeoError, TeoResult};
use crate::ledger::BalanceLedger;
use crate::ports::{AccountDirectory, EnrollmentCollaborator, Notifier, PaymentRail};
use crate::storage::{LedgerStore, MemoryStorage, SledStorage, StorageConfig};
use crate::types::{Clock, SystemClock};
use crate::withdrawal::{WithdrawalPipeline, WithdrawalProcessor};

use super::{ServiceStatus, TeoService};

/// Service builder
///
/// Collaborators are injected explicitly. Storage falls back to the
/// configured backend; the clock falls back to the system clock.
pub struct TeoServiceBuilder {
    config: Option<TeoConfig>,
    storage: Option<Arc<dyn LedgerStore>>,
    rail: Option<Arc<dyn PaymentRail>>,
    notifier: Option<Arc<dyn Notifier>>,
    directory: Option<Arc<dyn AccountDirectory>>,
    enrollment: Option<Arc<dyn EnrollmentCollaborator>>,
    clock: Option<Arc<dyn Clock>>,
}

impl TeoServiceBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            storage: None,
            rail: None,
            notifier: None,
            directory: None,
            enrollment: None,
            clock: None,
        }
    }

    pub fn config(mut self, config: TeoConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn LedgerStore>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn payment_rail(mut self, rail: Arc<dyn PaymentRail>) -> Self {
        self.rail = Some(rail);
        self
    }

    pub fn notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn directory(mut self, directory: Arc<dyn AccountDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn enrollment(mut self, enrollment: Arc<dyn EnrollmentCollaborator>) -> Self {
        self.enrollment = Some(enrollment);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Build the service
    pub async fn build(self) -> TeoResult<TeoService> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let rail = self
            .rail
            .ok_or_else(|| TeoError::Configuration("Payment rail is required".to_string()))?;
        let notifier = self
            .notifier
            .ok_or_else(|| TeoError::Configuration("Notifier is required".to_string()))?;
        let directory = self
            .directory
            .ok_or_else(|| TeoError::Configuration("Account directory is required".to_string()))?;
        let enrollment = self
            .enrollment
            .ok_or_else(|| TeoError::Configuration("Enrollment collaborator is required".to_string()))?;

        let storage = match self.storage {
            Some(storage) => storage,
            None => open_storage(&config.storage)?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        let ledger = Arc::new(BalanceLedger::new(
            storage.clone(),
            clock,
            config.absorption.tier_table()?,
        ));
        let pipeline = Arc::new(WithdrawalPipeline::new(
            ledger.clone(),
            rail.clone(),
            config.withdrawal.clone(),
        ));
        let processor = Arc::new(WithdrawalProcessor::new(
            pipeline.clone(),
            storage,
            rail,
            notifier.clone(),
        ));
        let absorption = Arc::new(AbsorptionEngine::new(ledger.clone(), notifier, &config.absorption));
        let authorizer = Arc::new(SignatureAuthorizer::new(&config.authorization)?);
        let executor = Arc::new(AuthorizedExecutor::new(
            authorizer.clone(),
            ledger.clone(),
            absorption.clone(),
            directory,
            enrollment,
        ));

        info!(
            chain_id = config.authorization.chain_id,
            in_memory = config.storage.is_memory(),
            "TeoCoin service assembled"
        );

        Ok(TeoService {
            config,
            ledger,
            pipeline,
            processor,
            absorption,
            authorizer,
            executor,
            status: Arc::new(RwLock::new(ServiceStatus::Initializing)),
            started_at: Arc::new(RwLock::new(None)),
            runner_handle: Arc::new(RwLock::new(None)),
        })
    }
}

impl Default for TeoServiceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Open the configured storage backend
pub fn open_storage(config: &StorageConfig) -> TeoResult<Arc<dyn LedgerStore>> {
    if config.is_memory() {
        Ok(Arc::new(MemoryStorage::new()))
    } else {
        Ok(Arc::new(SledStorage::new(config)?))
    }
}

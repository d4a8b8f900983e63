//! Configuration
//!
//! Every section has serde defaults, so a partial file or an empty
//! environment yields a working configuration.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::env;
use std::str::FromStr;
use teo_signer::SignerConfig;

use crate::absorption::{default_tiers, TierTable, TierThreshold};
use crate::error::{TeoError, TeoResult};
use crate::storage::StorageConfig;

/// Per-account withdrawal limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WithdrawalLimits {
    /// Smallest accepted request
    #[serde(default = "default_min_amount")]
    pub min_amount: Decimal,
    /// Largest accepted request
    #[serde(default = "default_max_amount")]
    pub max_amount: Decimal,
    /// Requests per UTC day
    #[serde(default = "default_max_daily_requests")]
    pub max_daily_requests: u32,
    /// Requested volume per UTC day, cancelled requests excluded
    #[serde(default = "default_max_daily_amount")]
    pub max_daily_amount: Decimal,
    /// Pending plus processing requests at once
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: u32,
}

fn default_min_amount() -> Decimal {
    Decimal::new(10, 0)
}

fn default_max_amount() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_max_daily_requests() -> u32 {
    5
}

fn default_max_daily_amount() -> Decimal {
    Decimal::new(10_000, 0)
}

fn default_max_concurrent() -> u32 {
    3
}

impl Default for WithdrawalLimits {
    fn default() -> Self {
        Self {
            min_amount: default_min_amount(),
            max_amount: default_max_amount(),
            max_daily_requests: default_max_daily_requests(),
            max_daily_amount: default_max_daily_amount(),
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl WithdrawalLimits {
    pub fn validate(&self) -> TeoResult<()> {
        if self.min_amount <= Decimal::ZERO || self.min_amount > self.max_amount {
            return Err(TeoError::Configuration(format!(
                "withdrawal range [{}, {}] is invalid",
                self.min_amount, self.max_amount
            )));
        }
        if self.max_daily_requests == 0 || self.max_concurrent == 0 {
            return Err(TeoError::Configuration(
                "withdrawal request limits must be positive".to_string(),
            ));
        }
        if self.max_daily_amount < self.min_amount {
            return Err(TeoError::Configuration(format!(
                "max_daily_amount {} is below min_amount {}",
                self.max_daily_amount, self.min_amount
            )));
        }
        Ok(())
    }
}

/// Discount absorption settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsorptionConfig {
    /// Teacher decision window
    #[serde(default = "default_window_hours")]
    pub decision_window_hours: i64,
    /// Extra TEO on top of the student's spend when absorbing
    #[serde(default = "default_bonus_rate")]
    pub bonus_rate: Decimal,
    /// Staking tier table
    #[serde(default = "default_tiers")]
    pub tiers: Vec<TierThreshold>,
}

fn default_window_hours() -> i64 {
    24
}

fn default_bonus_rate() -> Decimal {
    Decimal::new(25, 2)
}

impl Default for AbsorptionConfig {
    fn default() -> Self {
        Self {
            decision_window_hours: default_window_hours(),
            bonus_rate: default_bonus_rate(),
            tiers: default_tiers(),
        }
    }
}

impl AbsorptionConfig {
    pub fn validate(&self) -> TeoResult<()> {
        if self.decision_window_hours <= 0 {
            return Err(TeoError::Configuration(
                "decision_window_hours must be positive".to_string(),
            ));
        }
        if self.bonus_rate < Decimal::ZERO {
            return Err(TeoError::Configuration(format!(
                "bonus_rate {} is negative",
                self.bonus_rate
            )));
        }
        TierTable::new(self.tiers.clone()).map(|_| ())
    }

    pub fn tier_table(&self) -> TeoResult<TierTable> {
        TierTable::new(self.tiers.clone())
    }
}

/// Background runner settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Withdrawal processing interval
    #[serde(default = "default_processing_interval")]
    pub processing_interval_secs: u64,
    /// Requests handled per processing pass
    #[serde(default = "default_batch_size")]
    pub processing_batch_size: usize,
    /// Expiry sweep interval
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    /// Replay cache and lock registry housekeeping interval
    #[serde(default = "default_maintenance_interval")]
    pub maintenance_interval_secs: u64,
    /// Age after which a request still in processing is re-driven through the rail
    #[serde(default = "default_stale_processing")]
    pub stale_processing_secs: u64,
}

fn default_processing_interval() -> u64 {
    30
}

fn default_batch_size() -> usize {
    50
}

fn default_sweep_interval() -> u64 {
    60
}

fn default_maintenance_interval() -> u64 {
    300
}

fn default_stale_processing() -> u64 {
    600
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            processing_interval_secs: default_processing_interval(),
            processing_batch_size: default_batch_size(),
            sweep_interval_secs: default_sweep_interval(),
            maintenance_interval_secs: default_maintenance_interval(),
            stale_processing_secs: default_stale_processing(),
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeoConfig {
    #[serde(default)]
    pub withdrawal: WithdrawalLimits,
    #[serde(default)]
    pub absorption: AbsorptionConfig,
    #[serde(default)]
    pub authorization: SignerConfig,
    #[serde(default)]
    pub runner: RunnerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
}

impl Default for TeoConfig {
    fn default() -> Self {
        Self {
            withdrawal: WithdrawalLimits::default(),
            absorption: AbsorptionConfig::default(),
            authorization: SignerConfig::default(),
            runner: RunnerConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|s| s.trim().parse().ok())
}

impl TeoConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - TEO_WITHDRAWAL_MIN / TEO_WITHDRAWAL_MAX: request range
    /// - TEO_WITHDRAWAL_MAX_DAILY_REQUESTS: requests per UTC day
    /// - TEO_WITHDRAWAL_MAX_DAILY_AMOUNT: volume per UTC day
    /// - TEO_WITHDRAWAL_MAX_CONCURRENT: open requests per account
    /// - TEO_ABSORPTION_WINDOW_HOURS: teacher decision window
    /// - TEO_ABSORPTION_BONUS_RATE: absorb bonus, e.g. 0.25
    /// - TEO_CONTRACT_ADDRESS / TEO_CHAIN_ID: authorization domain
    /// - TEO_AUTH_MAX_TTL_SECS: furthest accepted authorization deadline
    /// - TEO_REPLAY_CAPACITY: replay cache size
    /// - TEO_PROCESSING_INTERVAL_SECS / TEO_SWEEP_INTERVAL_SECS: runner
    /// - TEO_STALE_PROCESSING_SECS: age before a processing request is re-driven
    /// - TEO_DATA_DIR: sled directory, empty for in-memory
    ///
    /// Unset or unparsable variables keep their defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let withdrawal = WithdrawalLimits {
            min_amount: env_parse("TEO_WITHDRAWAL_MIN").unwrap_or(defaults.withdrawal.min_amount),
            max_amount: env_parse("TEO_WITHDRAWAL_MAX").unwrap_or(defaults.withdrawal.max_amount),
            max_daily_requests: env_parse("TEO_WITHDRAWAL_MAX_DAILY_REQUESTS")
                .unwrap_or(defaults.withdrawal.max_daily_requests),
            max_daily_amount: env_parse("TEO_WITHDRAWAL_MAX_DAILY_AMOUNT")
                .unwrap_or(defaults.withdrawal.max_daily_amount),
            max_concurrent: env_parse("TEO_WITHDRAWAL_MAX_CONCURRENT")
                .unwrap_or(defaults.withdrawal.max_concurrent),
        };

        let absorption = AbsorptionConfig {
            decision_window_hours: env_parse("TEO_ABSORPTION_WINDOW_HOURS")
                .unwrap_or(defaults.absorption.decision_window_hours),
            bonus_rate: env_parse("TEO_ABSORPTION_BONUS_RATE").unwrap_or(defaults.absorption.bonus_rate),
            tiers: defaults.absorption.tiers,
        };

        let authorization = SignerConfig {
            contract_address: env::var("TEO_CONTRACT_ADDRESS")
                .unwrap_or(defaults.authorization.contract_address),
            chain_id: env_parse("TEO_CHAIN_ID").unwrap_or(defaults.authorization.chain_id),
            max_ttl_secs: env_parse("TEO_AUTH_MAX_TTL_SECS").unwrap_or(defaults.authorization.max_ttl_secs),
            replay_capacity: env_parse("TEO_REPLAY_CAPACITY")
                .unwrap_or(defaults.authorization.replay_capacity),
            clock_skew_secs: defaults.authorization.clock_skew_secs,
        };

        let runner = RunnerConfig {
            processing_interval_secs: env_parse("TEO_PROCESSING_INTERVAL_SECS")
                .unwrap_or(defaults.runner.processing_interval_secs),
            sweep_interval_secs: env_parse("TEO_SWEEP_INTERVAL_SECS")
                .unwrap_or(defaults.runner.sweep_interval_secs),
            stale_processing_secs: env_parse("TEO_STALE_PROCESSING_SECS")
                .unwrap_or(defaults.runner.stale_processing_secs),
            ..defaults.runner
        };

        let storage = StorageConfig {
            data_dir: env::var("TEO_DATA_DIR").unwrap_or(defaults.storage.data_dir),
            ..defaults.storage
        };

        Self {
            withdrawal,
            absorption,
            authorization,
            runner,
            storage,
        }
    }

    /// Development configuration
    pub fn development() -> Self {
        Self {
            runner: RunnerConfig {
                processing_interval_secs: 5,
                sweep_interval_secs: 10,
                maintenance_interval_secs: 60,
                ..RunnerConfig::default()
            },
            storage: StorageConfig::development(),
            ..Self::default()
        }
    }

    /// Test configuration (in-memory storage, short intervals)
    pub fn test() -> Self {
        Self {
            authorization: SignerConfig {
                contract_address: "0x1111111111111111111111111111111111111111".to_string(),
                chain_id: 31337,
                replay_capacity: 1_000,
                ..SignerConfig::default()
            },
            runner: RunnerConfig {
                processing_interval_secs: 1,
                processing_batch_size: 10,
                sweep_interval_secs: 1,
                maintenance_interval_secs: 1,
                stale_processing_secs: 60,
            },
            storage: StorageConfig::test(),
            ..Self::default()
        }
    }

    /// Validate all sections
    pub fn validate(&self) -> TeoResult<()> {
        self.withdrawal.validate()?;
        self.absorption.validate()?;
        if self.authorization.replay_capacity == 0 {
            return Err(TeoError::Configuration(
                "replay_capacity must be positive".to_string(),
            ));
        }
        if self.runner.processing_batch_size == 0 {
            return Err(TeoError::Configuration(
                "processing_batch_size must be positive".to_string(),
            ));
        }
        if self.runner.stale_processing_secs == 0 {
            return Err(TeoError::Configuration(
                "stale_processing_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TeoConfig::default();
        assert_eq!(config.withdrawal.min_amount, Decimal::new(10, 0));
        assert_eq!(config.withdrawal.max_daily_requests, 5);
        assert_eq!(config.withdrawal.max_concurrent, 3);
        assert_eq!(config.absorption.decision_window_hours, 24);
        assert_eq!(config.absorption.bonus_rate, Decimal::new(25, 2));
        assert_eq!(config.absorption.tiers.len(), 5);
        assert_eq!(config.runner.stale_processing_secs, 600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_presets_validate() {
        assert!(TeoConfig::development().validate().is_ok());
        let test = TeoConfig::test();
        assert!(test.validate().is_ok());
        assert!(test.storage.is_memory());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: TeoConfig = serde_json::from_str(
            r#"{"withdrawal": {"max_daily_requests": 2}, "storage": {"data_dir": ""}}"#,
        )
        .unwrap();
        assert_eq!(config.withdrawal.max_daily_requests, 2);
        assert_eq!(config.withdrawal.max_concurrent, 3);
        assert_eq!(config.absorption.decision_window_hours, 24);
        assert!(config.storage.is_memory());
    }

    #[test]
    fn test_inverted_range_rejected() {
        let mut config = TeoConfig::default();
        config.withdrawal.min_amount = Decimal::new(500, 0);
        config.withdrawal.max_amount = Decimal::new(100, 0);
        assert!(matches!(config.validate(), Err(TeoError::Configuration(_))));
    }

    #[test]
    fn test_zero_stale_threshold_rejected() {
        let mut config = TeoConfig::test();
        config.runner.stale_processing_secs = 0;
        assert!(matches!(config.validate(), Err(TeoError::Configuration(_))));
    }
}

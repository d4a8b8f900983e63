//! Staking tiers
//!
//! A teacher's tier is the highest threshold their staked balance reaches.
//! Higher tiers pay a lower platform commission.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{TeoError, TeoResult};
use crate::types::StakingTier;

/// One row of the tier table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TierThreshold {
    pub tier: StakingTier,
    /// Minimum staked balance
    pub min_staked: Decimal,
    /// Platform commission rate in [0, 1]
    pub commission_rate: Decimal,
}

impl TierThreshold {
    pub const fn new(tier: StakingTier, min_staked: Decimal, commission_rate: Decimal) -> Self {
        Self {
            tier,
            min_staked,
            commission_rate,
        }
    }
}

/// Default tier table
pub fn default_tiers() -> Vec<TierThreshold> {
    vec![
        TierThreshold::new(StakingTier::Bronze, Decimal::ZERO, Decimal::new(50, 2)),
        TierThreshold::new(StakingTier::Silver, Decimal::new(100, 0), Decimal::new(44, 2)),
        TierThreshold::new(StakingTier::Gold, Decimal::new(300, 0), Decimal::new(38, 2)),
        TierThreshold::new(StakingTier::Platinum, Decimal::new(600, 0), Decimal::new(31, 2)),
        TierThreshold::new(StakingTier::Diamond, Decimal::new(1000, 0), Decimal::new(25, 2)),
    ]
}

/// Validated tier table
#[derive(Debug, Clone)]
pub struct TierTable {
    /// Ascending by min_staked
    thresholds: Vec<TierThreshold>,
}

impl TierTable {
    /// Build from thresholds, validating ordering and rates
    pub fn new(mut thresholds: Vec<TierThreshold>) -> TeoResult<Self> {
        if thresholds.is_empty() {
            return Err(TeoError::Configuration("tier table is empty".to_string()));
        }
        thresholds.sort_by(|a, b| a.min_staked.cmp(&b.min_staked));

        if thresholds[0].min_staked != Decimal::ZERO {
            return Err(TeoError::Configuration(
                "lowest tier must start at a staked balance of 0".to_string(),
            ));
        }
        for pair in thresholds.windows(2) {
            if pair[0].min_staked == pair[1].min_staked {
                return Err(TeoError::Configuration(format!(
                    "tiers {} and {} share threshold {}",
                    pair[0].tier, pair[1].tier, pair[0].min_staked
                )));
            }
        }
        for threshold in &thresholds {
            if threshold.commission_rate < Decimal::ZERO || threshold.commission_rate > Decimal::ONE {
                return Err(TeoError::Configuration(format!(
                    "commission rate {} of tier {} is outside [0, 1]",
                    threshold.commission_rate, threshold.tier
                )));
            }
        }

        Ok(Self { thresholds })
    }

    /// Tier and commission rate for a staked balance
    pub fn classify(&self, staked: Decimal) -> TierThreshold {
        self.thresholds
            .iter()
            .rev()
            .find(|t| staked >= t.min_staked)
            .copied()
            .unwrap_or(self.thresholds[0])
    }

    pub fn thresholds(&self) -> &[TierThreshold] {
        &self.thresholds
    }
}

impl Default for TierTable {
    fn default() -> Self {
        Self {
            thresholds: default_tiers(),
        }
    }
}

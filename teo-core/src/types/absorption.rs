//! Discount absorption opportunities
//!
//! State machine: pending → absorbed | refused | expired. Resolved once.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::common::{CourseId, OpportunityId, UserId};
use crate::error::{TeoError, TeoResult};

/// Staking tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StakingTier {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl StakingTier {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
            Self::Diamond => "diamond",
        }
    }
}

impl std::fmt::Display for StakingTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Opportunity status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AbsorptionStatus {
    #[default]
    Pending,
    Absorbed,
    Refused,
    Expired,
}

impl AbsorptionStatus {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Absorbed => "absorbed",
            Self::Refused => "refused",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for AbsorptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Teacher's decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbsorptionChoice {
    /// Take TEO instead of the fiat commission
    Absorb,
    /// Keep the fiat commission
    Refuse,
}

impl AbsorptionChoice {
    fn target_status(&self) -> AbsorptionStatus {
        match self {
            Self::Absorb => AbsorptionStatus::Absorbed,
            Self::Refuse => AbsorptionStatus::Refused,
        }
    }
}

/// Split of a discounted sale under one outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeOption {
    /// Fiat paid to the teacher
    pub teacher_eur: Decimal,
    /// Fiat kept by the platform
    pub platform_eur: Decimal,
    /// TEO credited to the teacher
    pub teacher_teo: Decimal,
}

/// Absorption opportunity row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbsorptionOpportunity {
    pub id: OpportunityId,
    pub teacher: UserId,
    pub student: UserId,
    pub course: CourseId,
    pub course_price: Decimal,
    pub discount_percentage: u32,
    pub teo_used_by_student: Decimal,
    pub discount_amount: Decimal,
    /// Tier at creation time
    pub teacher_tier: StakingTier,
    /// Platform commission at creation time
    pub commission_rate: Decimal,
    /// Refuse outcome
    pub option_a: OutcomeOption,
    /// Absorb outcome
    pub option_b: OutcomeOption,
    pub status: AbsorptionStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default)]
    pub decided_at: Option<DateTime<Utc>>,
}

impl AbsorptionOpportunity {
    /// Whether the decision window has elapsed
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Apply a teacher decision
    pub fn resolve(&mut self, choice: AbsorptionChoice, now: DateTime<Utc>) -> TeoResult<()> {
        self.transition_to(choice.target_status(), now)
    }

    /// Apply timeout resolution
    pub fn expire(&mut self, now: DateTime<Utc>) -> TeoResult<()> {
        self.transition_to(AbsorptionStatus::Expired, now)
    }

    fn transition_to(&mut self, target: AbsorptionStatus, now: DateTime<Utc>) -> TeoResult<()> {
        if self.status.is_terminal() || !target.is_terminal() {
            return Err(TeoError::InvalidTransition {
                entity: "absorption".to_string(),
                id: self.id.to_string(),
                from: self.status.to_string(),
                to: target.to_string(),
            });
        }
        self.status = target;
        self.decided_at = Some(now);
        Ok(())
    }
}

//! Basic Types
//!
//! Naming conventions:
//! - `_id` suffix: Primary key identifiers
//! - `_at` suffix: UTC timestamps

use chrono::{DateTime, Duration, NaiveTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

use crate::error::{TeoError, TeoResult};

/// Maximum fractional digits of a ledger amount
pub const AMOUNT_SCALE: u32 = 8;

/// Largest amount a single ledger operation accepts, in whole TEO
pub const MAX_AMOUNT_TEO: i64 = 1_000_000_000_000_000;

// ============================================================
// ID Types
// ============================================================

/// User ID
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Course ID
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseId(pub u64);

impl std::fmt::Display for CourseId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "course:{}", self.0)
    }
}

macro_rules! generated_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Generate a fresh random ID
            pub fn generate() -> Self {
                Self(format!("{}_{}", $prefix, uuid::Uuid::new_v4().simple()))
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

generated_id!(
    /// Ledger transaction ID
    TransactionId,
    "tx"
);
generated_id!(
    /// Withdrawal request ID
    WithdrawalId,
    "wd"
);
generated_id!(
    /// Absorption opportunity ID
    OpportunityId,
    "abs"
);

// ============================================================
// Amounts
// ============================================================

/// Check that a caller-supplied amount is positive and not over-precise
pub fn validate_amount(amount: Decimal) -> TeoResult<()> {
    if amount <= Decimal::ZERO {
        return Err(TeoError::invalid_amount(format!(
            "amount must be positive, got {}",
            amount
        )));
    }
    if amount > Decimal::from(MAX_AMOUNT_TEO) {
        return Err(TeoError::invalid_amount(format!(
            "amount {} exceeds the per-operation maximum of {}",
            amount, MAX_AMOUNT_TEO
        )));
    }
    if amount.normalize().scale() > AMOUNT_SCALE {
        return Err(TeoError::invalid_amount(format!(
            "amount {} has more than {} decimal places",
            amount, AMOUNT_SCALE
        )));
    }
    Ok(())
}

/// Round a computed amount toward zero to ledger precision
pub fn round_amount(amount: Decimal) -> Decimal {
    amount
        .round_dp_with_strategy(AMOUNT_SCALE, RoundingStrategy::ToZero)
        .normalize()
}

// ============================================================
// Time
// ============================================================

/// Time source
///
/// Engines read time through this so decision windows and daily limits
/// can be driven deterministically.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = at;
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(|e| e.into_inner());
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Start of the UTC day containing `at`
pub fn day_start(at: DateTime<Utc>) -> DateTime<Utc> {
    at.date_naive().and_time(NaiveTime::MIN).and_utc()
}

/// Start of the next UTC day
pub fn next_day_start(at: DateTime<Utc>) -> DateTime<Utc> {
    day_start(at) + Duration::days(1)
}

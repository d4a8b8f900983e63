//! Withdrawal limit accounting
//!
//! Days are UTC. The request count includes cancelled requests; the daily
//! amount does not.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::WithdrawalLimits;
use crate::error::{TeoError, TeoResult};
use crate::types::{day_start, next_day_start, WithdrawalRequest};

/// A user's withdrawal usage for the current UTC day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyUsage {
    /// Requests created today
    pub count: u32,
    /// Amount requested today, cancelled requests excluded
    pub amount: Decimal,
    /// Pending or processing requests, any day
    pub open_requests: u32,
    /// Next UTC midnight
    pub resets_at: DateTime<Utc>,
}

impl DailyUsage {
    /// Compute from all of a user's requests
    pub fn compute(requests: &[WithdrawalRequest], now: DateTime<Utc>) -> Self {
        let today = day_start(now);
        let mut usage = Self {
            count: 0,
            amount: Decimal::ZERO,
            open_requests: 0,
            resets_at: next_day_start(now),
        };
        for request in requests {
            if request.status.is_open() {
                usage.open_requests += 1;
            }
            if request.created_at >= today {
                usage.count += 1;
                if request.counts_toward_daily_amount() {
                    usage.amount += request.amount;
                }
            }
        }
        usage
    }
}

fn limit_exceeded(limit: &str, detail: String, resets_at: Option<DateTime<Utc>>) -> TeoError {
    TeoError::LimitExceeded {
        limit: limit.to_string(),
        detail,
        resets_at,
    }
}

/// Check that an amount lies in `[min_amount, max_amount]`
pub fn check_range(limits: &WithdrawalLimits, amount: Decimal) -> TeoResult<()> {
    if amount < limits.min_amount {
        return Err(limit_exceeded(
            "min_amount",
            format!("{} is below the minimum withdrawal of {}", amount, limits.min_amount),
            None,
        ));
    }
    if amount > limits.max_amount {
        return Err(limit_exceeded(
            "max_amount",
            format!("{} exceeds the maximum withdrawal of {}", amount, limits.max_amount),
            None,
        ));
    }
    Ok(())
}

/// Check daily count, daily amount and concurrency, in that order
pub fn check_usage(limits: &WithdrawalLimits, usage: &DailyUsage, amount: Decimal) -> TeoResult<()> {
    if usage.count >= limits.max_daily_requests {
        return Err(limit_exceeded(
            "max_daily_requests",
            format!("{} of {} daily requests used", usage.count, limits.max_daily_requests),
            Some(usage.resets_at),
        ));
    }
    if usage.amount + amount > limits.max_daily_amount {
        return Err(limit_exceeded(
            "max_daily_amount",
            format!(
                "{} already requested today, {} more exceeds {}",
                usage.amount, amount, limits.max_daily_amount
            ),
            Some(usage.resets_at),
        ));
    }
    if usage.open_requests >= limits.max_concurrent {
        return Err(limit_exceeded(
            "max_concurrent",
            format!("{} requests already open", usage.open_requests),
            None,
        ));
    }
    Ok(())
}

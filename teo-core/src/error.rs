//! TeoCoin Core Error Codes
//!
//! Error code format: TEO-{module}-{sequence}
//! - TEO-LEDGER: Balance ledger errors
//! - TEO-WD: Withdrawal pipeline errors
//! - TEO-ABS: Discount absorption errors
//! - TEO-AUTH: Authorization errors
//! - TEO-RAIL: Payment rail errors
//! - TEO-STORE: Storage errors

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use teo_signer::SignerError;
use thiserror::Error;

/// Core result type
pub type TeoResult<T> = Result<T, TeoError>;

/// Error kind, the stable classification callers branch on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidAmount,
    InsufficientBalance,
    InsufficientStake,
    LimitExceeded,
    InvalidAddress,
    NotFound,
    Forbidden,
    CannotCancel,
    InvalidTransition,
    InvalidState,
    Expired,
    SignatureMismatch,
    Replayed,
    SignatureRejected,
    NotLinked,
    ExternalRailFailure,
    Storage,
    Configuration,
}

/// Core error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TeoError {
    // ============================================================
    // Ledger Errors (TEO-LEDGER-*)
    // ============================================================
    /// [TEO-LEDGER-001] Non-positive or malformed amount
    #[error("[TEO-LEDGER-001] Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    /// [TEO-LEDGER-002] Available balance too low
    #[error("[TEO-LEDGER-002] Insufficient balance: required {required}, available {available}")]
    InsufficientBalance { required: Decimal, available: Decimal },

    /// [TEO-LEDGER-003] Staked balance too low
    #[error("[TEO-LEDGER-003] Insufficient stake: required {required}, staked {staked}")]
    InsufficientStake { required: Decimal, staked: Decimal },

    /// [TEO-LEDGER-004] A bucket would go negative
    #[error("[TEO-LEDGER-004] Invariant violation: {details}")]
    InvariantViolation { details: String },

    // ============================================================
    // Withdrawal Errors (TEO-WD-*)
    // ============================================================
    /// [TEO-WD-001] Daily count, daily amount, concurrency or range cap
    #[error("[TEO-WD-001] Limit exceeded ({limit}): {detail}")]
    LimitExceeded {
        limit: String,
        detail: String,
        resets_at: Option<DateTime<Utc>>,
    },

    /// [TEO-WD-002] Destination address not accepted by the rail
    #[error("[TEO-WD-002] Invalid address: {address}")]
    InvalidAddress { address: String },

    /// [TEO-WD-003] Request is not pending
    #[error("[TEO-WD-003] Cannot cancel withdrawal {id} in status {status}")]
    CannotCancel { id: String, status: String },

    /// [TEO-WD-004] Illegal state transition
    #[error("[TEO-WD-004] Invalid transition for {entity} {id}: {from} -> {to}")]
    InvalidTransition {
        entity: String,
        id: String,
        from: String,
        to: String,
    },

    // ============================================================
    // Absorption Errors (TEO-ABS-*)
    // ============================================================
    /// [TEO-ABS-001] Decision window elapsed
    #[error("[TEO-ABS-001] Opportunity {id} expired at {expires_at}")]
    Expired { id: String, expires_at: DateTime<Utc> },

    // ============================================================
    // Authorization Errors (TEO-AUTH-*)
    // ============================================================
    /// [TEO-AUTH-001] Recovered signer differs from claimed actor
    #[error("[TEO-AUTH-001] Signature mismatch: {detail}")]
    SignatureMismatch { detail: String },

    /// [TEO-AUTH-002] Signature or nonce already consumed
    #[error("[TEO-AUTH-002] Authorization replayed: {detail}")]
    Replayed { detail: String },

    /// [TEO-AUTH-003] Malformed, expired or unprocessable authorization
    #[error("[TEO-AUTH-003] Authorization rejected: {detail}")]
    SignatureRejected { detail: String },

    /// [TEO-AUTH-004] No wallet linked to user
    #[error("[TEO-AUTH-004] No wallet linked to user {user}")]
    NotLinked { user: String },

    // ============================================================
    // Rail Errors (TEO-RAIL-*)
    // ============================================================
    /// [TEO-RAIL-001] Payment rail did not confirm
    #[error("[TEO-RAIL-001] External rail failure: {reason}")]
    ExternalRailFailure { reason: String },

    // ============================================================
    // General Errors
    // ============================================================
    /// Entity not found
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// Entity belongs to someone else
    #[error("{entity} {id} does not belong to {user}")]
    Forbidden { entity: String, id: String, user: String },

    /// Invalid state
    #[error("Invalid state: {reason}")]
    InvalidState { reason: String },

    /// [TEO-STORE-001] Storage error
    #[error("[TEO-STORE-001] Storage error: {0}")]
    Storage(String),

    /// [TEO-STORE-002] Serialization error
    #[error("[TEO-STORE-002] Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl TeoError {
    /// Stable classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidAmount { .. } => ErrorKind::InvalidAmount,
            Self::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Self::InsufficientStake { .. } => ErrorKind::InsufficientStake,
            Self::InvariantViolation { .. } => ErrorKind::InvalidState,
            Self::LimitExceeded { .. } => ErrorKind::LimitExceeded,
            Self::InvalidAddress { .. } => ErrorKind::InvalidAddress,
            Self::CannotCancel { .. } => ErrorKind::CannotCancel,
            Self::InvalidTransition { .. } => ErrorKind::InvalidTransition,
            Self::Expired { .. } => ErrorKind::Expired,
            Self::SignatureMismatch { .. } => ErrorKind::SignatureMismatch,
            Self::Replayed { .. } => ErrorKind::Replayed,
            Self::SignatureRejected { .. } => ErrorKind::SignatureRejected,
            Self::NotLinked { .. } => ErrorKind::NotLinked,
            Self::ExternalRailFailure { .. } => ErrorKind::ExternalRailFailure,
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::InvalidState { .. } => ErrorKind::InvalidState,
            Self::Storage(_) | Self::Serialization(_) => ErrorKind::Storage,
            Self::Configuration(_) => ErrorKind::Configuration,
        }
    }

    /// Whether retrying the same request may succeed
    ///
    /// A failed withdrawal has already returned its funds, so the whole
    /// request can be resubmitted.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ExternalRailFailure { .. } | Self::Storage(_)
        )
    }

    /// Whether the rejection indicates possible misuse
    pub fn is_security(&self) -> bool {
        matches!(self, Self::SignatureMismatch { .. } | Self::Replayed { .. })
    }

    /// Create a not found error
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Create a forbidden error
    pub fn forbidden(entity: impl Into<String>, id: impl Into<String>, user: impl Into<String>) -> Self {
        Self::Forbidden {
            entity: entity.into(),
            id: id.into(),
            user: user.into(),
        }
    }

    /// Create an invalid amount error
    pub fn invalid_amount(reason: impl Into<String>) -> Self {
        Self::InvalidAmount {
            reason: reason.into(),
        }
    }
}

impl From<SignerError> for TeoError {
    fn from(err: SignerError) -> Self {
        match err {
            SignerError::Mismatch { .. } => Self::SignatureMismatch {
                detail: err.to_string(),
            },
            SignerError::Replayed { .. } => Self::Replayed {
                detail: err.to_string(),
            },
            SignerError::Configuration(msg) => Self::Configuration(msg),
            other => Self::SignatureRejected {
                detail: other.to_string(),
            },
        }
    }
}

impl From<serde_json::Error> for TeoError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<sled::Error> for TeoError {
    fn from(err: sled::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

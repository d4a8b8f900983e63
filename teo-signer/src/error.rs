//! Error types for the TeoCoin signer

use alloy_primitives::Address;
use thiserror::Error;

/// Signer errors
///
/// `Mismatch` and `Replayed` are security rejections: they indicate that
/// someone presented a signature they do not own, or presented one twice.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    /// [TEO-SIG-001] Signature bytes or request envelope are malformed
    #[error("[TEO-SIG-001] Malformed authorization: {0}")]
    Malformed(String),

    /// [TEO-SIG-002] Recovered signer differs from the claimed actor
    #[error("[TEO-SIG-002] Signature mismatch: expected {expected}, recovered {recovered}")]
    Mismatch { expected: Address, recovered: Address },

    /// [TEO-SIG-003] Signature or nonce already consumed
    #[error("[TEO-SIG-003] Authorization replayed: actor {actor}, nonce {nonce}")]
    Replayed { actor: Address, nonce: u64 },

    /// [TEO-SIG-004] Deadline already passed
    #[error("[TEO-SIG-004] Authorization expired at {deadline}")]
    Expired { deadline: u64 },

    /// [TEO-SIG-005] Replay cache is full of live entries
    #[error("[TEO-SIG-005] Replay cache full ({capacity} live entries)")]
    CacheFull { capacity: usize },

    /// [TEO-SIG-006] Operation parameters cannot be encoded
    #[error("[TEO-SIG-006] Encoding error: {0}")]
    Encoding(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl SignerError {
    /// Whether this rejection indicates possible misuse rather than a
    /// client mistake
    pub fn is_security(&self) -> bool {
        matches!(self, Self::Mismatch { .. } | Self::Replayed { .. })
    }
}

/// Result type for signer operations
pub type SignerResult<T> = Result<T, SignerError>;

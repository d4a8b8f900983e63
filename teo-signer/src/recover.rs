//! Signer recovery over secp256k1
//!
//! Signatures are the 65-byte `r || s || v` form produced by wallets, with
//! `v` either 0/1 or 27/28.

use alloy_primitives::{keccak256, Address, B256};
use k256::ecdsa::{RecoveryId, Signature, SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;

use crate::error::{SignerError, SignerResult};
use crate::message::signing_digest;

/// Length of a recoverable signature
pub const SIGNATURE_LEN: usize = 65;

/// A parsed recoverable signature
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoverableSignature {
    signature: Signature,
    recovery_id: RecoveryId,
}

impl RecoverableSignature {
    /// Parse from `0x`-prefixed or bare hex
    pub fn from_hex(s: &str) -> SignerResult<Self> {
        let trimmed = s.trim();
        let stripped = trimmed.strip_prefix("0x").unwrap_or(trimmed);
        let bytes = hex::decode(stripped)
            .map_err(|e| SignerError::Malformed(format!("signature is not hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Parse from raw bytes
    pub fn from_bytes(bytes: &[u8]) -> SignerResult<Self> {
        if bytes.len() != SIGNATURE_LEN {
            return Err(SignerError::Malformed(format!(
                "invalid signature length: expected {}, got {}",
                SIGNATURE_LEN,
                bytes.len()
            )));
        }

        let v = match bytes[64] {
            27 | 28 => bytes[64] - 27,
            0 | 1 => bytes[64],
            other => {
                return Err(SignerError::Malformed(format!("invalid recovery byte {}", other)))
            }
        };
        let recovery_id = RecoveryId::from_byte(v)
            .ok_or_else(|| SignerError::Malformed(format!("invalid recovery id {}", v)))?;
        let signature = Signature::from_slice(&bytes[..64])
            .map_err(|e| SignerError::Malformed(format!("invalid signature scalars: {}", e)))?;

        Ok(Self { signature, recovery_id })
    }

    /// Canonical 65-byte form with `v` in 27/28
    pub fn to_bytes(&self) -> [u8; SIGNATURE_LEN] {
        let mut out = [0u8; SIGNATURE_LEN];
        out[..64].copy_from_slice(&self.signature.to_bytes());
        out[64] = self.recovery_id.to_byte() + 27;
        out
    }

    /// Canonical lowercase hex, the replay-cache key
    pub fn to_hex(&self) -> String {
        format!("0x{}", hex::encode(self.to_bytes()))
    }

    /// Recover the address that signed `message_hash` (EIP-191 wrapped)
    pub fn recover(&self, message_hash: &B256) -> SignerResult<Address> {
        let digest = signing_digest(message_hash);
        let key = VerifyingKey::recover_from_prehash(digest.as_slice(), &self.signature, self.recovery_id)
            .map_err(|e| SignerError::Malformed(format!("recovery failed: {}", e)))?;
        Ok(address_of(&key))
    }
}

/// Ethereum-style address of a public key
pub fn address_of(key: &VerifyingKey) -> Address {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    Address::from_slice(&hash[12..])
}

/// Local secp256k1 signer
///
/// Used by tests and tooling to produce signatures the way a wallet would.
pub struct LocalSigner {
    key: SigningKey,
    address: Address,
}

impl LocalSigner {
    /// Create from raw 32-byte secret
    pub fn from_bytes(secret: &[u8]) -> SignerResult<Self> {
        let key = SigningKey::from_slice(secret)
            .map_err(|e| SignerError::Malformed(format!("invalid secret key: {}", e)))?;
        let address = address_of(key.verifying_key());
        Ok(Self { key, address })
    }

    /// Create from hex-encoded secret
    pub fn from_secret_hex(secret_hex: &str) -> SignerResult<Self> {
        let stripped = secret_hex.strip_prefix("0x").unwrap_or(secret_hex);
        let bytes = hex::decode(stripped)
            .map_err(|e| SignerError::Malformed(format!("secret is not hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// Address of this signer
    pub fn address(&self) -> Address {
        self.address
    }

    /// Sign a canonical message hash the way a wallet's personal_sign does
    pub fn sign(&self, message_hash: &B256) -> SignerResult<RecoverableSignature> {
        let digest = signing_digest(message_hash);
        let (signature, recovery_id) = self
            .key
            .sign_prehash_recoverable(digest.as_slice())
            .map_err(|e| SignerError::Malformed(format!("signing failed: {}", e)))?;
        Ok(RecoverableSignature { signature, recovery_id })
    }
}

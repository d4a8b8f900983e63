//! Canonical message layout
//!
//! The hash an actor signs is keccak-256 over the packed tuple:
//!
//! ```text
//! actor (20) | op tag (1) | op params | contract (20) | chain id (32) | nonce (32) | deadline (32)
//! ```
//!
//! Any external verifier recomputes exactly this layout, so field order and
//! inclusion must never change without a new contract deployment. The actor
//! signs the EIP-191 personal-message digest of the hash.

use alloy_primitives::{eip191_hash_message, keccak256, Address, B256, U256};
use std::str::FromStr;

use crate::error::{SignerError, SignerResult};
use crate::operation::AuthorizedOperation;

/// Contract and network identity bound into every message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageDomain {
    /// Authorizing contract
    pub contract: Address,
    /// Network (chain) id
    pub chain_id: u64,
}

impl MessageDomain {
    /// Create a domain
    pub fn new(contract: Address, chain_id: u64) -> Self {
        Self { contract, chain_id }
    }

    /// Parse the contract address from its hex form
    pub fn parse(contract: &str, chain_id: u64) -> SignerResult<Self> {
        let contract = Address::from_str(contract.trim()).map_err(|e| {
            SignerError::Configuration(format!("invalid contract address {}: {}", contract, e))
        })?;
        Ok(Self::new(contract, chain_id))
    }

    /// Build the canonical hash for an operation
    pub fn build_message(
        &self,
        operation: &AuthorizedOperation,
        actor: Address,
        nonce: u64,
        deadline: u64,
    ) -> SignerResult<B256> {
        let mut packed = Vec::with_capacity(256);
        packed.extend_from_slice(actor.as_slice());
        packed.push(operation.tag());
        operation.encode_params(&mut packed)?;
        packed.extend_from_slice(self.contract.as_slice());
        packed.extend_from_slice(&U256::from(self.chain_id).to_be_bytes::<32>());
        packed.extend_from_slice(&U256::from(nonce).to_be_bytes::<32>());
        packed.extend_from_slice(&U256::from(deadline).to_be_bytes::<32>());
        Ok(keccak256(&packed))
    }
}

/// EIP-191 digest of a message hash, the value actually signed
pub fn signing_digest(message_hash: &B256) -> B256 {
    eip191_hash_message(message_hash)
}

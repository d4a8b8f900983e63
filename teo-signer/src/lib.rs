//! TeoCoin Gas-Free Authorization
//!
//! Lets a party approve a financial action by signing a message instead of
//! submitting a transaction themselves.
//!
//! Components:
//! - Canonical message layout bound to contract and network identity
//! - secp256k1 signer recovery (EIP-191 personal messages)
//! - Bounded, TTL-expiring replay cache keyed by signature and nonce
//!
//! # Flow
//!
//! ```text
//! client: hash = build_message(op, actor, nonce, deadline); sig = personal_sign(hash)
//! server: validate(request) -> recover(sig, hash) == actor -> consume(sig) -> receipt
//! ```

pub mod error;
pub mod message;
pub mod operation;
pub mod recover;
pub mod replay;
pub mod service;

pub use error::*;
pub use message::*;
pub use operation::*;
pub use recover::*;
pub use replay::*;
pub use service::*;

pub use alloy_primitives::{Address, B256};

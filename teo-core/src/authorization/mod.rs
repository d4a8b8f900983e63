//! Gas-free authorization
//!
//! Executes operations a wallet approved by signature. Message layout,
//! recovery and replay protection live in `teo_signer`; this module binds
//! the recovered wallet to a platform user and performs the ledger effect.

mod executor;

pub use executor::*;

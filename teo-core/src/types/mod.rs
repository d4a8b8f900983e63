//! Core data types

mod absorption;
mod balance;
mod common;
mod transaction;
mod withdrawal;

pub use absorption::*;
pub use balance::*;
pub use common::*;
pub use transaction::*;
pub use withdrawal::*;

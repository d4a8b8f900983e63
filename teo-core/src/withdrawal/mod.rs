//! Withdrawal Pipeline
//!
//! Moves ledger balance out to the payment rail.
//!
//! # Core components
//!
//! - `WithdrawalPipeline`: request creation, cancellation and every status
//!   transition, each under the owner's account session
//! - `WithdrawalProcessor`: drains pending requests through the rail and
//!   re-drives requests stuck in processing
//! - `DailyUsage`: per-UTC-day request count and amount used by the limits
//!
//! # State machine
//!
//! ```text
//! pending → processing → completed
//!    │           └─────→ failed
//!    ├─────────────────→ failed
//!    └─────────────────→ cancelled
//! ```
//!
//! # Invariants
//!
//! - An open request's amount sits in pending_withdrawal
//! - Completion removes value from the ledger; failure and cancellation
//!   return it to available
//! - Limit checks and the reservation happen under the owner's lock
//! - The rail is never called while an account lock is held

mod limits;
mod pipeline;
mod processor;

pub use limits::*;
pub use pipeline::*;
pub use processor::*;

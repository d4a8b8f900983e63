//! Discount Absorption Engine
//!
//! When a student pays part of a course with TEO, the course's teacher gets
//! a time-boxed choice: keep the fiat commission (option A) or give it to
//! the platform in exchange for the student's TEO plus a bonus (option B).
//!
//! State machine: pending → absorbed | refused | expired
//!
//! Core invariants:
//! - Resolved exactly once
//! - Only absorb moves ledger value, and only option B's TEO
//! - Tier and commission rate are fixed at creation

mod engine;
mod tiers;

pub use engine::*;
pub use tiers::*;

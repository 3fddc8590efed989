//! # API Route Modules
//!
//! - `payments`: gateway callback intake and transaction lookup.
//! - `orders`: order ledger reads.
//! - `reports`: gap-free revenue series for venue dashboards.

pub mod orders;
pub mod payments;
pub mod reports;

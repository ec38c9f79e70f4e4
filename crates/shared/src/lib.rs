#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Casaflow Shared Types
//!
//! Types and helpers used across the API server, billing engine, and
//! background worker: plan tier/status enums and database pool setup.

pub mod db;
pub mod tiers;

pub use db::{create_pool, run_migrations};
pub use tiers::{PlanStatus, PlanTier, SubscriptionStatus, TierParseError};

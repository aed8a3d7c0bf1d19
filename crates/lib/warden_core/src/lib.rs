//! # warden_core
//!
//! Dual-mode admission and authorization for Warden: token service, quota
//! ledger, rate limiter, CSRF guard, and the mode selector that picks local
//! or delegated backends at startup.

pub mod audit;
pub mod auth;
pub mod clock;
pub mod config;
pub mod csrf;
pub mod db;
pub mod delegated;
pub mod migrate;
pub mod mode;
pub mod models;
pub mod quota;
pub mod ratelimit;
pub mod services;
pub mod uuid;

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

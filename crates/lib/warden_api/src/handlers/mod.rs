//! Request handlers.

pub mod analyses;
pub mod auth;
pub mod health;
pub mod usage;

//! Domain models shared across services.

pub mod auth;
pub mod quota;

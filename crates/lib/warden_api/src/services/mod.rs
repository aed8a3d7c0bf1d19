//! Request-scoped helpers shared by handlers.

pub mod cookies;

//! Request middleware, applied outermost first: rate limit, CSRF, auth.

pub mod auth;
pub mod csrf;
pub mod rate_limit;

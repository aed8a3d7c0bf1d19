//! Route paths served by the router.

pub const GET_HEALTH: &str = "/health";
pub const GET_AUTH_CONFIG: &str = "/api/v1/auth/config";
pub const GET_AUTH_CSRF: &str = "/api/v1/auth/csrf";
pub const POST_AUTH_LOGIN: &str = "/api/v1/auth/login";
pub const POST_AUTH_REGISTER: &str = "/api/v1/auth/register";
pub const POST_AUTH_REFRESH: &str = "/api/v1/auth/refresh";
pub const POST_AUTH_LOGOUT: &str = "/api/v1/auth/logout";
pub const GET_SUBSCRIPTION_USAGE: &str = "/api/v1/subscription/usage";
pub const POST_ANALYSES: &str = "/api/v1/analyses";
pub const POST_USER_PASSWORD: &str = "/api/v1/user/password";

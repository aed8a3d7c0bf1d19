//! Subscription usage statistics.

use axum::extract::State;
use axum::{Extension, Json};
use warden_core::models::quota::ResourceKind;

use crate::AppState;
use crate::error::AppResult;
use crate::middleware::auth::AuthenticatedUser;
use crate::models::UsageResponse;

/// `GET /api/v1/subscription/usage`: current period consumption. Read-only.
pub async fn usage_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(principal)): Extension<AuthenticatedUser>,
) -> AppResult<Json<UsageResponse>> {
    let quota = &state.services.quota;
    let window = quota.remaining(&principal, ResourceKind::Analyses).await?;

    Ok(Json(UsageResponse {
        tier: principal.tier.as_str().to_string(),
        resource: window.resource.as_str().to_string(),
        used: window.used,
        limit: window.limit.as_i64(),
        period_start: window.period_start.timestamp_millis(),
        period_end: window.period_end.timestamp_millis(),
        history_days: quota.policy().history_days(principal.tier),
    }))
}

//! Metered business endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use tracing::info;
use warden_core::models::quota::{QuotaDecision, ResourceKind};
use warden_core::uuid::uuidv7;

use crate::AppState;
use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthenticatedUser;
use crate::models::AnalysisAccepted;

/// `POST /api/v1/analyses`: charge one analysis and accept the job.
///
/// The unit is charged at admission and is not refunded if the work fails
/// later.
pub async fn create_analysis_handler(
    State(state): State<AppState>,
    Extension(AuthenticatedUser(principal)): Extension<AuthenticatedUser>,
) -> AppResult<(StatusCode, Json<AnalysisAccepted>)> {
    let decision = state
        .services
        .quota
        .check_and_consume(&principal, ResourceKind::Analyses, 1)
        .await?;

    match decision {
        QuotaDecision::Allowed { window } => {
            let id = uuidv7();
            info!(principal = %principal.id, analysis = %id, used = window.used, "analysis accepted");
            Ok((
                StatusCode::ACCEPTED,
                Json(AnalysisAccepted {
                    id,
                    status: "accepted".into(),
                    remaining: window.remaining(),
                }),
            ))
        }
        QuotaDecision::Exceeded { window } => {
            let retry_after = (window.period_end - Utc::now()).to_std().unwrap_or_default();
            Err(AppError::QuotaExceeded {
                retry_after,
                reset_at: window.period_end.timestamp_millis(),
            })
        }
    }
}

use axum::{extract::State, response::IntoResponse, Json};
use chrono::Utc;

use crate::error::AppError;
use crate::AppState;

/// Runs one auto-release batch immediately.
pub async fn run_auto_release(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let report = state.tracker.auto_release(Utc::now()).await?;
    tracing::info!(
        released = report.released.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Manual auto-release triggered"
    );
    Ok(Json(report))
}

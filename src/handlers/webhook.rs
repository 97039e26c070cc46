use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    response::IntoResponse,
    Json,
};
use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use crate::error::AppError;
use crate::gateway::webhook::{verify_signature, GatewayEvent, SIGNATURE_HEADER};
use crate::services::EscrowError;
use crate::AppState;

/// Receives signed gateway events and settles the referenced escrow.
///
/// Events that do not settle a payment, reference an unknown payment, or
/// arrive after the transaction already left `pending` are acknowledged so
/// the gateway stops redelivering them. Gateway and store failures are not
/// acknowledged.
pub async fn gateway_event(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|h| h.to_str().ok())
        .ok_or_else(|| AppError::Unauthorized("missing webhook signature".to_string()))?;

    verify_signature(&state.webhook_secret, signature, &body, Utc::now().timestamp()).map_err(
        |e| {
            warn!(error = %e, "Rejected gateway webhook");
            AppError::Unauthorized(format!("invalid webhook signature: {}", e))
        },
    )?;

    let event: GatewayEvent = serde_json::from_slice(&body)
        .map_err(|e| AppError::Validation(format!("malformed event: {}", e)))?;

    let Some(payment_reference) = event.settled_payment() else {
        info!(event_id = %event.id, event_type = %event.event_type, "Ignoring gateway event");
        return Ok(Json(json!({ "received": true })));
    };

    let Some(tx) = state.tracker.find_by_payment_intent(payment_reference).await? else {
        warn!(event_id = %event.id, payment = %payment_reference, "Event for unknown payment");
        return Ok(Json(json!({ "received": true })));
    };

    match state.tracker.confirm(tx.id).await {
        Ok(updated) => {
            info!(event_id = %event.id, escrow_id = updated.id, status = %updated.status, "Gateway event applied");
        }
        Err(EscrowError::InvalidStateTransition { current, .. }) => {
            info!(event_id = %event.id, escrow_id = tx.id, %current, "Gateway event already applied");
        }
        Err(e) => return Err(e.into()),
    }

    Ok(Json(json!({ "received": true })))
}

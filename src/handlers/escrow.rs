use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};

use crate::domain::{EscrowStatus, EscrowTransaction, HistoryEntry};
use crate::error::AppError;
use crate::services::{Caller, CreateEscrowRequest, EscrowError};
use crate::validation::{
    normalize_country, normalize_currency, optional_text, validate_email,
    validate_positive_amount, DESCRIPTION_MAX_LEN, REASON_MAX_LEN,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub country: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionRequest {
    pub payee_id: i64,
    pub amount: i64,
    pub currency: String,
    pub job_posting_id: Option<i64>,
    pub booking_id: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTransactionResponse {
    pub transaction_id: i64,
    pub client_secret: String,
    pub amount: i64,
    pub commission: i64,
    pub payout: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReleaseRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RefundRequest {
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub status: EscrowStatus,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefundResponse {
    pub success: bool,
    pub refund_reference: String,
}

#[derive(Debug, Serialize)]
pub struct TransactionDetail {
    pub transaction: EscrowTransaction,
    pub history: Vec<HistoryEntry>,
}

pub async fn create_account(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<CreateAccountRequest>,
) -> Result<impl IntoResponse, AppError> {
    let country = normalize_country(&payload.country)?;
    let email = payload.email.trim().to_string();
    validate_email(&email)?;

    let account = state
        .payouts
        .provision(caller.user_id, &country, &email)
        .await?;
    Ok(Json(account))
}

pub async fn account_status(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    let status = state.payouts.status(caller.user_id).await?;
    Ok(Json(status))
}

pub async fn create_transaction(
    State(state): State<AppState>,
    caller: Caller,
    Json(payload): Json<CreateTransactionRequest>,
) -> Result<impl IntoResponse, AppError> {
    validate_positive_amount(payload.amount)?;
    let currency = normalize_currency(&payload.currency)?;
    let description = optional_text(
        "description",
        payload.description.as_deref(),
        DESCRIPTION_MAX_LEN,
    )?;

    let created = state
        .tracker
        .create(CreateEscrowRequest {
            payer_id: caller.user_id,
            payee_id: payload.payee_id,
            amount: payload.amount,
            currency,
            job_posting_id: payload.job_posting_id,
            booking_id: payload.booking_id,
            description,
        })
        .await?;

    let tx = &created.transaction;
    Ok((
        StatusCode::CREATED,
        Json(CreateTransactionResponse {
            transaction_id: tx.id,
            client_secret: created.client_secret.clone(),
            amount: tx.amount,
            commission: tx.platform_commission_amount,
            payout: tx.payee_payout_amount,
        }),
    ))
}

pub async fn list_transactions(
    State(state): State<AppState>,
    caller: Caller,
) -> Result<impl IntoResponse, AppError> {
    let transactions = state.tracker.list_for_party(caller.user_id).await?;
    Ok(Json(transactions))
}

pub async fn get_transaction(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    let (transaction, history) = state.tracker.get_with_history(id, caller).await?;
    Ok(Json(TransactionDetail {
        transaction,
        history,
    }))
}

pub async fn confirm_transaction(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, AppError> {
    require_payer(&state, caller, id).await?;
    let tx = state.tracker.confirm(id).await?;
    Ok(Json(StatusResponse {
        success: true,
        status: tx.status,
    }))
}

pub async fn release_transaction(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
    body: Bytes,
) -> Result<impl IntoResponse, AppError> {
    // The body is optional, but a body that is present must parse.
    let payload = if body.iter().all(u8::is_ascii_whitespace) {
        ReleaseRequest::default()
    } else {
        serde_json::from_slice::<ReleaseRequest>(&body)
            .map_err(|e| AppError::Validation(format!("invalid release body: {}", e)))?
    };
    let reason = optional_text("reason", payload.reason.as_deref(), REASON_MAX_LEN)?;

    require_payer(&state, caller, id).await?;
    let tx = state
        .tracker
        .release(id, Some(caller.user_id), reason)
        .await?;
    Ok(Json(StatusResponse {
        success: true,
        status: tx.status,
    }))
}

pub async fn refund_transaction(
    State(state): State<AppState>,
    caller: Caller,
    Path(id): Path<i64>,
    Json(payload): Json<RefundRequest>,
) -> Result<impl IntoResponse, AppError> {
    let reason = optional_text("reason", Some(&payload.reason), REASON_MAX_LEN)?
        .ok_or_else(|| AppError::Validation("reason: must not be empty".to_string()))?;

    let tx = state.tracker.get(id).await?;
    if !(caller.is_admin || tx.payee_id == caller.user_id) {
        return Err(EscrowError::Unauthorized(id).into());
    }

    let refunded = state
        .tracker
        .refund(id, Some(caller.user_id), reason)
        .await?;
    Ok(Json(RefundResponse {
        success: true,
        refund_reference: refunded.refund_reference,
    }))
}

async fn require_payer(state: &AppState, caller: Caller, id: i64) -> Result<(), AppError> {
    let tx = state.tracker.get(id).await?;
    if caller.is_admin || tx.payer_id == caller.user_id {
        Ok(())
    } else {
        tracing::warn!(escrow_id = id, user_id = caller.user_id, "Caller is not the payer");
        Err(EscrowError::Unauthorized(id).into())
    }
}

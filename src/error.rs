use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use tracing::error;

use crate::domain::EscrowStatus;
use crate::services::EscrowError;
use crate::validation::ValidationError;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Payee {0} has not completed payout onboarding")]
    PayeeNotOnboarded(i64),

    #[error("Escrow transaction {0} not found")]
    NotFound(i64),

    #[error("{message}")]
    Conflict {
        message: String,
        current_status: EscrowStatus,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Payment gateway unavailable")]
    Gateway,

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::PayeeNotOnboarded(_) | AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict { .. } => StatusCode::CONFLICT,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Gateway => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<EscrowError> for AppError {
    fn from(err: EscrowError) -> Self {
        match err {
            EscrowError::PayeeNotOnboarded(payee) => AppError::PayeeNotOnboarded(payee),
            EscrowError::TransactionNotFound(id) => AppError::NotFound(id),
            EscrowError::InvalidStateTransition { current, .. } => AppError::Conflict {
                message: err.to_string(),
                current_status: current,
            },
            EscrowError::Unauthorized(id) => {
                AppError::Forbidden(format!("not a party to escrow transaction {}", id))
            }
            EscrowError::Validation(message) => AppError::Validation(message),
            EscrowError::Gateway(e) => {
                error!(error = %e, "Payment gateway call failed");
                AppError::Gateway
            }
            EscrowError::Repository(e) => {
                error!(error = %e, "Escrow store failure");
                AppError::Internal(e.to_string())
            }
        }
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation(err.to_string())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            AppError::Conflict { current_status, .. } => json!({
                "error": self.to_string(),
                "status": status.as_u16(),
                "current_status": current_status,
            }),
            _ => json!({
                "error": self.to_string(),
                "status": status.as_u16(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;
    use crate::ports::RepositoryError;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = hyper::body::to_bytes(response.into_body()).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_validation_error_status_code() {
        let error = AppError::Validation("amount: must be greater than zero".to_string());
        assert_eq!(error.status_code(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_escrow_errors_map_to_status_codes() {
        let cases = [
            (EscrowError::PayeeNotOnboarded(2), StatusCode::BAD_REQUEST),
            (EscrowError::TransactionNotFound(9), StatusCode::NOT_FOUND),
            (EscrowError::Unauthorized(9), StatusCode::FORBIDDEN),
            (
                EscrowError::Validation("bad".to_string()),
                StatusCode::BAD_REQUEST,
            ),
            (
                EscrowError::Gateway(GatewayError::CircuitBreakerOpen("open".to_string())),
                StatusCode::BAD_GATEWAY,
            ),
            (
                EscrowError::Repository(RepositoryError::Database("down".to_string())),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (err, expected) in cases {
            assert_eq!(AppError::from(err).status_code(), expected);
        }
    }

    #[tokio::test]
    async fn test_conflict_response_reports_current_status() {
        let error = AppError::from(EscrowError::InvalidStateTransition {
            id: 4,
            action: "release",
            current: EscrowStatus::Refunded,
        });
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["current_status"], "refunded");
        assert_eq!(body["status"], 409);
    }

    #[tokio::test]
    async fn test_gateway_response_hides_vendor_detail() {
        let error = AppError::from(EscrowError::Gateway(GatewayError::Api {
            status: 402,
            message: "card_declined: secret vendor detail".to_string(),
        }));
        let response = error.into_response();

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Payment gateway unavailable");
    }

    #[tokio::test]
    async fn test_internal_response_hides_detail() {
        let response = AppError::Internal("connection refused".to_string()).into_response();
        let body = body_json(response).await;
        assert_eq!(body["error"], "Internal server error");
    }
}

//! Payment gateway port and its adapters.
//!
//! The escrow services only ever talk to [`PaymentGateway`]. Vendor status
//! strings never leak past this module: [`map_payment_intent_status`] turns
//! them into a [`PaymentOutcome`].

pub mod client;
pub mod mock;
pub mod webhook;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

pub use client::HttpGateway;
pub use mock::MockGateway;

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("HTTP request failed: {0}")]
    RequestError(#[from] reqwest::Error),
    #[error("Gateway returned {status}: {message}")]
    Api { status: u16, message: String },
    #[error("Invalid response from gateway: {0}")]
    InvalidResponse(String),
    #[error("Gateway declined the request: {0}")]
    Declined(String),
    #[error("Circuit breaker open: {0}")]
    CircuitBreakerOpen(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Internal view of a payment's capture state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Succeeded,
    Failed,
    Pending,
}

/// Maps a vendor payment-intent status onto [`PaymentOutcome`].
///
/// Anything the vendor may still move forward (`processing`,
/// `requires_action`, `requires_capture`, unknown values) stays `Pending`.
pub fn map_payment_intent_status(status: &str) -> PaymentOutcome {
    match status {
        "succeeded" => PaymentOutcome::Succeeded,
        "requires_payment_method" | "canceled" => PaymentOutcome::Failed,
        _ => PaymentOutcome::Pending,
    }
}

#[derive(Debug, Clone)]
pub struct HeldPaymentRequest {
    pub amount: i64,
    pub currency: String,
    pub destination_account: String,
    pub commission: i64,
    pub transfer_group: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeldPayment {
    pub reference: String,
    pub client_secret: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PayoutDestinationStatus {
    pub details_submitted: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
}

impl PayoutDestinationStatus {
    pub fn onboarding_complete(&self) -> bool {
        self.details_submitted && self.charges_enabled && self.payouts_enabled
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Creates a payment whose funds are routed to `destination_account`
    /// minus `commission`, correlated through `transfer_group`.
    async fn create_held_payment(&self, request: &HeldPaymentRequest) -> GatewayResult<HeldPayment>;

    async fn get_payment_status(&self, reference: &str) -> GatewayResult<PaymentOutcome>;

    /// Returns the gateway's refund reference.
    async fn create_refund(&self, reference: &str, reason: &str) -> GatewayResult<String>;

    async fn create_payout_destination(
        &self,
        owner_id: i64,
        country: &str,
        email: &str,
    ) -> GatewayResult<String>;

    async fn create_onboarding_link(&self, account_id: &str) -> GatewayResult<String>;

    async fn get_payout_destination_status(
        &self,
        account_id: &str,
    ) -> GatewayResult<PayoutDestinationStatus>;

    fn circuit_state(&self) -> &'static str {
        "closed"
    }
}

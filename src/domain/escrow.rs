//! Escrow transaction entities.
//! Framework-agnostic representation of held payments and their audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Lifecycle state of an escrow transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscrowStatus {
    Pending,
    InEscrow,
    Released,
    Refunded,
    PaymentFailed,
}

impl EscrowStatus {
    pub const ALL: [EscrowStatus; 5] = [
        EscrowStatus::Pending,
        EscrowStatus::InEscrow,
        EscrowStatus::Released,
        EscrowStatus::Refunded,
        EscrowStatus::PaymentFailed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EscrowStatus::Pending => "pending",
            EscrowStatus::InEscrow => "in_escrow",
            EscrowStatus::Released => "released",
            EscrowStatus::Refunded => "refunded",
            EscrowStatus::PaymentFailed => "payment_failed",
        }
    }

    /// No transition leaves a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EscrowStatus::Released | EscrowStatus::Refunded | EscrowStatus::PaymentFailed
        )
    }
}

impl fmt::Display for EscrowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown escrow status: {0}")]
pub struct UnknownStatus(pub String);

impl FromStr for EscrowStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EscrowStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| UnknownStatus(s.to_string()))
    }
}

/// Label recorded on each history row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
    Created,
    FundsCaptured,
    PaymentFailed,
    Released,
    Refunded,
}

impl HistoryAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            HistoryAction::Created => "created",
            HistoryAction::FundsCaptured => "funds_captured",
            HistoryAction::PaymentFailed => "payment_failed",
            HistoryAction::Released => "released",
            HistoryAction::Refunded => "refunded",
        }
    }
}

impl FromStr for HistoryAction {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(HistoryAction::Created),
            "funds_captured" => Ok(HistoryAction::FundsCaptured),
            "payment_failed" => Ok(HistoryAction::PaymentFailed),
            "released" => Ok(HistoryAction::Released),
            "refunded" => Ok(HistoryAction::Refunded),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A payment held by the platform between a payer and a payee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EscrowTransaction {
    pub id: i64,
    pub payer_id: i64,
    pub payee_id: i64,
    pub amount: i64,
    pub currency: String,
    pub platform_commission_amount: i64,
    pub payee_payout_amount: i64,
    pub payment_intent_id: String,
    pub transfer_group_id: String,
    pub refund_id: Option<String>,
    pub status: EscrowStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub escrow_release_date: DateTime<Utc>,
    pub service_completion_confirmed: bool,
    pub service_completion_date: Option<DateTime<Utc>>,
    pub job_posting_id: Option<i64>,
    pub booking_id: Option<i64>,
    pub description: Option<String>,
    pub dispute_reason: Option<String>,
}

impl EscrowTransaction {
    pub fn is_party(&self, user_id: i64) -> bool {
        self.payer_id == user_id || self.payee_id == user_id
    }
}

/// Everything needed to persist a freshly created transaction.
/// The store assigns the id and starts it in `pending`.
#[derive(Debug, Clone)]
pub struct NewEscrowTransaction {
    pub payer_id: i64,
    pub payee_id: i64,
    pub amount: i64,
    pub currency: String,
    pub platform_commission_amount: i64,
    pub payee_payout_amount: i64,
    pub payment_intent_id: String,
    pub transfer_group_id: String,
    pub created_at: DateTime<Utc>,
    pub escrow_release_date: DateTime<Utc>,
    pub job_posting_id: Option<i64>,
    pub booking_id: Option<i64>,
    pub description: Option<String>,
}

/// One row of a transaction's append-only audit trail.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: i64,
    pub escrow_transaction_id: i64,
    pub action: HistoryAction,
    pub previous_status: Option<EscrowStatus>,
    pub new_status: EscrowStatus,
    pub action_by: Option<i64>,
    pub action_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A receiving party's registered payout destination at the gateway.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutAccount {
    pub user_id: i64,
    pub destination_account_id: String,
    pub onboarding_complete: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//! Escrow transaction tracker.
//!
//! The tracker is the only writer of escrow status. Every status write goes
//! through [`EscrowRepository::apply_transition`], which guards on the
//! expected current status and appends exactly one history row in the same
//! store transaction. Gateway calls happen before anything is persisted, so a
//! gateway failure leaves the transaction untouched.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{
    compute_split, EscrowStatus, EscrowTransaction, HistoryAction, HistoryEntry,
    NewEscrowTransaction, DEFAULT_COMMISSION_RATE_BPS,
};
use crate::gateway::{GatewayError, HeldPaymentRequest, PaymentGateway, PaymentOutcome};
use crate::ports::{
    EscrowRepository, HistoryRecord, PayoutAccountRepository, RepositoryError, StatusTransition,
    TransitionOutcome,
};

pub const AUTO_RELEASE_REASON: &str = "auto-released after escrow period";

#[derive(Error, Debug)]
pub enum EscrowError {
    #[error("Payee {0} has not set up a payout destination")]
    PayeeNotOnboarded(i64),

    #[error("Escrow transaction {0} not found")]
    TransactionNotFound(i64),

    #[error("Cannot {action} escrow transaction {id} while it is {current}")]
    InvalidStateTransition {
        id: i64,
        action: &'static str,
        current: EscrowStatus,
    },

    #[error("Not authorized for escrow transaction {0}")]
    Unauthorized(i64),

    #[error("Invalid escrow request: {0}")]
    Validation(String),

    #[error("Payment gateway error: {0}")]
    Gateway(#[from] GatewayError),

    #[error("Repository error: {0}")]
    Repository(#[from] RepositoryError),
}

/// Tunables applied to every new transaction.
#[derive(Debug, Clone, Copy)]
pub struct EscrowPolicy {
    pub commission_rate_bps: u32,
    pub hold_period: Duration,
    pub auto_release_batch_size: i64,
}

impl Default for EscrowPolicy {
    fn default() -> Self {
        Self {
            commission_rate_bps: DEFAULT_COMMISSION_RATE_BPS,
            hold_period: Duration::days(7),
            auto_release_batch_size: 100,
        }
    }
}

/// Identity of whoever is driving an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    pub user_id: i64,
    pub is_admin: bool,
}

impl Caller {
    pub fn can_view(&self, tx: &EscrowTransaction) -> bool {
        self.is_admin || tx.is_party(self.user_id)
    }
}

#[derive(Debug, Clone)]
pub struct CreateEscrowRequest {
    pub payer_id: i64,
    pub payee_id: i64,
    pub amount: i64,
    pub currency: String,
    pub job_posting_id: Option<i64>,
    pub booking_id: Option<i64>,
    pub description: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreatedEscrow {
    pub transaction: EscrowTransaction,
    pub client_secret: String,
}

#[derive(Debug, Clone)]
pub struct RefundedEscrow {
    pub transaction: EscrowTransaction,
    pub refund_reference: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AutoReleaseReport {
    pub released: Vec<i64>,
    /// Moved out of `in_escrow` by someone else between scan and release.
    pub skipped: Vec<i64>,
    pub failed: Vec<i64>,
}

pub struct EscrowTracker {
    repository: Arc<dyn EscrowRepository>,
    payout_accounts: Arc<dyn PayoutAccountRepository>,
    gateway: Arc<dyn PaymentGateway>,
    policy: EscrowPolicy,
}

impl EscrowTracker {
    pub fn new(
        repository: Arc<dyn EscrowRepository>,
        payout_accounts: Arc<dyn PayoutAccountRepository>,
        gateway: Arc<dyn PaymentGateway>,
        policy: EscrowPolicy,
    ) -> Self {
        Self {
            repository,
            payout_accounts,
            gateway,
            policy,
        }
    }

    pub fn policy(&self) -> &EscrowPolicy {
        &self.policy
    }

    pub async fn create(&self, request: CreateEscrowRequest) -> Result<CreatedEscrow, EscrowError> {
        if request.amount <= 0 {
            return Err(EscrowError::Validation("amount must be greater than zero".to_string()));
        }
        if request.payer_id == request.payee_id {
            return Err(EscrowError::Validation("payer and payee must differ".to_string()));
        }

        let destination = self
            .payout_accounts
            .get(request.payee_id)
            .await?
            .ok_or(EscrowError::PayeeNotOnboarded(request.payee_id))?;

        let split = compute_split(request.amount, self.policy.commission_rate_bps);
        let transfer_group = format!("escrow_{}", Uuid::new_v4().simple());

        let mut metadata = BTreeMap::new();
        metadata.insert("payer_id".to_string(), request.payer_id.to_string());
        metadata.insert("payee_id".to_string(), request.payee_id.to_string());
        if let Some(job_posting_id) = request.job_posting_id {
            metadata.insert("job_posting_id".to_string(), job_posting_id.to_string());
        }
        if let Some(booking_id) = request.booking_id {
            metadata.insert("booking_id".to_string(), booking_id.to_string());
        }

        let held = self
            .gateway
            .create_held_payment(&HeldPaymentRequest {
                amount: request.amount,
                currency: request.currency.clone(),
                destination_account: destination.destination_account_id,
                commission: split.commission,
                transfer_group: transfer_group.clone(),
                metadata,
            })
            .await
            .map_err(|e| {
                error!(payer_id = request.payer_id, payee_id = request.payee_id, error = %e, "Gateway rejected held payment");
                e
            })?;

        let now = Utc::now();
        let new = NewEscrowTransaction {
            payer_id: request.payer_id,
            payee_id: request.payee_id,
            amount: request.amount,
            currency: request.currency,
            platform_commission_amount: split.commission,
            payee_payout_amount: split.payout,
            payment_intent_id: held.reference,
            transfer_group_id: transfer_group,
            created_at: now,
            escrow_release_date: now + self.policy.hold_period,
            job_posting_id: request.job_posting_id,
            booking_id: request.booking_id,
            description: request.description,
        };
        let record = HistoryRecord {
            action: HistoryAction::Created,
            action_by: Some(request.payer_id),
            action_reason: None,
            timestamp: now,
        };

        let (transaction, _) = self.repository.create(&new, &record).await?;
        info!(
            escrow_id = transaction.id,
            amount = transaction.amount,
            commission = transaction.platform_commission_amount,
            "Escrow transaction created"
        );

        Ok(CreatedEscrow {
            transaction,
            client_secret: held.client_secret,
        })
    }

    /// Settles a `pending` transaction from the gateway's view of the payment.
    /// A payment the gateway still reports as pending is returned unchanged.
    pub async fn confirm(&self, id: i64) -> Result<EscrowTransaction, EscrowError> {
        let tx = self.load(id).await?;
        if tx.status != EscrowStatus::Pending {
            return Err(EscrowError::InvalidStateTransition {
                id,
                action: "confirm",
                current: tx.status,
            });
        }

        let outcome = self
            .gateway
            .get_payment_status(&tx.payment_intent_id)
            .await
            .map_err(|e| {
                error!(escrow_id = id, error = %e, "Failed to read payment status");
                e
            })?;

        let (next, action) = match outcome {
            PaymentOutcome::Succeeded => (EscrowStatus::InEscrow, HistoryAction::FundsCaptured),
            PaymentOutcome::Failed => (EscrowStatus::PaymentFailed, HistoryAction::PaymentFailed),
            PaymentOutcome::Pending => {
                debug!(escrow_id = id, "Payment still pending at gateway");
                return Ok(tx);
            }
        };

        let transition = StatusTransition::new(
            &[EscrowStatus::Pending],
            next,
            HistoryRecord {
                action,
                action_by: None,
                action_reason: None,
                timestamp: Utc::now(),
            },
        );
        let (tx, _) = self.transition(id, "confirm", &transition).await?;
        Ok(tx)
    }

    pub async fn release(
        &self,
        id: i64,
        released_by: Option<i64>,
        reason: Option<String>,
    ) -> Result<EscrowTransaction, EscrowError> {
        let mut transition = StatusTransition::new(
            &[EscrowStatus::InEscrow],
            EscrowStatus::Released,
            HistoryRecord {
                action: HistoryAction::Released,
                action_by: released_by,
                action_reason: reason,
                timestamp: Utc::now(),
            },
        );
        transition.confirm_completion = true;

        let (tx, _) = self.transition(id, "release", &transition).await?;
        Ok(tx)
    }

    pub async fn refund(
        &self,
        id: i64,
        requested_by: Option<i64>,
        reason: String,
    ) -> Result<RefundedEscrow, EscrowError> {
        const REFUNDABLE: [EscrowStatus; 2] = [EscrowStatus::InEscrow, EscrowStatus::Released];

        let tx = self.load(id).await?;
        if !REFUNDABLE.contains(&tx.status) {
            return Err(EscrowError::InvalidStateTransition {
                id,
                action: "refund",
                current: tx.status,
            });
        }

        let refund_reference = self
            .gateway
            .create_refund(&tx.payment_intent_id, &reason)
            .await
            .map_err(|e| {
                error!(escrow_id = id, error = %e, "Gateway refund failed");
                e
            })?;

        let mut transition = StatusTransition::new(
            &REFUNDABLE,
            EscrowStatus::Refunded,
            HistoryRecord {
                action: HistoryAction::Refunded,
                action_by: requested_by,
                action_reason: Some(reason.clone()),
                timestamp: Utc::now(),
            },
        );
        transition.refund_id = Some(refund_reference.clone());
        transition.dispute_reason = Some(reason);

        match self.transition(id, "refund", &transition).await {
            Ok((transaction, _)) => Ok(RefundedEscrow {
                transaction,
                refund_reference,
            }),
            Err(e) => {
                error!(
                    escrow_id = id,
                    refund = %refund_reference,
                    error = %e,
                    "Refund issued at gateway but not recorded; needs operator follow-up"
                );
                Err(e)
            }
        }
    }

    /// Releases every `in_escrow` transaction whose hold period ended at or
    /// before `now`, fetching due rows in batches until none are left.
    ///
    /// A row that fails is not retried within the same run; a batch made up
    /// only of such rows ends the run.
    pub async fn auto_release(&self, now: DateTime<Utc>) -> Result<AutoReleaseReport, EscrowError> {
        let mut report = AutoReleaseReport::default();

        loop {
            let due = self
                .repository
                .due_for_release(now, self.policy.auto_release_batch_size)
                .await?;
            if due.is_empty() {
                break;
            }

            let mut progressed = false;
            for tx in due {
                if report.failed.contains(&tx.id) {
                    continue;
                }
                match self
                    .release(tx.id, None, Some(AUTO_RELEASE_REASON.to_string()))
                    .await
                {
                    Ok(_) => {
                        report.released.push(tx.id);
                        progressed = true;
                    }
                    Err(EscrowError::InvalidStateTransition { current, .. }) => {
                        debug!(escrow_id = tx.id, %current, "Skipping auto-release, status changed");
                        report.skipped.push(tx.id);
                        progressed = true;
                    }
                    Err(e) => {
                        error!(escrow_id = tx.id, error = %e, "Auto-release failed");
                        report.failed.push(tx.id);
                    }
                }
            }

            if !progressed {
                break;
            }
        }

        if !report.released.is_empty() || !report.failed.is_empty() {
            info!(
                released = report.released.len(),
                skipped = report.skipped.len(),
                failed = report.failed.len(),
                "Auto-release run finished"
            );
        }
        Ok(report)
    }

    pub async fn get(&self, id: i64) -> Result<EscrowTransaction, EscrowError> {
        self.load(id).await
    }

    pub async fn get_with_history(
        &self,
        id: i64,
        caller: Caller,
    ) -> Result<(EscrowTransaction, Vec<HistoryEntry>), EscrowError> {
        let tx = self.load(id).await?;
        if !caller.can_view(&tx) {
            warn!(escrow_id = id, user_id = caller.user_id, "Rejected escrow read");
            return Err(EscrowError::Unauthorized(id));
        }
        let history = self.repository.history(id).await?;
        Ok((tx, history))
    }

    pub async fn list_for_party(&self, user_id: i64) -> Result<Vec<EscrowTransaction>, EscrowError> {
        Ok(self.repository.list_for_party(user_id).await?)
    }

    pub async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<EscrowTransaction>, EscrowError> {
        Ok(self
            .repository
            .find_by_payment_intent(payment_intent_id)
            .await?)
    }

    async fn load(&self, id: i64) -> Result<EscrowTransaction, EscrowError> {
        self.repository
            .get(id)
            .await?
            .ok_or(EscrowError::TransactionNotFound(id))
    }

    async fn transition(
        &self,
        id: i64,
        action: &'static str,
        transition: &StatusTransition,
    ) -> Result<(EscrowTransaction, HistoryEntry), EscrowError> {
        let outcome = self
            .repository
            .apply_transition(id, transition)
            .await
            .map_err(|e| match e {
                RepositoryError::NotFound(_) => EscrowError::TransactionNotFound(id),
                other => EscrowError::Repository(other),
            })?;

        match outcome {
            TransitionOutcome::Applied { transaction, entry } => {
                info!(
                    escrow_id = id,
                    action = entry.action.as_str(),
                    from = ?entry.previous_status,
                    to = %entry.new_status,
                    "Escrow status changed"
                );
                Ok((transaction, entry))
            }
            TransitionOutcome::Rejected { current } => {
                Err(EscrowError::InvalidStateTransition { id, action, current })
            }
        }
    }
}

//! Storage ports used by the escrow services.
//! Adapters live in `crate::adapters`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::domain::{
    EscrowStatus, EscrowTransaction, HistoryAction, HistoryEntry, NewEscrowTransaction,
    PayoutAccount,
};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row".to_string()),
            other => RepositoryError::Database(other.to_string()),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Audit metadata written alongside a status change.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    pub action: HistoryAction,
    pub action_by: Option<i64>,
    pub action_reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A guarded status change.
///
/// Applied only when the stored status is one of `expected`; the status
/// write and the history append happen atomically.
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub expected: Vec<EscrowStatus>,
    pub next: EscrowStatus,
    pub record: HistoryRecord,
    /// Sets `service_completion_confirmed` and stamps the completion date.
    pub confirm_completion: bool,
    pub refund_id: Option<String>,
    pub dispute_reason: Option<String>,
}

impl StatusTransition {
    pub fn new(expected: &[EscrowStatus], next: EscrowStatus, record: HistoryRecord) -> Self {
        Self {
            expected: expected.to_vec(),
            next,
            record,
            confirm_completion: false,
            refund_id: None,
            dispute_reason: None,
        }
    }
}

#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied {
        transaction: EscrowTransaction,
        entry: HistoryEntry,
    },
    /// The stored status did not match; nothing was written.
    Rejected { current: EscrowStatus },
}

#[async_trait]
pub trait EscrowRepository: Send + Sync {
    /// Inserts a `pending` transaction together with its `created` history row.
    async fn create(
        &self,
        new: &NewEscrowTransaction,
        record: &HistoryRecord,
    ) -> RepositoryResult<(EscrowTransaction, HistoryEntry)>;

    async fn get(&self, id: i64) -> RepositoryResult<Option<EscrowTransaction>>;

    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> RepositoryResult<Option<EscrowTransaction>>;

    /// Transactions where `user_id` is payer or payee, newest first.
    async fn list_for_party(&self, user_id: i64) -> RepositoryResult<Vec<EscrowTransaction>>;

    /// History rows of one transaction, oldest first.
    async fn history(&self, id: i64) -> RepositoryResult<Vec<HistoryEntry>>;

    /// Fails with `RepositoryError::NotFound` when `id` is unknown.
    async fn apply_transition(
        &self,
        id: i64,
        transition: &StatusTransition,
    ) -> RepositoryResult<TransitionOutcome>;

    /// `in_escrow` transactions whose release date is at or before `now`.
    async fn due_for_release(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<EscrowTransaction>>;

    async fn ping(&self) -> RepositoryResult<()>;
}

#[async_trait]
pub trait PayoutAccountRepository: Send + Sync {
    async fn get(&self, user_id: i64) -> RepositoryResult<Option<PayoutAccount>>;

    async fn upsert(&self, account: &PayoutAccount) -> RepositoryResult<PayoutAccount>;
}

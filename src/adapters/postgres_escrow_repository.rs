//! Postgres implementation of the escrow storage ports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool};

use crate::domain::{
    EscrowStatus, EscrowTransaction, HistoryAction, HistoryEntry, NewEscrowTransaction,
    PayoutAccount,
};
use crate::ports::{
    EscrowRepository, HistoryRecord, PayoutAccountRepository, RepositoryError, RepositoryResult,
    StatusTransition, TransitionOutcome,
};

/// Postgres-backed escrow repository.
///
/// Transitions lock the row with `SELECT ... FOR UPDATE`, then update with a
/// `status = <previous>` guard and append history before committing.
#[derive(Clone)]
pub struct PostgresEscrowRepository {
    pool: PgPool,
}

impl PostgresEscrowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

async fn insert_history(
    conn: &mut PgConnection,
    escrow_transaction_id: i64,
    previous_status: Option<EscrowStatus>,
    new_status: EscrowStatus,
    record: &HistoryRecord,
) -> RepositoryResult<HistoryEntry> {
    let row = sqlx::query_as::<_, HistoryRow>(
        r#"
        INSERT INTO escrow_transaction_history (
            escrow_transaction_id, action, previous_status, new_status,
            action_by, action_reason, timestamp
        ) VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING *
        "#,
    )
    .bind(escrow_transaction_id)
    .bind(record.action.as_str())
    .bind(previous_status.map(|s| s.as_str()))
    .bind(new_status.as_str())
    .bind(record.action_by)
    .bind(&record.action_reason)
    .bind(record.timestamp)
    .fetch_one(&mut *conn)
    .await?;

    row.into_domain()
}

#[async_trait]
impl EscrowRepository for PostgresEscrowRepository {
    async fn create(
        &self,
        new: &NewEscrowTransaction,
        record: &HistoryRecord,
    ) -> RepositoryResult<(EscrowTransaction, HistoryEntry)> {
        let mut db_tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, EscrowRow>(
            r#"
            INSERT INTO escrow_transactions (
                payer_id, payee_id, amount, currency,
                platform_commission_amount, payee_payout_amount,
                payment_intent_id, transfer_group_id, status,
                created_at, updated_at, escrow_release_date,
                job_posting_id, booking_id, description
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $10, $11, $12, $13, $14)
            RETURNING *
            "#,
        )
        .bind(new.payer_id)
        .bind(new.payee_id)
        .bind(new.amount)
        .bind(&new.currency)
        .bind(new.platform_commission_amount)
        .bind(new.payee_payout_amount)
        .bind(&new.payment_intent_id)
        .bind(&new.transfer_group_id)
        .bind(EscrowStatus::Pending.as_str())
        .bind(new.created_at)
        .bind(new.escrow_release_date)
        .bind(new.job_posting_id)
        .bind(new.booking_id)
        .bind(&new.description)
        .fetch_one(&mut *db_tx)
        .await?;

        let tx = row.into_domain()?;
        let entry = insert_history(&mut db_tx, tx.id, None, EscrowStatus::Pending, record).await?;

        db_tx.commit().await?;
        Ok((tx, entry))
    }

    async fn get(&self, id: i64) -> RepositoryResult<Option<EscrowTransaction>> {
        let row = sqlx::query_as::<_, EscrowRow>("SELECT * FROM escrow_transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(EscrowRow::into_domain).transpose()
    }

    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> RepositoryResult<Option<EscrowTransaction>> {
        let row = sqlx::query_as::<_, EscrowRow>(
            "SELECT * FROM escrow_transactions WHERE payment_intent_id = $1",
        )
        .bind(payment_intent_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(EscrowRow::into_domain).transpose()
    }

    async fn list_for_party(&self, user_id: i64) -> RepositoryResult<Vec<EscrowTransaction>> {
        let rows = sqlx::query_as::<_, EscrowRow>(
            r#"
            SELECT * FROM escrow_transactions
            WHERE payer_id = $1 OR payee_id = $1
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EscrowRow::into_domain).collect()
    }

    async fn history(&self, id: i64) -> RepositoryResult<Vec<HistoryEntry>> {
        let rows = sqlx::query_as::<_, HistoryRow>(
            r#"
            SELECT * FROM escrow_transaction_history
            WHERE escrow_transaction_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(HistoryRow::into_domain).collect()
    }

    async fn apply_transition(
        &self,
        id: i64,
        transition: &StatusTransition,
    ) -> RepositoryResult<TransitionOutcome> {
        let mut db_tx = self.pool.begin().await?;

        let current: Option<String> =
            sqlx::query_scalar("SELECT status FROM escrow_transactions WHERE id = $1 FOR UPDATE")
                .bind(id)
                .fetch_optional(&mut *db_tx)
                .await?;
        let current = current
            .ok_or_else(|| RepositoryError::NotFound(format!("escrow transaction {}", id)))?;
        let current = parse_status(&current)?;

        if !transition.expected.contains(&current) {
            db_tx.rollback().await?;
            return Ok(TransitionOutcome::Rejected { current });
        }

        let at = transition.record.timestamp;
        let row = sqlx::query_as::<_, EscrowRow>(
            r#"
            UPDATE escrow_transactions
            SET status = $3,
                updated_at = $4,
                service_completion_confirmed =
                    CASE WHEN $5 THEN TRUE ELSE service_completion_confirmed END,
                service_completion_date =
                    CASE WHEN $5 THEN $4 ELSE service_completion_date END,
                refund_id = COALESCE($6, refund_id),
                dispute_reason = COALESCE($7, dispute_reason)
            WHERE id = $1 AND status = $2
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(current.as_str())
        .bind(transition.next.as_str())
        .bind(at)
        .bind(transition.confirm_completion)
        .bind(&transition.refund_id)
        .bind(&transition.dispute_reason)
        .fetch_optional(&mut *db_tx)
        .await?;

        let Some(row) = row else {
            db_tx.rollback().await?;
            return Ok(TransitionOutcome::Rejected { current });
        };

        let transaction = row.into_domain()?;
        let entry =
            insert_history(&mut db_tx, id, Some(current), transition.next, &transition.record)
                .await?;

        db_tx.commit().await?;
        Ok(TransitionOutcome::Applied { transaction, entry })
    }

    async fn due_for_release(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<EscrowTransaction>> {
        let rows = sqlx::query_as::<_, EscrowRow>(
            r#"
            SELECT * FROM escrow_transactions
            WHERE status = $1 AND escrow_release_date <= $2
            ORDER BY escrow_release_date ASC
            LIMIT $3
            "#,
        )
        .bind(EscrowStatus::InEscrow.as_str())
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EscrowRow::into_domain).collect()
    }

    async fn ping(&self) -> RepositoryResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PostgresPayoutAccountRepository {
    pool: PgPool,
}

impl PostgresPayoutAccountRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PayoutAccountRepository for PostgresPayoutAccountRepository {
    async fn get(&self, user_id: i64) -> RepositoryResult<Option<PayoutAccount>> {
        let row = sqlx::query_as::<_, PayoutAccountRow>(
            "SELECT * FROM payout_accounts WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(PayoutAccountRow::into_domain))
    }

    async fn upsert(&self, account: &PayoutAccount) -> RepositoryResult<PayoutAccount> {
        let row = sqlx::query_as::<_, PayoutAccountRow>(
            r#"
            INSERT INTO payout_accounts (
                user_id, destination_account_id, onboarding_complete, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE
            SET destination_account_id = EXCLUDED.destination_account_id,
                onboarding_complete = EXCLUDED.onboarding_complete,
                updated_at = EXCLUDED.updated_at
            RETURNING *
            "#,
        )
        .bind(account.user_id)
        .bind(&account.destination_account_id)
        .bind(account.onboarding_complete)
        .bind(account.created_at)
        .bind(account.updated_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_domain())
    }
}

fn parse_status(raw: &str) -> RepositoryResult<EscrowStatus> {
    raw.parse::<EscrowStatus>()
        .map_err(|e| RepositoryError::Corrupt(e.to_string()))
}

/// Internal row types for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct EscrowRow {
    id: i64,
    payer_id: i64,
    payee_id: i64,
    amount: i64,
    currency: String,
    platform_commission_amount: i64,
    payee_payout_amount: i64,
    payment_intent_id: String,
    transfer_group_id: String,
    refund_id: Option<String>,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    escrow_release_date: DateTime<Utc>,
    service_completion_confirmed: bool,
    service_completion_date: Option<DateTime<Utc>>,
    job_posting_id: Option<i64>,
    booking_id: Option<i64>,
    description: Option<String>,
    dispute_reason: Option<String>,
}

impl EscrowRow {
    fn into_domain(self) -> RepositoryResult<EscrowTransaction> {
        Ok(EscrowTransaction {
            id: self.id,
            payer_id: self.payer_id,
            payee_id: self.payee_id,
            amount: self.amount,
            currency: self.currency,
            platform_commission_amount: self.platform_commission_amount,
            payee_payout_amount: self.payee_payout_amount,
            payment_intent_id: self.payment_intent_id,
            transfer_group_id: self.transfer_group_id,
            refund_id: self.refund_id,
            status: parse_status(&self.status)?,
            created_at: self.created_at,
            updated_at: self.updated_at,
            escrow_release_date: self.escrow_release_date,
            service_completion_confirmed: self.service_completion_confirmed,
            service_completion_date: self.service_completion_date,
            job_posting_id: self.job_posting_id,
            booking_id: self.booking_id,
            description: self.description,
            dispute_reason: self.dispute_reason,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct HistoryRow {
    id: i64,
    escrow_transaction_id: i64,
    action: String,
    previous_status: Option<String>,
    new_status: String,
    action_by: Option<i64>,
    action_reason: Option<String>,
    timestamp: DateTime<Utc>,
}

impl HistoryRow {
    fn into_domain(self) -> RepositoryResult<HistoryEntry> {
        Ok(HistoryEntry {
            id: self.id,
            escrow_transaction_id: self.escrow_transaction_id,
            action: self
                .action
                .parse::<HistoryAction>()
                .map_err(|e| RepositoryError::Corrupt(e.to_string()))?,
            previous_status: self.previous_status.as_deref().map(parse_status).transpose()?,
            new_status: parse_status(&self.new_status)?,
            action_by: self.action_by,
            action_reason: self.action_reason,
            timestamp: self.timestamp,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct PayoutAccountRow {
    user_id: i64,
    destination_account_id: String,
    onboarding_complete: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl PayoutAccountRow {
    fn into_domain(self) -> PayoutAccount {
        PayoutAccount {
            user_id: self.user_id,
            destination_account_id: self.destination_account_id,
            onboarding_complete: self.onboarding_complete,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::{
    EscrowStatus, EscrowTransaction, HistoryEntry, NewEscrowTransaction, PayoutAccount,
};
use crate::ports::{
    EscrowRepository, HistoryRecord, PayoutAccountRepository, RepositoryError, RepositoryResult,
    StatusTransition, TransitionOutcome,
};

#[derive(Default)]
struct EscrowTables {
    transactions: BTreeMap<i64, EscrowTransaction>,
    history: Vec<HistoryEntry>,
    next_transaction_id: i64,
    next_history_id: i64,
}

impl EscrowTables {
    fn append_history(
        &mut self,
        escrow_transaction_id: i64,
        previous_status: Option<EscrowStatus>,
        new_status: EscrowStatus,
        record: &HistoryRecord,
    ) -> HistoryEntry {
        self.next_history_id += 1;
        let entry = HistoryEntry {
            id: self.next_history_id,
            escrow_transaction_id,
            action: record.action,
            previous_status,
            new_status,
            action_by: record.action_by,
            action_reason: record.action_reason.clone(),
            timestamp: record.timestamp,
        };
        self.history.push(entry.clone());
        entry
    }
}

/// A thread-safe in-memory escrow store.
///
/// One write lock covers the status check, the update, and the history
/// append, so transitions are atomic just like the Postgres adapter's.
/// Used when no database is configured and throughout the tests.
#[derive(Default, Clone)]
pub struct InMemoryEscrowRepository {
    tables: Arc<RwLock<EscrowTables>>,
}

impl InMemoryEscrowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EscrowRepository for InMemoryEscrowRepository {
    async fn create(
        &self,
        new: &NewEscrowTransaction,
        record: &HistoryRecord,
    ) -> RepositoryResult<(EscrowTransaction, HistoryEntry)> {
        let mut tables = self.tables.write().await;
        tables.next_transaction_id += 1;

        let tx = EscrowTransaction {
            id: tables.next_transaction_id,
            payer_id: new.payer_id,
            payee_id: new.payee_id,
            amount: new.amount,
            currency: new.currency.clone(),
            platform_commission_amount: new.platform_commission_amount,
            payee_payout_amount: new.payee_payout_amount,
            payment_intent_id: new.payment_intent_id.clone(),
            transfer_group_id: new.transfer_group_id.clone(),
            refund_id: None,
            status: EscrowStatus::Pending,
            created_at: new.created_at,
            updated_at: new.created_at,
            escrow_release_date: new.escrow_release_date,
            service_completion_confirmed: false,
            service_completion_date: None,
            job_posting_id: new.job_posting_id,
            booking_id: new.booking_id,
            description: new.description.clone(),
            dispute_reason: None,
        };
        tables.transactions.insert(tx.id, tx.clone());
        let entry = tables.append_history(tx.id, None, EscrowStatus::Pending, record);

        Ok((tx, entry))
    }

    async fn get(&self, id: i64) -> RepositoryResult<Option<EscrowTransaction>> {
        Ok(self.tables.read().await.transactions.get(&id).cloned())
    }

    async fn find_by_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> RepositoryResult<Option<EscrowTransaction>> {
        let tables = self.tables.read().await;
        Ok(tables
            .transactions
            .values()
            .find(|tx| tx.payment_intent_id == payment_intent_id)
            .cloned())
    }

    async fn list_for_party(&self, user_id: i64) -> RepositoryResult<Vec<EscrowTransaction>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<EscrowTransaction> = tables
            .transactions
            .values()
            .filter(|tx| tx.is_party(user_id))
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        Ok(rows)
    }

    async fn history(&self, id: i64) -> RepositoryResult<Vec<HistoryEntry>> {
        let tables = self.tables.read().await;
        Ok(tables
            .history
            .iter()
            .filter(|entry| entry.escrow_transaction_id == id)
            .cloned()
            .collect())
    }

    async fn apply_transition(
        &self,
        id: i64,
        transition: &StatusTransition,
    ) -> RepositoryResult<TransitionOutcome> {
        let mut tables = self.tables.write().await;

        let tx = tables
            .transactions
            .get_mut(&id)
            .ok_or_else(|| RepositoryError::NotFound(format!("escrow transaction {}", id)))?;

        let previous = tx.status;
        if !transition.expected.contains(&previous) {
            return Ok(TransitionOutcome::Rejected { current: previous });
        }

        let at = transition.record.timestamp;
        tx.status = transition.next;
        tx.updated_at = at;
        if transition.confirm_completion {
            tx.service_completion_confirmed = true;
            tx.service_completion_date = Some(at);
        }
        if let Some(refund_id) = &transition.refund_id {
            tx.refund_id = Some(refund_id.clone());
        }
        if let Some(reason) = &transition.dispute_reason {
            tx.dispute_reason = Some(reason.clone());
        }
        let transaction = tx.clone();

        let entry = tables.append_history(id, Some(previous), transition.next, &transition.record);
        Ok(TransitionOutcome::Applied { transaction, entry })
    }

    async fn due_for_release(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> RepositoryResult<Vec<EscrowTransaction>> {
        let tables = self.tables.read().await;
        let mut due: Vec<EscrowTransaction> = tables
            .transactions
            .values()
            .filter(|tx| tx.status == EscrowStatus::InEscrow && tx.escrow_release_date <= now)
            .cloned()
            .collect();
        due.sort_by_key(|tx| tx.escrow_release_date);
        due.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(due)
    }

    async fn ping(&self) -> RepositoryResult<()> {
        Ok(())
    }
}

/// In-memory payout destinations keyed by user id.
#[derive(Default, Clone)]
pub struct InMemoryPayoutAccountRepository {
    accounts: Arc<RwLock<HashMap<i64, PayoutAccount>>>,
}

impl InMemoryPayoutAccountRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PayoutAccountRepository for InMemoryPayoutAccountRepository {
    async fn get(&self, user_id: i64) -> RepositoryResult<Option<PayoutAccount>> {
        Ok(self.accounts.read().await.get(&user_id).cloned())
    }

    async fn upsert(&self, account: &PayoutAccount) -> RepositoryResult<PayoutAccount> {
        let mut accounts = self.accounts.write().await;
        let stored = match accounts.get(&account.user_id) {
            Some(existing) => PayoutAccount {
                created_at: existing.created_at,
                ..account.clone()
            },
            None => account.clone(),
        };
        accounts.insert(stored.user_id, stored.clone());
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::HistoryAction;
    use chrono::Duration;

    fn new_tx(payer_id: i64, payee_id: i64, release_in: Duration) -> NewEscrowTransaction {
        let now = Utc::now();
        NewEscrowTransaction {
            payer_id,
            payee_id,
            amount: 1_000,
            currency: "usd".to_string(),
            platform_commission_amount: 80,
            payee_payout_amount: 920,
            payment_intent_id: format!("pi_{}_{}", payer_id, payee_id),
            transfer_group_id: "escrow_test".to_string(),
            created_at: now,
            escrow_release_date: now + release_in,
            job_posting_id: None,
            booking_id: Some(3),
            description: None,
        }
    }

    fn record(action: HistoryAction) -> HistoryRecord {
        HistoryRecord {
            action,
            action_by: Some(1),
            action_reason: None,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_create_assigns_ids_and_history() {
        let store = InMemoryEscrowRepository::new();
        let (a, entry) = store
            .create(&new_tx(1, 2, Duration::days(1)), &record(HistoryAction::Created))
            .await
            .unwrap();
        let (b, _) = store
            .create(&new_tx(3, 4, Duration::days(1)), &record(HistoryAction::Created))
            .await
            .unwrap();

        assert_eq!(a.id, 1);
        assert_eq!(b.id, 2);
        assert_eq!(entry.escrow_transaction_id, a.id);
        assert_eq!(store.history(a.id).await.unwrap().len(), 1);
        assert_eq!(
            store.find_by_payment_intent("pi_3_4").await.unwrap().map(|tx| tx.id),
            Some(b.id)
        );
    }

    #[tokio::test]
    async fn test_transition_guard() {
        let store = InMemoryEscrowRepository::new();
        let (tx, _) = store
            .create(&new_tx(1, 2, Duration::days(1)), &record(HistoryAction::Created))
            .await
            .unwrap();

        let release = StatusTransition::new(
            &[EscrowStatus::InEscrow],
            EscrowStatus::Released,
            record(HistoryAction::Released),
        );
        let outcome = store.apply_transition(tx.id, &release).await.unwrap();
        assert!(matches!(
            outcome,
            TransitionOutcome::Rejected { current: EscrowStatus::Pending }
        ));
        assert_eq!(store.history(tx.id).await.unwrap().len(), 1);

        let missing = store.apply_transition(42, &release).await;
        assert!(matches!(missing, Err(RepositoryError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_list_for_party_and_due_for_release() {
        let store = InMemoryEscrowRepository::new();
        let (overdue, _) = store
            .create(&new_tx(1, 2, Duration::days(-1)), &record(HistoryAction::Created))
            .await
            .unwrap();
        let (future, _) = store
            .create(&new_tx(2, 3, Duration::days(5)), &record(HistoryAction::Created))
            .await
            .unwrap();

        let capture = StatusTransition::new(
            &[EscrowStatus::Pending],
            EscrowStatus::InEscrow,
            record(HistoryAction::FundsCaptured),
        );
        for id in [overdue.id, future.id] {
            store.apply_transition(id, &capture).await.unwrap();
        }

        let party_two: Vec<i64> = store
            .list_for_party(2)
            .await
            .unwrap()
            .into_iter()
            .map(|tx| tx.id)
            .collect();
        assert_eq!(party_two, vec![future.id, overdue.id]);
        assert_eq!(store.list_for_party(1).await.unwrap().len(), 1);

        let due = store.due_for_release(Utc::now(), 10).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, overdue.id);
        assert!(store.due_for_release(Utc::now(), 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_payout_upsert_keeps_created_at() {
        let store = InMemoryPayoutAccountRepository::new();
        let first = Utc::now() - Duration::days(3);
        store
            .upsert(&PayoutAccount {
                user_id: 9,
                destination_account_id: "acct_9".to_string(),
                onboarding_complete: false,
                created_at: first,
                updated_at: first,
            })
            .await
            .unwrap();

        let now = Utc::now();
        let updated = store
            .upsert(&PayoutAccount {
                user_id: 9,
                destination_account_id: "acct_9".to_string(),
                onboarding_complete: true,
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        assert_eq!(updated.created_at, first);
        assert!(store.get(9).await.unwrap().unwrap().onboarding_complete);
        assert!(store.get(10).await.unwrap().is_none());
    }
}

//! In-process gateway for local development and tests.
//!
//! Payments start out `Succeeded` (as if the payer completed checkout) and
//! payout destinations start fully onboarded; tests flip either with the
//! setters below.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

use super::{
    GatewayError, GatewayResult, HeldPayment, HeldPaymentRequest, PaymentGateway, PaymentOutcome,
    PayoutDestinationStatus,
};

#[derive(Debug, Clone)]
pub struct MockPayment {
    pub request: HeldPaymentRequest,
    pub outcome: PaymentOutcome,
    pub refunds: Vec<String>,
}

#[derive(Default)]
struct MockState {
    payments: HashMap<String, MockPayment>,
    destinations: HashMap<String, PayoutDestinationStatus>,
    unavailable: bool,
}

#[derive(Clone, Default)]
pub struct MockGateway {
    state: Arc<RwLock<MockState>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, every call fails as if the vendor were down.
    pub async fn set_unavailable(&self, unavailable: bool) {
        self.state.write().await.unavailable = unavailable;
    }

    pub async fn set_payment_outcome(&self, reference: &str, outcome: PaymentOutcome) {
        if let Some(payment) = self.state.write().await.payments.get_mut(reference) {
            payment.outcome = outcome;
        }
    }

    pub async fn set_destination_status(&self, account_id: &str, status: PayoutDestinationStatus) {
        self.state
            .write()
            .await
            .destinations
            .insert(account_id.to_string(), status);
    }

    pub async fn payment(&self, reference: &str) -> Option<MockPayment> {
        self.state.read().await.payments.get(reference).cloned()
    }

    fn check_available(state: &MockState) -> GatewayResult<()> {
        if state.unavailable {
            return Err(GatewayError::Api {
                status: 503,
                message: "mock gateway unavailable".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_held_payment(&self, request: &HeldPaymentRequest) -> GatewayResult<HeldPayment> {
        let mut state = self.state.write().await;
        Self::check_available(&state)?;

        if request.amount <= 0 {
            return Err(GatewayError::Declined("amount must be greater than zero".to_string()));
        }

        let reference = format!("mock_pi_{}", Uuid::new_v4().simple());
        let client_secret = format!("{}_secret_{}", reference, Uuid::new_v4().simple());
        state.payments.insert(
            reference.clone(),
            MockPayment {
                request: request.clone(),
                outcome: PaymentOutcome::Succeeded,
                refunds: Vec::new(),
            },
        );

        info!(payment_intent = %reference, amount = request.amount, "Mock held payment created");
        Ok(HeldPayment {
            reference,
            client_secret,
        })
    }

    async fn get_payment_status(&self, reference: &str) -> GatewayResult<PaymentOutcome> {
        let state = self.state.read().await;
        Self::check_available(&state)?;

        state
            .payments
            .get(reference)
            .map(|payment| payment.outcome)
            .ok_or_else(|| GatewayError::Api {
                status: 404,
                message: format!("No such payment_intent: {}", reference),
            })
    }

    async fn create_refund(&self, reference: &str, reason: &str) -> GatewayResult<String> {
        let mut state = self.state.write().await;
        Self::check_available(&state)?;

        let payment = state.payments.get_mut(reference).ok_or_else(|| GatewayError::Api {
            status: 404,
            message: format!("No such payment_intent: {}", reference),
        })?;
        if payment.outcome != PaymentOutcome::Succeeded {
            return Err(GatewayError::Declined(format!(
                "payment {} was never captured",
                reference
            )));
        }

        let refund_id = format!("mock_re_{}", Uuid::new_v4().simple());
        payment.refunds.push(refund_id.clone());
        info!(payment_intent = %reference, refund = %refund_id, reason, "Mock refund created");
        Ok(refund_id)
    }

    async fn create_payout_destination(
        &self,
        owner_id: i64,
        _country: &str,
        _email: &str,
    ) -> GatewayResult<String> {
        let mut state = self.state.write().await;
        Self::check_available(&state)?;

        let account_id = format!("mock_acct_{}_{}", owner_id, Uuid::new_v4().simple());
        state.destinations.insert(
            account_id.clone(),
            PayoutDestinationStatus {
                details_submitted: true,
                charges_enabled: true,
                payouts_enabled: true,
            },
        );
        Ok(account_id)
    }

    async fn create_onboarding_link(&self, account_id: &str) -> GatewayResult<String> {
        let state = self.state.read().await;
        Self::check_available(&state)?;
        Ok(format!("https://connect.mock.local/onboarding/{}", account_id))
    }

    async fn get_payout_destination_status(
        &self,
        account_id: &str,
    ) -> GatewayResult<PayoutDestinationStatus> {
        let state = self.state.read().await;
        Self::check_available(&state)?;

        state
            .destinations
            .get(account_id)
            .copied()
            .ok_or_else(|| GatewayError::Api {
                status: 404,
                message: format!("No such account: {}", account_id),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn request(amount: i64) -> HeldPaymentRequest {
        HeldPaymentRequest {
            amount,
            currency: "usd".to_string(),
            destination_account: "mock_acct".to_string(),
            commission: 0,
            transfer_group: "escrow_test".to_string(),
            metadata: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn test_refund_requires_captured_payment() {
        let gateway = MockGateway::new();
        let held = gateway.create_held_payment(&request(500)).await.unwrap();

        gateway
            .set_payment_outcome(&held.reference, PaymentOutcome::Pending)
            .await;
        assert!(gateway.create_refund(&held.reference, "test").await.is_err());

        gateway
            .set_payment_outcome(&held.reference, PaymentOutcome::Succeeded)
            .await;
        let refund = gateway.create_refund(&held.reference, "test").await.unwrap();
        assert_eq!(gateway.payment(&held.reference).await.unwrap().refunds, vec![refund]);
    }

    #[tokio::test]
    async fn test_unavailable_gateway_fails_every_call() {
        let gateway = MockGateway::new();
        gateway.set_unavailable(true).await;

        assert!(gateway.create_held_payment(&request(500)).await.is_err());
        assert!(gateway.create_payout_destination(1, "US", "a@b.c").await.is_err());
    }
}

use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;

use super::{
    map_payment_intent_status, GatewayError, GatewayResult, HeldPayment, HeldPaymentRequest,
    PaymentGateway, PaymentOutcome, PayoutDestinationStatus,
};

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    client_secret: Option<String>,
    status: String,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AccountResponse {
    id: String,
    #[serde(default)]
    details_submitted: bool,
    #[serde(default)]
    charges_enabled: bool,
    #[serde(default)]
    payouts_enabled: bool,
}

#[derive(Debug, Deserialize)]
struct AccountLinkResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

/// HTTP client for a Stripe-style payments REST API
#[derive(Clone)]
pub struct HttpGateway {
    client: Client,
    base_url: String,
    api_key: String,
    onboarding_return_url: String,
    onboarding_refresh_url: String,
    circuit_breaker: StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>,
}

impl HttpGateway {
    /// Creates a client that opens its circuit after 3 consecutive failures
    pub fn new(
        base_url: String,
        api_key: String,
        onboarding_return_url: String,
        onboarding_refresh_url: String,
    ) -> Self {
        Self::with_circuit_breaker(
            base_url,
            api_key,
            onboarding_return_url,
            onboarding_refresh_url,
            3,
            60,
        )
    }

    pub fn with_circuit_breaker(
        base_url: String,
        api_key: String,
        onboarding_return_url: String,
        onboarding_refresh_url: String,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        HttpGateway {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            onboarding_return_url,
            onboarding_refresh_url,
            circuit_breaker,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(&self.api_key)
    }

    fn post_form(&self, path: &str, form: Vec<(String, String)>) -> RequestBuilder {
        self.client
            .post(self.url(path))
            .bearer_auth(&self.api_key)
            .form(&form)
    }

    async fn send<T>(&self, request: RequestBuilder) -> GatewayResult<T>
    where
        T: DeserializeOwned + Send + 'static,
    {
        let result = self
            .circuit_breaker
            .call(async move {
                let response = request.send().await?;
                let status = response.status();

                if !status.is_success() {
                    let message = response
                        .json::<ApiErrorBody>()
                        .await
                        .map(|body| body.error.message)
                        .unwrap_or_else(|_| status.to_string());
                    return Err(GatewayError::Api {
                        status: status.as_u16(),
                        message,
                    });
                }

                Ok(response.json::<T>().await?)
            })
            .await;

        match result {
            Ok(body) => Ok(body),
            Err(FailsafeError::Rejected) => Err(GatewayError::CircuitBreakerOpen(
                "payment gateway circuit breaker is open".to_string(),
            )),
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

fn pair(key: &str, value: impl ToString) -> (String, String) {
    (key.to_string(), value.to_string())
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    async fn create_held_payment(&self, request: &HeldPaymentRequest) -> GatewayResult<HeldPayment> {
        let mut form = vec![
            pair("amount", request.amount),
            pair("currency", &request.currency),
            pair("application_fee_amount", request.commission),
            pair("transfer_data[destination]", &request.destination_account),
            pair("transfer_group", &request.transfer_group),
            pair("automatic_payment_methods[enabled]", true),
        ];
        for (key, value) in &request.metadata {
            form.push((format!("metadata[{}]", key), value.clone()));
        }

        let intent: PaymentIntentResponse =
            self.send(self.post_form("/v1/payment_intents", form)).await?;
        let client_secret = intent.client_secret.ok_or_else(|| {
            GatewayError::InvalidResponse(format!("payment intent {} has no client secret", intent.id))
        })?;

        tracing::debug!(payment_intent = %intent.id, status = %intent.status, "Created held payment");
        Ok(HeldPayment {
            reference: intent.id,
            client_secret,
        })
    }

    async fn get_payment_status(&self, reference: &str) -> GatewayResult<PaymentOutcome> {
        let intent: PaymentIntentResponse = self
            .send(self.get(&format!("/v1/payment_intents/{}", reference)))
            .await?;
        Ok(map_payment_intent_status(&intent.status))
    }

    async fn create_refund(&self, reference: &str, reason: &str) -> GatewayResult<String> {
        let form = vec![
            pair("payment_intent", reference),
            pair("reason", "requested_by_customer"),
            pair("metadata[reason]", reason),
        ];
        let refund: RefundResponse = self.send(self.post_form("/v1/refunds", form)).await?;

        match refund.status.as_deref() {
            Some("failed") | Some("canceled") => Err(GatewayError::Declined(format!(
                "refund {} for {} was not accepted",
                refund.id, reference
            ))),
            _ => Ok(refund.id),
        }
    }

    async fn create_payout_destination(
        &self,
        owner_id: i64,
        country: &str,
        email: &str,
    ) -> GatewayResult<String> {
        let form = vec![
            pair("type", "express"),
            pair("country", country),
            pair("email", email),
            pair("capabilities[transfers][requested]", true),
            pair("metadata[user_id]", owner_id),
        ];
        let account: AccountResponse = self.send(self.post_form("/v1/accounts", form)).await?;
        Ok(account.id)
    }

    async fn create_onboarding_link(&self, account_id: &str) -> GatewayResult<String> {
        let form = vec![
            pair("account", account_id),
            pair("refresh_url", &self.onboarding_refresh_url),
            pair("return_url", &self.onboarding_return_url),
            pair("type", "account_onboarding"),
        ];
        let link: AccountLinkResponse = self.send(self.post_form("/v1/account_links", form)).await?;
        Ok(link.url)
    }

    async fn get_payout_destination_status(
        &self,
        account_id: &str,
    ) -> GatewayResult<PayoutDestinationStatus> {
        let account: AccountResponse = self
            .send(self.get(&format!("/v1/accounts/{}", account_id)))
            .await?;
        Ok(PayoutDestinationStatus {
            details_submitted: account.details_submitted,
            charges_enabled: account.charges_enabled,
            payouts_enabled: account.payouts_enabled,
        })
    }

    fn circuit_state(&self) -> &'static str {
        if self.circuit_breaker.is_call_permitted() {
            "closed"
        } else {
            "open"
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Matcher;
    use std::collections::BTreeMap;

    fn gateway(url: String) -> HttpGateway {
        HttpGateway::new(
            url,
            "sk_test_123".to_string(),
            "http://localhost/return".to_string(),
            "http://localhost/refresh".to_string(),
        )
    }

    #[test]
    fn test_gateway_client_creation() {
        let client = gateway("https://api.example.com/".to_string());
        assert_eq!(client.base_url, "https://api.example.com");
        assert_eq!(client.circuit_state(), "closed");
    }

    #[tokio::test]
    async fn test_create_held_payment_sends_split_and_group() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/payment_intents")
            .match_header("authorization", "Bearer sk_test_123")
            .match_body(Matcher::AllOf(vec![
                Matcher::UrlEncoded("amount".into(), "10000".into()),
                Matcher::UrlEncoded("application_fee_amount".into(), "800".into()),
                Matcher::UrlEncoded("transfer_data[destination]".into(), "acct_1".into()),
                Matcher::UrlEncoded("transfer_group".into(), "escrow_abc".into()),
                Matcher::UrlEncoded("metadata[payer_id]".into(), "7".into()),
            ]))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"pi_1","client_secret":"pi_1_secret","status":"requires_payment_method"}"#)
            .create_async()
            .await;

        let mut metadata = BTreeMap::new();
        metadata.insert("payer_id".to_string(), "7".to_string());
        let held = gateway(server.url())
            .create_held_payment(&HeldPaymentRequest {
                amount: 10_000,
                currency: "usd".to_string(),
                destination_account: "acct_1".to_string(),
                commission: 800,
                transfer_group: "escrow_abc".to_string(),
                metadata,
            })
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(held.reference, "pi_1");
        assert_eq!(held.client_secret, "pi_1_secret");
    }

    #[tokio::test]
    async fn test_payment_status_is_mapped() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/payment_intents/pi_2")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"pi_2","client_secret":null,"status":"canceled"}"#)
            .create_async()
            .await;

        let outcome = gateway(server.url()).get_payment_status("pi_2").await.unwrap();
        assert_eq!(outcome, PaymentOutcome::Failed);
    }

    #[tokio::test]
    async fn test_api_error_message_is_surfaced() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/refunds")
            .with_status(400)
            .with_header("content-type", "application/json")
            .with_body(r#"{"error":{"message":"Charge already refunded"}}"#)
            .create_async()
            .await;

        let err = gateway(server.url())
            .create_refund("pi_3", "duplicate")
            .await
            .unwrap_err();

        match err {
            GatewayError::Api { status, message } => {
                assert_eq!(status, 400);
                assert_eq!(message, "Charge already refunded");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_failed_refund_is_declined() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/refunds")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"re_1","status":"failed"}"#)
            .create_async()
            .await;

        let result = gateway(server.url()).create_refund("pi_4", "no show").await;
        assert!(matches!(result, Err(GatewayError::Declined(_))));
    }

    #[tokio::test]
    async fn test_account_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/v1/accounts/acct_9")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"acct_9","details_submitted":true,"charges_enabled":true,"payouts_enabled":false}"#)
            .create_async()
            .await;

        let status = gateway(server.url())
            .get_payout_destination_status("acct_9")
            .await
            .unwrap();
        assert!(status.details_submitted);
        assert!(!status.onboarding_complete());
    }

    #[tokio::test]
    async fn test_circuit_breaker_opens_after_failures() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", Matcher::Regex(r"^/v1/payment_intents/.*".into()))
            .with_status(500)
            .expect_at_least(3)
            .create_async()
            .await;

        let client = HttpGateway::with_circuit_breaker(
            server.url(),
            "sk_test_123".to_string(),
            "http://localhost/return".to_string(),
            "http://localhost/refresh".to_string(),
            3,
            30,
        );

        for _ in 0..3 {
            let _ = client.get_payment_status("pi_x").await;
        }

        let result = client.get_payment_status("pi_x").await;
        assert!(matches!(result, Err(GatewayError::CircuitBreakerOpen(_))));
        assert_eq!(client.circuit_state(), "open");
    }
}

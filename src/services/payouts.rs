use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use crate::domain::PayoutAccount;
use crate::gateway::PaymentGateway;
use crate::ports::PayoutAccountRepository;
use crate::services::escrow::EscrowError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionedAccount {
    pub account_id: String,
    pub onboarding_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountStatus {
    pub connected: bool,
    pub account_id: Option<String>,
    pub onboarding_complete: bool,
    pub charges_enabled: bool,
    pub payouts_enabled: bool,
}

/// Manages receiving parties' payout destinations at the gateway.
pub struct PayoutAccountService {
    repository: Arc<dyn PayoutAccountRepository>,
    gateway: Arc<dyn PaymentGateway>,
}

impl PayoutAccountService {
    pub fn new(repository: Arc<dyn PayoutAccountRepository>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { repository, gateway }
    }

    /// Creates the user's payout destination if needed and returns a fresh
    /// onboarding link. Calling it again reuses the existing destination.
    pub async fn provision(
        &self,
        user_id: i64,
        country: &str,
        email: &str,
    ) -> Result<ProvisionedAccount, EscrowError> {
        let account_id = match self.repository.get(user_id).await? {
            Some(existing) => existing.destination_account_id,
            None => {
                let account_id = self
                    .gateway
                    .create_payout_destination(user_id, country, email)
                    .await
                    .map_err(|e| {
                        error!(user_id, error = %e, "Failed to create payout destination");
                        e
                    })?;

                let now = Utc::now();
                self.repository
                    .upsert(&PayoutAccount {
                        user_id,
                        destination_account_id: account_id.clone(),
                        onboarding_complete: false,
                        created_at: now,
                        updated_at: now,
                    })
                    .await?;
                info!(user_id, account_id = %account_id, "Payout destination created");
                account_id
            }
        };

        let onboarding_url = self.gateway.create_onboarding_link(&account_id).await?;
        Ok(ProvisionedAccount {
            account_id,
            onboarding_url,
        })
    }

    /// Reads onboarding progress from the gateway and records completion.
    pub async fn status(&self, user_id: i64) -> Result<AccountStatus, EscrowError> {
        let Some(account) = self.repository.get(user_id).await? else {
            return Ok(AccountStatus {
                connected: false,
                account_id: None,
                onboarding_complete: false,
                charges_enabled: false,
                payouts_enabled: false,
            });
        };

        let remote = self
            .gateway
            .get_payout_destination_status(&account.destination_account_id)
            .await?;

        let complete = remote.onboarding_complete();
        if complete != account.onboarding_complete {
            self.repository
                .upsert(&PayoutAccount {
                    onboarding_complete: complete,
                    updated_at: Utc::now(),
                    ..account.clone()
                })
                .await?;
        }

        Ok(AccountStatus {
            connected: true,
            account_id: Some(account.destination_account_id),
            onboarding_complete: complete,
            charges_enabled: remote.charges_enabled,
            payouts_enabled: remote.payouts_enabled,
        })
    }
}

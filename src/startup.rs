use anyhow::{Context, Result};
use chrono::Duration;
use std::sync::Arc;

use crate::adapters::{
    InMemoryEscrowRepository, InMemoryPayoutAccountRepository, PostgresEscrowRepository,
    PostgresPayoutAccountRepository,
};
use crate::config::{Config, GatewayMode};
use crate::gateway::{HttpGateway, MockGateway, PaymentGateway};
use crate::ports::{EscrowRepository, PayoutAccountRepository};
use crate::services::{EscrowPolicy, EscrowTracker, PayoutAccountService};
use crate::{db, AppState};

/// The two stores the escrow services run against.
pub struct Stores {
    pub escrow: Arc<dyn EscrowRepository>,
    pub payout_accounts: Arc<dyn PayoutAccountRepository>,
}

/// Postgres when a database is configured, otherwise an in-memory store.
pub async fn connect_stores(config: &Config, migrate: bool) -> Result<Stores> {
    match &config.database_url {
        Some(url) => {
            let pool = db::create_pool(url, config.database_max_connections)
                .await
                .context("failed to connect to the database")?;
            if migrate {
                db::run_migrations(&pool).await?;
            }
            tracing::info!("Using Postgres escrow store");
            Ok(Stores {
                escrow: Arc::new(PostgresEscrowRepository::new(pool.clone())),
                payout_accounts: Arc::new(PostgresPayoutAccountRepository::new(pool)),
            })
        }
        None => {
            tracing::warn!("DATABASE_URL not set; escrow data is kept in memory and lost on exit");
            Ok(Stores {
                escrow: Arc::new(InMemoryEscrowRepository::new()),
                payout_accounts: Arc::new(InMemoryPayoutAccountRepository::new()),
            })
        }
    }
}

pub fn build_gateway(config: &Config) -> Arc<dyn PaymentGateway> {
    match config.gateway.mode {
        GatewayMode::Http => {
            tracing::info!(base_url = %config.gateway.base_url, "Payment gateway client initialized");
            Arc::new(HttpGateway::new(
                config.gateway.base_url.clone(),
                config.gateway.api_key.clone(),
                config.gateway.onboarding_return_url.clone(),
                config.gateway.onboarding_refresh_url.clone(),
            ))
        }
        GatewayMode::Mock => {
            tracing::warn!("GATEWAY_MODE=mock; payments are simulated in process");
            Arc::new(MockGateway::new())
        }
    }
}

pub fn policy_from_config(config: &Config) -> EscrowPolicy {
    EscrowPolicy {
        commission_rate_bps: config.commission_rate_bps,
        hold_period: Duration::days(config.escrow_hold_days),
        ..EscrowPolicy::default()
    }
}

/// Wires the services over already-constructed stores and gateway.
pub fn build_state(
    stores: Stores,
    gateway: Arc<dyn PaymentGateway>,
    policy: EscrowPolicy,
    admin_api_key: String,
    webhook_secret: String,
) -> AppState {
    let tracker = EscrowTracker::new(
        stores.escrow.clone(),
        stores.payout_accounts.clone(),
        gateway.clone(),
        policy,
    );
    let payouts = PayoutAccountService::new(stores.payout_accounts, gateway.clone());

    AppState {
        tracker: Arc::new(tracker),
        payouts: Arc::new(payouts),
        store: stores.escrow,
        gateway,
        admin_api_key: Arc::from(admin_api_key),
        webhook_secret: Arc::from(webhook_secret),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GatewayConfig, LogFormat};

    fn config() -> Config {
        Config {
            server_port: 3000,
            database_url: None,
            database_max_connections: 5,
            gateway: GatewayConfig {
                mode: GatewayMode::Mock,
                base_url: "https://api.stripe.com".to_string(),
                api_key: String::new(),
                webhook_secret: "whsec".to_string(),
                onboarding_return_url: "http://localhost/return".to_string(),
                onboarding_refresh_url: "http://localhost/refresh".to_string(),
            },
            commission_rate_bps: 1_000,
            escrow_hold_days: 3,
            auto_release_interval_secs: 0,
            admin_api_key: "admin".to_string(),
            cors_allowed_origins: None,
            log_format: LogFormat::Text,
        }
    }

    #[test]
    fn test_policy_from_config() {
        let policy = policy_from_config(&config());
        assert_eq!(policy.commission_rate_bps, 1_000);
        assert_eq!(policy.hold_period, Duration::days(3));
        assert_eq!(policy.auto_release_batch_size, EscrowPolicy::default().auto_release_batch_size);
    }

    #[tokio::test]
    async fn test_in_memory_store_without_database_url() {
        let stores = connect_stores(&config(), true).await.unwrap();
        assert!(stores.escrow.ping().await.is_ok());
        assert!(stores.payout_accounts.get(1).await.unwrap().is_none());
    }
}

use anyhow::Context;
use dotenvy::dotenv;
use std::env;

use crate::domain::commission::{BASIS_POINTS_SCALE, DEFAULT_COMMISSION_RATE_BPS};

/// Upper bound on the hold period, in days (ten years).
pub const MAX_ESCROW_HOLD_DAYS: i64 = 3650;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayMode {
    Http,
    Mock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub mode: GatewayMode,
    pub base_url: String,
    pub api_key: String,
    pub webhook_secret: String,
    pub onboarding_return_url: String,
    pub onboarding_refresh_url: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub gateway: GatewayConfig,
    pub commission_rate_bps: u32,
    pub escrow_hold_days: i64,
    pub auto_release_interval_secs: u64,
    pub admin_api_key: String,
    pub cors_allowed_origins: Option<String>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        let mode = parse_gateway_mode(&env_or("GATEWAY_MODE", "http"))?;
        let api_key = match mode {
            GatewayMode::Http => {
                env::var("GATEWAY_API_KEY").context("GATEWAY_API_KEY is required in http mode")?
            }
            GatewayMode::Mock => env::var("GATEWAY_API_KEY").unwrap_or_default(),
        };

        let config = Config {
            server_port: env_or("SERVER_PORT", "3000")
                .parse()
                .context("SERVER_PORT must be a port number")?,
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.trim().is_empty()),
            database_max_connections: env_or("DATABASE_MAX_CONNECTIONS", "5")
                .parse()
                .context("DATABASE_MAX_CONNECTIONS must be a positive integer")?,
            gateway: GatewayConfig {
                mode,
                base_url: env_or("GATEWAY_BASE_URL", "https://api.stripe.com"),
                api_key,
                webhook_secret: env::var("GATEWAY_WEBHOOK_SECRET")
                    .context("GATEWAY_WEBHOOK_SECRET is required")?,
                onboarding_return_url: env_or(
                    "ONBOARDING_RETURN_URL",
                    "http://localhost:3000/escrow/accounts/status",
                ),
                onboarding_refresh_url: env_or(
                    "ONBOARDING_REFRESH_URL",
                    "http://localhost:3000/escrow/accounts",
                ),
            },
            commission_rate_bps: env_or(
                "COMMISSION_RATE_BPS",
                &DEFAULT_COMMISSION_RATE_BPS.to_string(),
            )
            .parse()
            .context("COMMISSION_RATE_BPS must be a non-negative integer")?,
            escrow_hold_days: env_or("ESCROW_HOLD_DAYS", "7")
                .parse()
                .context("ESCROW_HOLD_DAYS must be an integer")?,
            auto_release_interval_secs: env_or("AUTO_RELEASE_INTERVAL_SECS", "3600")
                .parse()
                .context("AUTO_RELEASE_INTERVAL_SECS must be a non-negative integer")?,
            admin_api_key: env::var("ADMIN_API_KEY").context("ADMIN_API_KEY is required")?,
            cors_allowed_origins: env::var("CORS_ALLOWED_ORIGINS").ok(),
            log_format: parse_log_format(&env_or("LOG_FORMAT", "text"))?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if i64::from(self.commission_rate_bps) > BASIS_POINTS_SCALE {
            anyhow::bail!(
                "COMMISSION_RATE_BPS must be at most {}, got {}",
                BASIS_POINTS_SCALE,
                self.commission_rate_bps
            );
        }
        if self.escrow_hold_days < 0 {
            anyhow::bail!("ESCROW_HOLD_DAYS must not be negative");
        }
        if self.escrow_hold_days > MAX_ESCROW_HOLD_DAYS {
            anyhow::bail!(
                "ESCROW_HOLD_DAYS must be at most {}, got {}",
                MAX_ESCROW_HOLD_DAYS,
                self.escrow_hold_days
            );
        }
        if self.database_max_connections == 0 {
            anyhow::bail!("DATABASE_MAX_CONNECTIONS must be greater than 0");
        }
        if self.admin_api_key.trim().is_empty() {
            anyhow::bail!("ADMIN_API_KEY is empty");
        }
        if self.gateway.webhook_secret.trim().is_empty() {
            anyhow::bail!("GATEWAY_WEBHOOK_SECRET is empty");
        }
        url::Url::parse(&self.gateway.base_url).context("GATEWAY_BASE_URL is not a valid URL")?;
        Ok(())
    }
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_gateway_mode(raw: &str) -> anyhow::Result<GatewayMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "http" => Ok(GatewayMode::Http),
        "mock" => Ok(GatewayMode::Mock),
        other => anyhow::bail!("GATEWAY_MODE must be 'http' or 'mock', got '{}'", other),
    }
}

fn parse_log_format(raw: &str) -> anyhow::Result<LogFormat> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "text" => Ok(LogFormat::Text),
        "json" => Ok(LogFormat::Json),
        other => anyhow::bail!("LOG_FORMAT must be 'text' or 'json', got '{}'", other),
    }
}

/// Comma-separated origins, blanks dropped.
pub fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .map(str::to_string)
        .collect()
}

use chrono::Utc;
use clap::{Parser, Subcommand};

use crate::config::Config;
use crate::services::{Caller, EscrowTracker};

#[derive(Parser)]
#[command(name = "escrow-core")]
#[command(about = "Escrow Core - marketplace escrow transaction tracker", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Escrow transaction commands
    #[command(subcommand)]
    Escrow(EscrowCommands),

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Print the effective configuration
    Config,
}

#[derive(Subcommand)]
pub enum EscrowCommands {
    /// Release every held transaction whose hold period has ended
    AutoRelease,

    /// Show a transaction and its history
    Show {
        /// Transaction id
        #[arg(value_name = "ID")]
        id: i64,
    },
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_auto_release(tracker: &EscrowTracker) -> anyhow::Result<()> {
    let report = tracker.auto_release(Utc::now()).await?;

    println!("✓ Auto-release finished");
    println!("  Released: {:?}", report.released);
    println!("  Skipped:  {:?}", report.skipped);
    println!("  Failed:   {:?}", report.failed);

    if !report.failed.is_empty() {
        anyhow::bail!("{} transaction(s) failed to release", report.failed.len());
    }
    Ok(())
}

pub async fn handle_show(tracker: &EscrowTracker, id: i64) -> anyhow::Result<()> {
    let operator = Caller {
        user_id: 0,
        is_admin: true,
    };
    let (tx, history) = tracker.get_with_history(id, operator).await?;

    println!("Escrow transaction {}:", tx.id);
    println!("  Status:      {}", tx.status);
    println!("  Payer/Payee: {} -> {}", tx.payer_id, tx.payee_id);
    println!(
        "  Amount:      {} {} (commission {}, payout {})",
        tx.amount, tx.currency, tx.platform_commission_amount, tx.payee_payout_amount
    );
    println!("  Payment:     {}", tx.payment_intent_id);
    println!("  Release at:  {}", tx.escrow_release_date.format("%Y-%m-%d %H:%M:%S"));
    if let Some(refund_id) = &tx.refund_id {
        println!("  Refund:      {}", refund_id);
    }

    println!("History:");
    for entry in history {
        println!(
            "  {} {:<15} {} -> {}{}",
            entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
            entry.action.as_str(),
            entry
                .previous_status
                .map(|s| s.as_str())
                .unwrap_or("-"),
            entry.new_status,
            entry
                .action_reason
                .map(|reason| format!(" ({})", reason))
                .unwrap_or_default()
        );
    }

    Ok(())
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let Some(url) = &config.database_url else {
        anyhow::bail!("DATABASE_URL is not set; nothing to migrate");
    };

    let pool = crate::db::create_pool(url, config.database_max_connections).await?;
    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;
    println!("✓ Database migrations completed");

    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");
    config.validate()?;

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!(
        "  Database URL: {}",
        config
            .database_url
            .as_deref()
            .map(mask_password)
            .unwrap_or_else(|| "(unset, in-memory store)".to_string())
    );
    println!("  Gateway Mode: {:?}", config.gateway.mode);
    println!("  Gateway URL: {}", config.gateway.base_url);
    println!("  Commission: {} bps", config.commission_rate_bps);
    println!("  Escrow Hold: {} days", config.escrow_hold_days);
    println!(
        "  Auto-release Interval: {}",
        match config.auto_release_interval_secs {
            0 => "disabled".to_string(),
            secs => format!("{}s", secs),
        }
    );

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user = &url[slash_pos + 2..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

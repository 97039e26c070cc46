use clap::Parser;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use escrow_core::cli::{self, Cli, Commands, DbCommands, EscrowCommands};
use escrow_core::config::{Config, LogFormat};
use escrow_core::services::spawn_auto_release;
use escrow_core::{create_app, startup};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env()?;
    init_tracing(config.log_format);

    let cli = Cli::parse();
    match cli.command {
        None | Some(Commands::Serve) => serve(config).await,
        Some(Commands::Escrow(command)) => {
            let stores = startup::connect_stores(&config, false).await?;
            let state = startup::build_state(
                stores,
                startup::build_gateway(&config),
                startup::policy_from_config(&config),
                config.admin_api_key.clone(),
                config.gateway.webhook_secret.clone(),
            );
            match command {
                EscrowCommands::AutoRelease => cli::handle_auto_release(&state.tracker).await,
                EscrowCommands::Show { id } => cli::handle_show(&state.tracker, id).await,
            }
        }
        Some(Commands::Db(DbCommands::Migrate)) => cli::handle_db_migrate(&config).await,
        Some(Commands::Config) => cli::handle_config_validate(&config),
    }
}

fn init_tracing(format: LogFormat) {
    let filter =
        tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into());
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let stores = startup::connect_stores(&config, true).await?;
    let state = startup::build_state(
        stores,
        startup::build_gateway(&config),
        startup::policy_from_config(&config),
        config.admin_api_key.clone(),
        config.gateway.webhook_secret.clone(),
    );

    let worker = spawn_auto_release(state.tracker.clone(), config.auto_release_interval_secs);

    let app = create_app(state, config.cors_allowed_origins.as_deref());

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("Shutdown signal received");
        })
        .await?;

    if let Some(worker) = worker {
        worker.abort();
    }
    Ok(())
}

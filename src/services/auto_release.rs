use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{error, info};

use crate::services::escrow::EscrowTracker;

/// Runs the auto-release loop: every `interval`, releases escrowed funds
/// whose hold period has elapsed. Runs alongside the HTTP server.
pub async fn run_auto_release(tracker: Arc<EscrowTracker>, interval: Duration) {
    info!(interval_secs = interval.as_secs(), "Escrow auto-release worker started");

    loop {
        if let Err(e) = tracker.auto_release(Utc::now()).await {
            error!("Auto-release batch error: {}", e);
        }

        sleep(interval).await;
    }
}

/// Spawns the worker; an interval of zero disables it.
pub fn spawn_auto_release(tracker: Arc<EscrowTracker>, interval_secs: u64) -> Option<JoinHandle<()>> {
    if interval_secs == 0 {
        info!("Escrow auto-release worker disabled");
        return None;
    }
    Some(tokio::spawn(run_auto_release(
        tracker,
        Duration::from_secs(interval_secs),
    )))
}

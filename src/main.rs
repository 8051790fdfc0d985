use ballot_relay::config::Config;
use ballot_relay::coordinator::{VoteCoordinator, VoteEvent};
use ballot_relay::db::VoteQueue;
use ballot_relay::ledger::{HttpLedgerClient, LedgerClient, TimeoutLedger};
use ballot_relay::tasks::BackgroundSync;
use log::{error, info, warn};
use std::sync::Arc;
use tokio::sync::broadcast;

async fn log_events(mut events: broadcast::Receiver<VoteEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => {
                let json = serde_json::to_string(&event).unwrap_or_else(|_| format!("{:?}", event));
                match event {
                    VoteEvent::Confirmed { .. } | VoteEvent::Retrying { .. } | VoteEvent::Cancelled { .. } => {
                        info!("vote event: {}", json)
                    }
                    VoteEvent::AlreadyVoted { .. } | VoteEvent::Rejected { .. } => warn!("vote event: {}", json),
                    VoteEvent::MaxAttemptsExceeded { .. } => error!("vote event (needs manual retry): {}", json),
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => warn!("Event logger missed {} event(s)", missed),
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

#[tokio::main]
async fn main() {
    // Loads .env as well, so RUST_LOG can come from there
    let config = Config::from_env();
    env_logger::init();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return;
        }
    };

    let queue = match VoteQueue::open(&config.database_url).await {
        Ok(queue) => Arc::new(queue),
        Err(e) => {
            error!("Failed to open vote queue: {}", e);
            return;
        }
    };

    let http = match HttpLedgerClient::new(&config.ledger_api_url, config.ledger_api_token.clone(), config.ledger_timeout) {
        Ok(client) => client,
        Err(e) => {
            error!("Failed to create ledger client: {}", e);
            return;
        }
    };
    let ledger: Arc<dyn LedgerClient> = Arc::new(TimeoutLedger::new(http, config.ledger_timeout));

    // An attempt is at most three bounded ledger calls
    let claim_timeout = config.ledger_timeout * 4;
    let coordinator =
        Arc::new(VoteCoordinator::new(ledger, Arc::clone(&queue), config.retry).with_claim_timeout(claim_timeout));
    tokio::spawn(log_events(coordinator.subscribe()));

    match queue.len().await {
        Ok(n) => info!("{} vote(s) waiting in the queue", n),
        Err(e) => warn!("Could not count queued votes: {}", e),
    }

    let (sync, handle) = BackgroundSync::new(Arc::clone(&coordinator), config.sync_interval);
    let sync_task = sync.spawn();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }

    info!("Shutting down");
    handle.shutdown().await;
    match sync_task.await {
        Ok(stats) => info!("Sync task finished: {:?}", stats),
        Err(e) => error!("Sync task panicked: {}", e),
    }
    queue.database().close().await;
}

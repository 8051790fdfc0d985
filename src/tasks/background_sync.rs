use crate::coordinator::{DrainMode, DrainOutcome, VoteCoordinator};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

/// The only tag that makes the sync task drain the vote queue.
pub const SYNC_TAG: &str = "background-sync-votes";

const SIGNAL_BUFFER: usize = 32;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncSignal {
    /// A named sync event; only [`SYNC_TAG`] drains.
    Tag(String),
    /// Network came back; every pending vote is retried regardless of backoff.
    ConnectivityRestored,
    Shutdown,
}

/// Sends signals to a running [`BackgroundSync`] task.
#[derive(Debug, Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<SyncSignal>,
}

impl SyncHandle {
    pub async fn trigger(&self, tag: &str) -> bool {
        self.send(SyncSignal::Tag(tag.to_string())).await
    }

    pub async fn connectivity_restored(&self) -> bool {
        self.send(SyncSignal::ConnectivityRestored).await
    }

    pub async fn shutdown(&self) -> bool {
        self.send(SyncSignal::Shutdown).await
    }

    async fn send(&self, signal: SyncSignal) -> bool {
        self.tx.send(signal).await.is_ok()
    }
}

/// Counters kept by the sync loop, returned when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub drains: usize,
    pub coalesced: usize,
    pub ignored: usize,
}

pub struct BackgroundSync {
    coordinator: Arc<VoteCoordinator>,
    interval: Duration,
    rx: mpsc::Receiver<SyncSignal>,
}

impl BackgroundSync {
    pub fn new(coordinator: Arc<VoteCoordinator>, interval: Duration) -> (Self, SyncHandle) {
        let (tx, rx) = mpsc::channel(SIGNAL_BUFFER);
        (Self { coordinator, interval, rx }, SyncHandle { tx })
    }

    pub fn spawn(self) -> JoinHandle<SyncStats> {
        tokio::spawn(self.run())
    }

    /// Runs until shutdown is signalled or every handle is dropped.
    pub async fn run(mut self) -> SyncStats {
        info!("Starting background vote sync every {:?}", self.interval);
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut stats = SyncStats::default();

        loop {
            let action = tokio::select! {
                _ = ticker.tick() => Action::Drain(DrainMode::Scheduled),
                signal = self.rx.recv() => Action::for_signal(signal),
            };

            let mut next = match action {
                Action::Drain(mode) => Some(mode),
                Action::Ignore => {
                    stats.ignored += 1;
                    continue;
                }
                Action::Stop => break,
            };

            while let Some(mode) = next.take() {
                if mode == DrainMode::Immediate {
                    info!("Connectivity restored, retrying all pending votes");
                }
                match self.coordinator.drain_at(Utc::now(), mode).await {
                    Ok(DrainOutcome::Completed(_)) => stats.drains += 1,
                    Ok(DrainOutcome::AlreadyRunning) => stats.coalesced += 1,
                    Err(e) => error!("Background drain failed: {}", e),
                }

                // Triggers that piled up during the drain are already satisfied by it,
                // except a connectivity signal after a scheduled pass: that one still
                // owes the backed-off entries an immediate retry.
                loop {
                    match self.rx.try_recv() {
                        Ok(signal) => match Action::for_signal(Some(signal)) {
                            Action::Drain(DrainMode::Immediate) if mode == DrainMode::Scheduled && next.is_none() => {
                                next = Some(DrainMode::Immediate);
                            }
                            Action::Drain(_) => stats.coalesced += 1,
                            Action::Ignore => stats.ignored += 1,
                            Action::Stop => {
                                info!("Background vote sync stopped");
                                return stats;
                            }
                        },
                        Err(mpsc::error::TryRecvError::Empty) => break,
                        Err(mpsc::error::TryRecvError::Disconnected) => {
                            warn!("All sync handles dropped");
                            return stats;
                        }
                    }
                }
            }
        }

        info!("Background vote sync stopped");
        stats
    }
}

enum Action {
    Drain(DrainMode),
    Ignore,
    Stop,
}

impl Action {
    fn for_signal(signal: Option<SyncSignal>) -> Self {
        match signal {
            Some(SyncSignal::Tag(tag)) if tag == SYNC_TAG => Action::Drain(DrainMode::Scheduled),
            Some(SyncSignal::Tag(tag)) => {
                debug!("Ignoring sync event with tag {:?}", tag);
                Action::Ignore
            }
            Some(SyncSignal::ConnectivityRestored) => Action::Drain(DrainMode::Immediate),
            Some(SyncSignal::Shutdown) | None => Action::Stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordinator::RetryPolicy;
    use crate::db::VoteQueue;
    use crate::ledger::InMemoryLedger;
    use crate::coordinator::{SubmissionResult, VoteEvent};
    use crate::models::VoteIntent;

    const VOTER: &str = "0x52908400098527886e0f7030069857d2e4169ee7";

    async fn coordinator(ledger: Arc<InMemoryLedger>) -> Arc<VoteCoordinator> {
        let queue = Arc::new(VoteQueue::open("sqlite::memory:").await.unwrap());
        Arc::new(VoteCoordinator::new(ledger, queue, RetryPolicy::default()))
    }

    #[tokio::test]
    async fn connectivity_signal_drains_queue() {
        let ledger = Arc::new(InMemoryLedger::new());
        let coordinator = coordinator(ledger.clone()).await;

        ledger.set_offline(true);
        let intent = VoteIntent::new("e1", VOTER, b"ballot".to_vec());
        assert!(matches!(coordinator.submit(&intent).await.unwrap(), SubmissionResult::Queued { .. }));

        let (sync, handle) = BackgroundSync::new(coordinator.clone(), Duration::from_secs(3600));
        let mut events = coordinator.subscribe();
        let task = sync.spawn();

        ledger.set_offline(false);
        assert!(handle.connectivity_restored().await);
        let event = events.recv().await.unwrap();
        assert!(matches!(event, VoteEvent::Confirmed { .. }));

        handle.shutdown().await;
        let stats = task.await.unwrap();
        assert!(stats.drains >= 1);
        assert!(coordinator.queue().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn connectivity_during_scheduled_drain_still_retries_backed_off_votes() {
        const OTHER: &str = "0x8617e340b3d01fa5f11f306f4090fd50e238070d";
        let ledger = Arc::new(InMemoryLedger::new());
        let queue = Arc::new(VoteQueue::open("sqlite::memory:").await.unwrap());
        let policy = RetryPolicy {
            base_delay: Duration::from_secs(3600),
            max_delay: Duration::from_secs(3600),
            ..RetryPolicy::default()
        };
        let coordinator = Arc::new(VoteCoordinator::new(ledger.clone(), queue, policy));

        // First vote fails once and backs off for an hour; the second is due.
        ledger.set_offline(true);
        coordinator.submit(&VoteIntent::new("e1", VOTER, b"first".to_vec())).await.unwrap();
        coordinator.drain_all().await.unwrap();
        coordinator.submit(&VoteIntent::new("e1", OTHER, b"second".to_vec())).await.unwrap();
        ledger.set_offline(false);
        ledger.set_latency(Duration::from_millis(200));

        let mut events = coordinator.subscribe();
        let (sync, handle) = BackgroundSync::new(coordinator.clone(), Duration::from_secs(3600));
        let task = sync.spawn();

        // Lands while the first tick's scheduled drain is still talking to the ledger
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(handle.connectivity_restored().await);

        for _ in 0..2 {
            let event = tokio::time::timeout(Duration::from_secs(10), events.recv()).await.unwrap().unwrap();
            assert!(matches!(event, VoteEvent::Confirmed { .. }));
        }

        handle.shutdown().await;
        let stats = task.await.unwrap();
        assert_eq!(stats.drains, 2);
        assert!(coordinator.queue().is_empty().await.unwrap());
        assert_eq!(ledger.cast_calls(), 2);
    }

    #[tokio::test]
    async fn unknown_tags_are_ignored() {
        let ledger = Arc::new(InMemoryLedger::new());
        let coordinator = coordinator(ledger).await;
        let (sync, handle) = BackgroundSync::new(coordinator, Duration::from_secs(3600));
        let task = sync.spawn();

        assert!(handle.trigger("refresh-elections").await);
        handle.shutdown().await;
        let stats = task.await.unwrap();
        assert_eq!(stats.ignored, 1);
    }

    #[tokio::test]
    async fn dropping_handles_stops_the_task() {
        let ledger = Arc::new(InMemoryLedger::new());
        let coordinator = coordinator(ledger).await;
        let (sync, handle) = BackgroundSync::new(coordinator, Duration::from_secs(3600));
        let task = sync.spawn();
        drop(handle);
        task.await.unwrap();
    }
}

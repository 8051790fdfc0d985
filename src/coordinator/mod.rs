//! Submit-now-or-queue orchestration and queue draining.
//!
//! `submit` reserves the vote hash in the queue (as `submitting`) before any
//! ledger call, so the queue is the only place concurrent submissions and the
//! background drain coordinate. A retryable failure turns the reservation into a
//! `pending` entry; success or a terminal error releases it.
//!
//! A claim that is abandoned (the caller's future dropped mid-call, or a queue
//! write failing afterwards) is handed back to `pending` by [`Claim`]'s drop.
//! Claims older than the claim timeout are reclaimed at the start of every drain
//! as a backstop.

pub mod retry;

use crate::db::{AttemptUpdate, EnqueueOutcome, VoteQueue};
use crate::error::{LedgerError, QueueError, VerifyError, VoteError};
use crate::integrity::VoteHash;
use crate::ledger::{self, CastRequest, LedgerClient};
use crate::models::{LedgerVote, QueueEntry, TxReceipt, VoteIntent, VoteRecord, VoteStatus};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex};

pub use retry::RetryPolicy;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// How long a `submitting` claim may go without an outcome before a drain takes it back.
pub const DEFAULT_CLAIM_TIMEOUT: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmissionResult {
    Confirmed(TxReceipt),
    /// The ledger was unreachable; the vote waits in the queue.
    Queued { vote_hash: VoteHash },
    /// The same vote is already waiting in the queue.
    AlreadyQueued { vote_hash: VoteHash },
}

/// Outcomes discovered outside the submitting caller's request, mostly during drain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum VoteEvent {
    Confirmed { vote_hash: VoteHash, receipt: TxReceipt },
    AlreadyVoted { vote_hash: VoteHash },
    Rejected { vote_hash: VoteHash, reason: String },
    Retrying { vote_hash: VoteHash, attempts: u32, next_retry_at: DateTime<Utc> },
    MaxAttemptsExceeded { vote_hash: VoteHash, attempts: u32, last_error: String },
    Cancelled { vote_hash: VoteHash },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainMode {
    /// Only entries whose backoff has elapsed.
    Scheduled,
    /// Every pending entry, e.g. right after connectivity returns.
    Immediate,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DrainReport {
    pub confirmed: usize,
    pub already_voted: usize,
    pub rejected: usize,
    pub retrying: usize,
    pub exhausted: usize,
    /// Not yet due under the backoff schedule.
    pub deferred: usize,
    /// Claimed or cancelled by someone else between listing and claiming.
    pub skipped: usize,
    pub errors: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    Completed(DrainReport),
    /// Another drain was in progress; this request was coalesced into it.
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerificationStatus {
    /// Still local; not confirmed by the ledger yet.
    Queued(QueueEntry),
    Confirmed(LedgerVote),
    /// The ledger knows the vote but marks it invalid.
    Invalidated(LedgerVote),
    /// The ledger's vote under this hash belongs to another election or voter.
    Mismatch(LedgerVote),
    NotFound,
}

pub struct VoteCoordinator {
    ledger: Arc<dyn LedgerClient>,
    queue: Arc<VoteQueue>,
    policy: RetryPolicy,
    claim_timeout: Duration,
    events: broadcast::Sender<VoteEvent>,
    drain_lock: Mutex<()>,
}

/// A `submitting` claim held by one ledger attempt.
///
/// Dropped while armed, it puts the entry back to `pending` so the vote is not
/// stranded. Disarm it once the outcome has been written to the queue.
struct Claim {
    queue: Arc<VoteQueue>,
    vote_hash: VoteHash,
    claimed_at: Option<DateTime<Utc>>,
    armed: bool,
}

impl Claim {
    fn new(queue: &Arc<VoteQueue>, vote_hash: VoteHash, claimed_at: DateTime<Utc>) -> Self {
        Self {
            queue: Arc::clone(queue),
            vote_hash,
            claimed_at: Some(claimed_at),
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let queue = Arc::clone(&self.queue);
        let vote_hash = self.vote_hash;
        let claimed_at = self.claimed_at;

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move {
                    match queue.release_claim(&vote_hash, claimed_at).await {
                        Ok(true) => warn!("Submission of vote {} was abandoned; returned to the queue", vote_hash),
                        Ok(false) => debug!("Claim on vote {} already settled", vote_hash),
                        Err(e) => error!("Failed to release claim on vote {}: {}", vote_hash, e),
                    }
                });
            }
            Err(_) => warn!(
                "Vote {} left in submitting with no runtime to release it; a later drain reclaims it",
                vote_hash
            ),
        }
    }
}

impl VoteCoordinator {
    pub fn new(ledger: Arc<dyn LedgerClient>, queue: Arc<VoteQueue>, policy: RetryPolicy) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            ledger,
            queue,
            policy,
            claim_timeout: DEFAULT_CLAIM_TIMEOUT,
            events,
            drain_lock: Mutex::new(()),
        }
    }

    /// Sets how old an unsettled `submitting` claim must be before a drain
    /// reclaims it. Keep it above the longest a single attempt can take.
    pub fn with_claim_timeout(mut self, claim_timeout: Duration) -> Self {
        self.claim_timeout = claim_timeout;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VoteEvent> {
        self.events.subscribe()
    }

    pub fn queue(&self) -> &VoteQueue {
        &self.queue
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    fn emit(&self, event: VoteEvent) {
        // No subscribers is fine; the queue state is the durable record.
        if self.events.send(event).is_err() {
            debug!("No subscribers for vote event");
        }
    }

    pub async fn submit(&self, intent: &VoteIntent) -> Result<SubmissionResult, VoteError> {
        let now = Utc::now();
        let record = VoteRecord::from_intent(intent, now, VoteStatus::Submitting)?;
        let vote_hash = record.vote_hash;

        if self.queue.enqueue(&QueueEntry::new(record.clone())).await? == EnqueueOutcome::Conflict {
            if let Some(existing) = self.queue.get(&vote_hash).await? {
                if existing.status() == VoteStatus::FailedTerminal {
                    warn!("Vote {} resubmitted after exhausting its retries", vote_hash);
                    return Err(VoteError::MaxAttemptsExceeded { attempts: existing.attempts });
                }
            }
            info!("Vote {} is already queued", vote_hash);
            return Ok(SubmissionResult::AlreadyQueued { vote_hash });
        }
        let claim = Claim::new(&self.queue, vote_hash, now);

        match self.attempt(&record).await {
            Ok(receipt) => {
                info!("Vote {} confirmed in tx {}", vote_hash, receipt.tx_hash);
                self.release(claim).await;
                Ok(SubmissionResult::Confirmed(receipt))
            }
            Err(err) if err.is_retryable() => {
                let update = AttemptUpdate {
                    attempts: 0,
                    next_retry_at: now,
                    status: VoteStatus::Pending,
                    last_error: Some(err.to_string()),
                };
                self.queue.update_attempt(&vote_hash, &update).await?;
                claim.disarm();
                warn!("Vote {} queued for retry: {}", vote_hash, err);
                Ok(SubmissionResult::Queued { vote_hash })
            }
            Err(err) => {
                info!("Vote {} rejected: {}", vote_hash, err);
                self.release(claim).await;
                Err(VoteError::from_terminal(err))
            }
        }
    }

    /// Drops the submit-time reservation. If that fails the claim stays armed
    /// and hands the entry back to `pending`, where the drain's `has_voted`
    /// check settles it.
    async fn release(&self, claim: Claim) {
        match self.queue.remove(&claim.vote_hash).await {
            Ok(_) => claim.disarm(),
            Err(e) => error!("Failed to release queue reservation for {}: {}", claim.vote_hash, e),
        }
    }

    /// One full ledger attempt: fail fast on `has_voted`, then cast.
    async fn attempt(&self, record: &VoteRecord) -> Result<TxReceipt, LedgerError> {
        if self.ledger.has_voted(&record.election_id, &record.voter_address).await? {
            return Err(LedgerError::AlreadyVoted);
        }

        let mut request = CastRequest {
            election_id: record.election_id.clone(),
            voter_address: record.voter_address,
            candidate_id: record.candidate_id.clone(),
            encrypted_payload: record.encrypted_payload.clone(),
            vote_hash: record.vote_hash,
            gas_limit: None,
        };
        request.gas_limit = self
            .ledger
            .estimate_cast_cost(&request)
            .await?
            .map(ledger::with_safety_margin);

        self.ledger.cast_vote(&request).await
    }

    pub async fn drain(&self) -> Result<DrainOutcome, QueueError> {
        self.drain_at(Utc::now(), DrainMode::Scheduled).await
    }

    pub async fn drain_all(&self) -> Result<DrainOutcome, QueueError> {
        self.drain_at(Utc::now(), DrainMode::Immediate).await
    }

    /// Replays pending entries oldest-first. A failing entry never stops the pass.
    pub async fn drain_at(&self, now: DateTime<Utc>, mode: DrainMode) -> Result<DrainOutcome, QueueError> {
        let Ok(_running) = self.drain_lock.try_lock() else {
            debug!("Drain already in progress; coalescing");
            return Ok(DrainOutcome::AlreadyRunning);
        };

        let cutoff = chrono::Duration::from_std(self.claim_timeout)
            .ok()
            .and_then(|timeout| now.checked_sub_signed(timeout))
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.queue.reclaim_stale(cutoff).await?;

        let entries = self.queue.list_by_status(VoteStatus::Pending).await?;
        let mut report = DrainReport::default();
        if !entries.is_empty() {
            info!("Draining {} pending vote(s)", entries.len());
        }

        for entry in entries {
            let vote_hash = entry.vote_hash();
            if mode == DrainMode::Scheduled && !entry.is_due(now) {
                report.deferred += 1;
                continue;
            }

            match self.queue.claim(&vote_hash, now).await {
                Ok(true) => {}
                Ok(false) => {
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    error!("Failed to claim queued vote {}: {}", vote_hash, e);
                    report.errors += 1;
                    continue;
                }
            }
            let claim = Claim::new(&self.queue, vote_hash, now);

            match self.replay(&entry, now, &mut report).await {
                Ok(()) => claim.disarm(),
                Err(e) => {
                    error!("Failed to record outcome for queued vote {}: {}", vote_hash, e);
                    report.errors += 1;
                }
            }
        }

        if report != DrainReport::default() {
            info!("Drain finished: {:?}", report);
        }
        Ok(DrainOutcome::Completed(report))
    }

    async fn replay(&self, entry: &QueueEntry, now: DateTime<Utc>, report: &mut DrainReport) -> Result<(), QueueError> {
        let vote_hash = entry.vote_hash();

        match self.attempt(&entry.record).await {
            Ok(receipt) => {
                info!("Queued vote {} confirmed in tx {}", vote_hash, receipt.tx_hash);
                report.confirmed += 1;
                self.emit(VoteEvent::Confirmed { vote_hash, receipt });
                self.queue.remove(&vote_hash).await?;
            }
            Err(LedgerError::AlreadyVoted) => {
                info!("Queued vote {} dropped: voter already voted", vote_hash);
                report.already_voted += 1;
                self.emit(VoteEvent::AlreadyVoted { vote_hash });
                self.queue.remove(&vote_hash).await?;
            }
            Err(err) if err.is_retryable() => {
                let attempts = entry.attempts.saturating_add(1);
                let last_error = err.to_string();

                if self.policy.is_exhausted(attempts) {
                    warn!("Queued vote {} failed {} times, giving up: {}", vote_hash, attempts, last_error);
                    let update = AttemptUpdate {
                        attempts,
                        next_retry_at: now,
                        status: VoteStatus::FailedTerminal,
                        last_error: Some(last_error.clone()),
                    };
                    self.queue.update_attempt(&vote_hash, &update).await?;
                    report.exhausted += 1;
                    self.emit(VoteEvent::MaxAttemptsExceeded { vote_hash, attempts, last_error });
                } else {
                    let next_retry_at = self.policy.next_retry_at(now, attempts);
                    debug!("Queued vote {} retry {} at {}: {}", vote_hash, attempts, next_retry_at, last_error);
                    let update = AttemptUpdate {
                        attempts,
                        next_retry_at,
                        status: VoteStatus::Pending,
                        last_error: Some(last_error),
                    };
                    self.queue.update_attempt(&vote_hash, &update).await?;
                    report.retrying += 1;
                    self.emit(VoteEvent::Retrying { vote_hash, attempts, next_retry_at });
                }
            }
            Err(err) => {
                warn!("Queued vote {} rejected by ledger: {}", vote_hash, err);
                report.rejected += 1;
                self.emit(VoteEvent::Rejected { vote_hash, reason: err.to_string() });
                self.queue.remove(&vote_hash).await?;
            }
        }
        Ok(())
    }

    /// Withdraws a queued vote that no ledger call is currently in flight for.
    pub async fn cancel(&self, vote_hash: &VoteHash) -> Result<bool, QueueError> {
        let cancelled = self.queue.cancel(vote_hash).await?;
        if cancelled {
            info!("Queued vote {} cancelled", vote_hash);
            self.emit(VoteEvent::Cancelled { vote_hash: *vote_hash });
        }
        Ok(cancelled)
    }

    /// Gives a vote that exhausted its retries a fresh attempt budget.
    pub async fn retry_failed(&self, vote_hash: &VoteHash) -> Result<bool, QueueError> {
        let reset = self.queue.reset_failed(vote_hash, Utc::now()).await?;
        if reset {
            info!("Failed vote {} put back in the queue", vote_hash);
        }
        Ok(reset)
    }

    pub async fn pending(&self) -> Result<Vec<QueueEntry>, QueueError> {
        self.queue.list().await
    }

    pub async fn failed(&self) -> Result<Vec<QueueEntry>, QueueError> {
        self.queue.list_by_status(VoteStatus::FailedTerminal).await
    }

    /// Where a vote currently stands: local queue first, then the ledger.
    pub async fn verify(&self, vote_hash: &VoteHash) -> Result<VerificationStatus, VerifyError> {
        if let Some(entry) = self.queue.get(vote_hash).await? {
            return Ok(VerificationStatus::Queued(entry));
        }
        Ok(match self.ledger.get_vote(vote_hash).await? {
            Some(vote) if vote.is_valid => VerificationStatus::Confirmed(vote),
            Some(vote) => VerificationStatus::Invalidated(vote),
            None => VerificationStatus::NotFound,
        })
    }

    /// Recomputes the hash from the intent and checks the ledger's record matches it.
    pub async fn verify_intent(&self, intent: &VoteIntent) -> Result<VerificationStatus, VerifyError> {
        let voter = intent.validate()?;
        let vote_hash = intent.vote_hash()?;

        Ok(match self.verify(&vote_hash).await? {
            VerificationStatus::Confirmed(vote) | VerificationStatus::Invalidated(vote)
                if vote.election_id != intent.election_id || vote.voter != voter =>
            {
                warn!("Ledger vote {} does not match the submitted intent", vote_hash);
                VerificationStatus::Mismatch(vote)
            }
            status => status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;

    const VOTER: &str = "0x52908400098527886e0f7030069857d2e4169ee7";

    async fn setup() -> (Arc<InMemoryLedger>, VoteCoordinator) {
        let ledger = Arc::new(InMemoryLedger::new());
        let queue = Arc::new(VoteQueue::open("sqlite::memory:").await.unwrap());
        let coordinator = VoteCoordinator::new(ledger.clone(), queue, RetryPolicy::default());
        (ledger, coordinator)
    }

    #[tokio::test]
    async fn gas_estimate_gets_safety_margin() {
        let (ledger, coordinator) = setup().await;
        ledger.set_cost_estimate(Some(50_000));

        let intent = VoteIntent::new("e1", VOTER, b"ballot".to_vec());
        coordinator.submit(&intent).await.unwrap();
        assert_eq!(ledger.last_gas_limit(), Some(60_000));
    }

    #[tokio::test]
    async fn validation_errors_never_reach_queue_or_ledger() {
        let (ledger, coordinator) = setup().await;
        let intent = VoteIntent::new("e1", "not-an-address", b"ballot".to_vec());

        let err = coordinator.submit(&intent).await.unwrap_err();
        assert!(matches!(err, VoteError::Validation(_)));
        assert_eq!(ledger.has_voted_calls(), 0);
        assert!(coordinator.queue().is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn has_voted_outage_queues_the_vote() {
        let (ledger, coordinator) = setup().await;
        ledger.fail_next_has_voted(LedgerError::Timeout(std::time::Duration::from_secs(30)));

        let intent = VoteIntent::new("e1", VOTER, b"ballot".to_vec());
        let result = coordinator.submit(&intent).await.unwrap();
        assert!(matches!(result, SubmissionResult::Queued { .. }));
        assert_eq!(ledger.cast_calls(), 0);
    }

    #[tokio::test]
    async fn concurrent_drains_coalesce() {
        let (_ledger, coordinator) = setup().await;
        let _held = coordinator.drain_lock.lock().await;
        assert_eq!(coordinator.drain().await.unwrap(), DrainOutcome::AlreadyRunning);
    }

    #[test]
    fn events_serialize_with_tag() {
        let hash = crate::integrity::vote_hash("e1", b"x", &crate::integrity::VoterAddress::parse(VOTER).unwrap());
        let json = serde_json::to_value(VoteEvent::Cancelled { vote_hash: hash }).unwrap();
        assert_eq!(json["event"], "cancelled");
        assert_eq!(json["vote_hash"], hash.to_string());
    }
}

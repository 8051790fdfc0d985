//! In-process ledger used as a test double and for local dry runs.
//!
//! Any election id is accepted unless it has been closed. Failures can be
//! scripted per call, and every call is counted so tests can assert which
//! operations reached the ledger.

use super::{CastRequest, LedgerClient};
use crate::error::LedgerError;
use crate::integrity::{VoteHash, VoterAddress};
use crate::models::{ElectionMeta, LedgerVote, TxReceipt};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Default)]
struct State {
    offline: bool,
    latency: Option<Duration>,
    cost_estimate: Option<u64>,
    closed: HashSet<String>,
    elections: HashMap<String, ElectionMeta>,
    voted: HashSet<(String, VoterAddress)>,
    votes: HashMap<VoteHash, LedgerVote>,
    counts: HashMap<String, HashMap<String, u64>>,
    cast_failures: VecDeque<LedgerError>,
    has_voted_failures: VecDeque<LedgerError>,
    cast_calls: usize,
    has_voted_calls: usize,
    last_gas_limit: Option<u64>,
    block_number: u64,
}

#[derive(Default)]
pub struct InMemoryLedger {
    state: Mutex<State>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut state)
    }

    /// While offline every call fails with `NetworkUnavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.with_state(|s| s.offline = offline);
    }

    /// Delay applied before every call is answered.
    pub fn set_latency(&self, latency: Duration) {
        self.with_state(|s| s.latency = Some(latency));
    }

    pub fn set_cost_estimate(&self, estimate: Option<u64>) {
        self.with_state(|s| s.cost_estimate = estimate);
    }

    pub fn close_election(&self, election_id: &str) {
        self.with_state(|s| {
            s.closed.insert(election_id.to_string());
        });
    }

    pub fn register_election(&self, meta: ElectionMeta) {
        self.with_state(|s| {
            s.elections.insert(meta.id.clone(), meta);
        });
    }

    /// Fails the next `cast_vote` with `err`; queued failures are used in order.
    pub fn fail_next_cast(&self, err: LedgerError) {
        self.with_state(|s| s.cast_failures.push_back(err));
    }

    pub fn fail_next_has_voted(&self, err: LedgerError) {
        self.with_state(|s| s.has_voted_failures.push_back(err));
    }

    /// Marks a voter as having voted without going through `cast_vote`,
    /// as if the vote came from another device.
    pub fn record_external_vote(&self, election_id: &str, voter: VoterAddress) {
        self.with_state(|s| {
            s.voted.insert((election_id.to_string(), voter));
        });
    }

    pub fn set_candidate_counts(&self, election_id: &str, counts: HashMap<String, u64>) {
        self.with_state(|s| {
            s.counts.insert(election_id.to_string(), counts);
        });
    }

    pub fn invalidate_vote(&self, vote_hash: &VoteHash) {
        self.with_state(|s| {
            if let Some(vote) = s.votes.get_mut(vote_hash) {
                vote.is_valid = false;
            }
        });
    }

    pub fn cast_calls(&self) -> usize {
        self.with_state(|s| s.cast_calls)
    }

    pub fn has_voted_calls(&self) -> usize {
        self.with_state(|s| s.has_voted_calls)
    }

    pub fn last_gas_limit(&self) -> Option<u64> {
        self.with_state(|s| s.last_gas_limit)
    }

    async fn answer<T>(&self, f: impl FnOnce(&mut State) -> Result<T, LedgerError>) -> Result<T, LedgerError> {
        if let Some(latency) = self.with_state(|s| s.latency) {
            tokio::time::sleep(latency).await;
        }
        self.with_state(|s| {
            if s.offline {
                return Err(LedgerError::NetworkUnavailable("ledger offline".into()));
            }
            f(s)
        })
    }
}

#[async_trait]
impl LedgerClient for InMemoryLedger {
    async fn has_voted(&self, election_id: &str, voter: &VoterAddress) -> Result<bool, LedgerError> {
        self.answer(|s| {
            s.has_voted_calls += 1;
            if let Some(err) = s.has_voted_failures.pop_front() {
                return Err(err);
            }
            Ok(s.voted.contains(&(election_id.to_string(), *voter)))
        })
        .await
    }

    async fn estimate_cast_cost(&self, _request: &CastRequest) -> Result<Option<u64>, LedgerError> {
        self.answer(|s| Ok(s.cost_estimate)).await
    }

    async fn cast_vote(&self, request: &CastRequest) -> Result<TxReceipt, LedgerError> {
        self.answer(|s| {
            s.cast_calls += 1;
            s.last_gas_limit = request.gas_limit;
            if let Some(err) = s.cast_failures.pop_front() {
                return Err(err);
            }
            if s.closed.contains(&request.election_id) {
                return Err(LedgerError::ElectionNotActive);
            }
            let key = (request.election_id.clone(), request.voter_address);
            if s.voted.contains(&key) {
                return Err(LedgerError::AlreadyVoted);
            }

            let now = Utc::now();
            s.voted.insert(key);
            s.votes.insert(
                request.vote_hash,
                LedgerVote {
                    election_id: request.election_id.clone(),
                    timestamp: now,
                    voter: request.voter_address,
                    is_valid: true,
                },
            );
            if let Some(candidate_id) = &request.candidate_id {
                *s.counts
                    .entry(request.election_id.clone())
                    .or_default()
                    .entry(candidate_id.clone())
                    .or_insert(0) += 1;
            }
            if let Some(meta) = s.elections.get_mut(&request.election_id) {
                meta.total_votes += 1;
            }
            s.block_number += 1;

            Ok(TxReceipt {
                tx_hash: format!("0x{:064x}", s.block_number),
                vote_hash: Some(request.vote_hash),
                block_number: Some(s.block_number),
                gas_used: request.gas_limit,
                confirmed_at: now,
            })
        })
        .await
    }

    async fn get_vote_count(&self, election_id: &str) -> Result<u64, LedgerError> {
        self.answer(|s| {
            Ok(s.votes
                .values()
                .filter(|v| v.election_id == election_id && v.is_valid)
                .count() as u64)
        })
        .await
    }

    async fn get_candidate_counts(&self, election_id: &str) -> Result<HashMap<String, u64>, LedgerError> {
        self.answer(|s| Ok(s.counts.get(election_id).cloned().unwrap_or_default()))
            .await
    }

    async fn get_vote(&self, vote_hash: &VoteHash) -> Result<Option<LedgerVote>, LedgerError> {
        self.answer(|s| Ok(s.votes.get(vote_hash).cloned())).await
    }

    async fn get_election(&self, election_id: &str) -> Result<ElectionMeta, LedgerError> {
        self.answer(|s| s.elections.get(election_id).cloned().ok_or(LedgerError::NotFound))
            .await
    }
}

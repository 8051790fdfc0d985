//! The narrow interface through which the ledger is consumed.
//!
//! `cast_vote` is the only mutating call. Everything else is a read and may be
//! retried freely.

pub mod http;
pub mod memory;
pub mod timeout;

use crate::error::LedgerError;
use crate::integrity::{VoteHash, VoterAddress};
use crate::models::{ElectionMeta, LedgerVote, TxReceipt};
use async_trait::async_trait;
use std::collections::HashMap;

pub use http::HttpLedgerClient;
pub use memory::InMemoryLedger;
pub use timeout::TimeoutLedger;

/// Safety margin added on top of the ledger's own cost estimate, in percent.
pub const COST_SAFETY_MARGIN_PERCENT: u64 = 20;

/// Everything the ledger needs to record one vote.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastRequest {
    pub election_id: String,
    pub voter_address: VoterAddress,
    pub candidate_id: Option<String>,
    pub encrypted_payload: Vec<u8>,
    pub vote_hash: VoteHash,
    /// Upper bound on execution cost; `None` lets the ledger decide.
    pub gas_limit: Option<u64>,
}

/// Applies [`COST_SAFETY_MARGIN_PERCENT`] to an estimate.
pub fn with_safety_margin(estimate: u64) -> u64 {
    estimate.saturating_add(estimate.saturating_mul(COST_SAFETY_MARGIN_PERCENT) / 100)
}

#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn has_voted(&self, election_id: &str, voter: &VoterAddress) -> Result<bool, LedgerError>;

    /// Estimated cost of casting `request`, where the ledger charges for it.
    async fn estimate_cast_cost(&self, _request: &CastRequest) -> Result<Option<u64>, LedgerError> {
        Ok(None)
    }

    async fn cast_vote(&self, request: &CastRequest) -> Result<TxReceipt, LedgerError>;

    async fn get_vote_count(&self, election_id: &str) -> Result<u64, LedgerError>;

    /// Confirmed votes per candidate id.
    async fn get_candidate_counts(&self, election_id: &str) -> Result<HashMap<String, u64>, LedgerError>;

    /// Looks a vote up by hash; `Ok(None)` when the ledger has no such vote.
    async fn get_vote(&self, vote_hash: &VoteHash) -> Result<Option<LedgerVote>, LedgerError>;

    async fn get_election(&self, election_id: &str) -> Result<ElectionMeta, LedgerError>;
}

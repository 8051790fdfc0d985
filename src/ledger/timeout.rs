use super::{CastRequest, LedgerClient};
use crate::error::LedgerError;
use crate::integrity::{VoteHash, VoterAddress};
use crate::models::{ElectionMeta, LedgerVote, TxReceipt};
use async_trait::async_trait;
use log::warn;
use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

/// Bounds every call on the inner client; an overrun becomes [`LedgerError::Timeout`].
pub struct TimeoutLedger<L> {
    inner: L,
    limit: Duration,
}

impl<L: LedgerClient> TimeoutLedger<L> {
    pub fn new(inner: L, limit: Duration) -> Self {
        Self { inner, limit }
    }

    pub fn inner(&self) -> &L {
        &self.inner
    }

    async fn bounded<T, F>(&self, call: &'static str, fut: F) -> Result<T, LedgerError>
    where
        F: Future<Output = Result<T, LedgerError>>,
    {
        match tokio::time::timeout(self.limit, fut).await {
            Ok(result) => result,
            Err(_) => {
                warn!("Ledger call {} exceeded {:?}", call, self.limit);
                Err(LedgerError::Timeout(self.limit))
            }
        }
    }
}

#[async_trait]
impl<L: LedgerClient> LedgerClient for TimeoutLedger<L> {
    async fn has_voted(&self, election_id: &str, voter: &VoterAddress) -> Result<bool, LedgerError> {
        self.bounded("has_voted", self.inner.has_voted(election_id, voter)).await
    }

    async fn estimate_cast_cost(&self, request: &CastRequest) -> Result<Option<u64>, LedgerError> {
        self.bounded("estimate_cast_cost", self.inner.estimate_cast_cost(request)).await
    }

    async fn cast_vote(&self, request: &CastRequest) -> Result<TxReceipt, LedgerError> {
        self.bounded("cast_vote", self.inner.cast_vote(request)).await
    }

    async fn get_vote_count(&self, election_id: &str) -> Result<u64, LedgerError> {
        self.bounded("get_vote_count", self.inner.get_vote_count(election_id)).await
    }

    async fn get_candidate_counts(&self, election_id: &str) -> Result<HashMap<String, u64>, LedgerError> {
        self.bounded("get_candidate_counts", self.inner.get_candidate_counts(election_id)).await
    }

    async fn get_vote(&self, vote_hash: &VoteHash) -> Result<Option<LedgerVote>, LedgerError> {
        self.bounded("get_vote", self.inner.get_vote(vote_hash)).await
    }

    async fn get_election(&self, election_id: &str) -> Result<ElectionMeta, LedgerError> {
        self.bounded("get_election", self.inner.get_election(election_id)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::InMemoryLedger;

    const VOTER: &str = "0x52908400098527886e0f7030069857d2e4169ee7";

    #[tokio::test(start_paused = true)]
    async fn slow_call_times_out() {
        let ledger = InMemoryLedger::new();
        ledger.set_latency(Duration::from_secs(120));
        let bounded = TimeoutLedger::new(ledger, Duration::from_secs(30));
        let voter = VoterAddress::parse(VOTER).unwrap();

        let err = bounded.has_voted("e1", &voter).await.unwrap_err();
        assert_eq!(err, LedgerError::Timeout(Duration::from_secs(30)));
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn fast_call_passes_through() {
        let ledger = InMemoryLedger::new();
        ledger.set_latency(Duration::from_secs(1));
        let bounded = TimeoutLedger::new(ledger, Duration::from_secs(30));
        let voter = VoterAddress::parse(VOTER).unwrap();

        assert!(!bounded.has_voted("e1", &voter).await.unwrap());
    }
}

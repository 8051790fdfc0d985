use crate::error::TallyError;
use crate::ledger::LedgerClient;
use crate::models::Election;
use crate::voting::{ElectionResult, TallyRow};
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// Reads confirmed counts from the ledger and turns them into results.
pub struct ResultsTabulator {
    ledger: Arc<dyn LedgerClient>,
}

impl ResultsTabulator {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    pub async fn tabulate(&self, election: &Election) -> Result<ElectionResult, TallyError> {
        let counts = self.ledger.get_candidate_counts(&election.id).await?;
        let result = compute_result(election, &counts);
        info!(
            "Tabulated election {}: {} votes, {} winner(s)",
            election.id,
            result.total_votes,
            result.winners.len()
        );
        Ok(result)
    }
}

// Round to 2 decimal places
fn percentage(count: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (count as f64 * 10_000.0 / total as f64).round() / 100.0
}

/// Builds the result for `election` from per-candidate counts.
///
/// Every declared candidate appears, in declaration order, even with zero
/// votes. Counts for ids the election does not declare are ignored.
pub fn compute_result(election: &Election, counts: &HashMap<String, u64>) -> ElectionResult {
    for candidate_id in counts.keys() {
        if election.candidate(candidate_id).is_none() {
            warn!("Ignoring ledger count for unknown candidate {} in election {}", candidate_id, election.id);
        }
    }

    // Initialize all candidates, including those without votes
    let tallies: Vec<(&str, &str, u64)> = election
        .candidates
        .iter()
        .map(|c| (c.id.as_str(), c.name.as_str(), counts.get(&c.id).copied().unwrap_or(0)))
        .collect();

    let total_votes: u64 = tallies.iter().map(|(_, _, count)| *count).sum();
    let max_count = tallies.iter().map(|(_, _, count)| *count).max().unwrap_or(0);

    let winners = if total_votes == 0 {
        Vec::new()
    } else {
        tallies
            .iter()
            .filter(|(_, _, count)| *count == max_count)
            .map(|(id, _, _)| id.to_string())
            .collect()
    };

    let rows = tallies
        .into_iter()
        .map(|(id, name, count)| TallyRow {
            candidate_id: id.to_string(),
            candidate_name: name.to_string(),
            vote_count: count,
            percentage: percentage(count, total_votes),
        })
        .collect();

    ElectionResult {
        election_id: election.id.clone(),
        total_votes,
        rows,
        winners,
    }
}

pub mod tabulator;

use serde::{Deserialize, Serialize};

pub use tabulator::{compute_result, ResultsTabulator};

// Per-candidate line of an election result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TallyRow {
    pub candidate_id: String,
    pub candidate_name: String,
    pub vote_count: u64,
    pub percentage: f64, // rounded to 2 decimal places
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElectionResult {
    pub election_id: String,
    pub total_votes: u64,
    pub rows: Vec<TallyRow>,        // in candidate declaration order
    pub winners: Vec<String>,       // candidate ids, declaration order; empty when no votes were cast
}

impl ElectionResult {
    pub fn has_votes(&self) -> bool {
        self.total_votes > 0
    }

    pub fn is_tie(&self) -> bool {
        self.winners.len() > 1
    }

    pub fn row(&self, candidate_id: &str) -> Option<&TallyRow> {
        self.rows.iter().find(|row| row.candidate_id == candidate_id)
    }

    // Human-readable results, highest count first, winners in bold
    pub fn summary(&self) -> String {
        if !self.has_votes() {
            return "No votes were cast in this election.".to_string();
        }

        let mut sorted: Vec<&TallyRow> = self.rows.iter().collect();
        // Stable sort keeps declaration order among equal counts
        sorted.sort_by(|a, b| b.vote_count.cmp(&a.vote_count));

        let mut summary = String::new();
        for row in sorted {
            let line = if self.winners.contains(&row.candidate_id) {
                format!("**{}**: {} ({:.2}%)", row.candidate_name, votes(row.vote_count), row.percentage)
            } else {
                format!("{}: {} ({:.2}%)", row.candidate_name, votes(row.vote_count), row.percentage)
            };
            summary.push_str(&line);
            summary.push('\n');
        }

        if self.is_tie() {
            summary.push_str(&format!("\nTie between {} candidates.", self.winners.len()));
        }
        summary.push_str(&format!("\n{} counted.", votes(self.total_votes)));
        summary
    }
}

fn votes(count: u64) -> String {
    let noun = if count == 1 { "vote" } else { "votes" };
    format!("{} {}", count, noun)
}

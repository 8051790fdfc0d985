use crate::error::ValidationError;
use crate::integrity::{self, VoteHash, VoterAddress};
use crate::lifecycle::{self, ElectionStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

/// Upper bound on `max_choices` for any election.
pub const MAX_CHOICES_LIMIT: u32 = 20;

/// Largest encrypted ballot accepted for submission.
pub const MAX_PAYLOAD_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Election {
    pub id: String,
    pub title: String,
    pub candidates: Vec<Candidate>,
    pub max_choices: u32,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub party: Option<String>,
}

impl Candidate {
    pub fn new(name: impl Into<String>, party: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            party,
        }
    }
}

impl Election {
    /// Builds a new election with a fresh id after checking its definition.
    pub fn new(
        title: String,
        candidates: Vec<Candidate>,
        max_choices: u32,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        let election = Self {
            id: Uuid::new_v4().to_string(),
            title,
            candidates,
            max_choices,
            start_time,
            end_time,
        };
        election.validate()?;
        Ok(election)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.start_time >= self.end_time {
            return Err(ValidationError::InvalidTimeWindow);
        }
        if self.candidates.is_empty() {
            return Err(ValidationError::NoCandidates);
        }

        let mut seen = HashSet::new();
        for candidate in &self.candidates {
            if !seen.insert(candidate.id.as_str()) {
                return Err(ValidationError::DuplicateCandidate(candidate.id.clone()));
            }
        }

        let max = MAX_CHOICES_LIMIT.min(self.candidates.len() as u32);
        if self.max_choices == 0 || self.max_choices > max {
            return Err(ValidationError::InvalidMaxChoices { got: self.max_choices, max });
        }
        Ok(())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> ElectionStatus {
        lifecycle::status_at(now, self.start_time, self.end_time)
    }

    pub fn progress_at(&self, now: DateTime<Utc>) -> f64 {
        lifecycle::progress_at(now, self.start_time, self.end_time)
    }

    pub fn candidate(&self, candidate_id: &str) -> Option<&Candidate> {
        self.candidates.iter().find(|c| c.id == candidate_id)
    }
}

/// A caller's request to cast a vote. Not yet validated or hashed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteIntent {
    pub election_id: String,
    pub voter_address: String,
    /// Ballot selection forwarded to backends that encrypt server-side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    #[serde(with = "hex::serde")]
    pub encrypted_payload: Vec<u8>,
}

impl VoteIntent {
    pub fn new(election_id: impl Into<String>, voter_address: impl Into<String>, encrypted_payload: Vec<u8>) -> Self {
        Self {
            election_id: election_id.into(),
            voter_address: voter_address.into(),
            candidate_id: None,
            encrypted_payload,
        }
    }

    pub fn with_candidate(mut self, candidate_id: impl Into<String>) -> Self {
        self.candidate_id = Some(candidate_id.into());
        self
    }

    /// Checks the intent and returns the parsed voter address.
    pub fn validate(&self) -> Result<VoterAddress, ValidationError> {
        if self.election_id.trim().is_empty() {
            return Err(ValidationError::MissingElectionId);
        }
        if self.encrypted_payload.is_empty() {
            return Err(ValidationError::EmptyPayload);
        }
        if self.encrypted_payload.len() > MAX_PAYLOAD_BYTES {
            return Err(ValidationError::PayloadTooLarge(self.encrypted_payload.len(), MAX_PAYLOAD_BYTES));
        }
        VoterAddress::parse(&self.voter_address)
    }

    /// Validates the intent and computes its vote hash.
    pub fn vote_hash(&self) -> Result<VoteHash, ValidationError> {
        let voter = self.validate()?;
        Ok(integrity::vote_hash(&self.election_id, &self.encrypted_payload, &voter))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteStatus {
    Pending,
    Submitting,
    Confirmed,
    FailedTerminal,
}

impl VoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteStatus::Pending => "pending",
            VoteStatus::Submitting => "submitting",
            VoteStatus::Confirmed => "confirmed",
            VoteStatus::FailedTerminal => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(VoteStatus::Pending),
            "submitting" => Some(VoteStatus::Submitting),
            "confirmed" => Some(VoteStatus::Confirmed),
            "failed" => Some(VoteStatus::FailedTerminal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoteRecord {
    pub vote_hash: VoteHash,
    pub election_id: String,
    pub voter_address: VoterAddress,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
    #[serde(with = "hex::serde")]
    pub encrypted_payload: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub status: VoteStatus,
}

impl VoteRecord {
    /// Validates and hashes an intent into a record.
    pub fn from_intent(intent: &VoteIntent, created_at: DateTime<Utc>, status: VoteStatus) -> Result<Self, ValidationError> {
        let voter_address = intent.validate()?;
        let vote_hash = integrity::vote_hash(&intent.election_id, &intent.encrypted_payload, &voter_address);
        Ok(Self {
            vote_hash,
            election_id: intent.election_id.clone(),
            voter_address,
            candidate_id: intent.candidate_id.clone(),
            encrypted_payload: intent.encrypted_payload.clone(),
            created_at,
            status,
        })
    }
}

/// A vote waiting in the local queue for (another) ledger attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    pub record: VoteRecord,
    pub attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    /// When the current `submitting` claim was taken; `None` while not claimed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claimed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl QueueEntry {
    /// A fresh entry; one created as `submitting` counts as claimed at creation.
    pub fn new(record: VoteRecord) -> Self {
        let next_retry_at = record.created_at;
        let claimed_at = (record.status == VoteStatus::Submitting).then_some(record.created_at);
        Self {
            record,
            attempts: 0,
            next_retry_at,
            claimed_at,
            last_error: None,
        }
    }

    pub fn vote_hash(&self) -> VoteHash {
        self.record.vote_hash
    }

    pub fn status(&self) -> VoteStatus {
        self.record.status
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_retry_at <= now
    }
}

/// Ledger acknowledgement of a cast vote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxReceipt {
    pub tx_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_hash: Option<VoteHash>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<u64>,
    pub confirmed_at: DateTime<Utc>,
}

/// Election metadata as the ledger knows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionMeta {
    pub id: String,
    pub title: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub is_active: bool,
    pub total_votes: u64,
    #[serde(default)]
    pub creator: Option<String>,
}

/// A confirmed vote looked up by hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerVote {
    pub election_id: String,
    pub timestamp: DateTime<Utc>,
    pub voter: VoterAddress,
    pub is_valid: bool,
}

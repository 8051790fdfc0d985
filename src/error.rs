use std::time::Duration;
use thiserror::Error;

/// A vote or election definition was rejected before anything touched the queue or ledger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("election id must not be empty")]
    MissingElectionId,

    #[error("invalid voter address: {0}")]
    InvalidVoterAddress(String),

    #[error("encrypted payload must not be empty")]
    EmptyPayload,

    #[error("encrypted payload is {0} bytes, limit is {1}")]
    PayloadTooLarge(usize, usize),

    #[error("election must start before it ends")]
    InvalidTimeWindow,

    #[error("election needs at least one candidate")]
    NoCandidates,

    #[error("duplicate candidate id: {0}")]
    DuplicateCandidate(String),

    #[error("max choices must be between 1 and {max}, got {got}")]
    InvalidMaxChoices { got: u32, max: u32 },
}

/// Errors reported by a [`LedgerClient`](crate::ledger::LedgerClient).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("voter has already voted in this election")]
    AlreadyVoted,

    #[error("election is not active")]
    ElectionNotActive,

    #[error("transaction reverted{}", .0.as_deref().map(|r| format!(": {}", r)).unwrap_or_default())]
    TransactionReverted(Option<String>),

    #[error("ledger unreachable: {0}")]
    NetworkUnavailable(String),

    #[error("ledger call timed out after {0:?}")]
    Timeout(Duration),

    #[error("not found on ledger")]
    NotFound,

    #[error("unexpected ledger response: {0}")]
    InvalidResponse(String),
}

impl LedgerError {
    /// Transient failures that the queue absorbs and retries later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LedgerError::NetworkUnavailable(_) | LedgerError::Timeout(_) | LedgerError::InvalidResponse(_)
        )
    }
}

/// Failures of the durable vote queue.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("corrupt queue row {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// What a caller of the coordinator sees when a vote cannot be (or was not) cast.
#[derive(Debug, Error)]
pub enum VoteError {
    #[error("invalid vote: {0}")]
    Validation(#[from] ValidationError),

    #[error("you have already voted in this election")]
    AlreadyVoted,

    #[error("election is not active")]
    ElectionNotActive,

    #[error("transaction reverted{}", .0.as_deref().map(|r| format!(": {}", r)).unwrap_or_default())]
    TransactionReverted(Option<String>),

    #[error("gave up after {attempts} attempts")]
    MaxAttemptsExceeded { attempts: u32 },

    #[error("vote queue unavailable: {0}")]
    Queue(#[from] QueueError),
}

impl VoteError {
    /// Maps a terminal ledger error onto the caller-facing taxonomy.
    ///
    /// Retryable ledger errors never reach callers; if one slips through it is
    /// reported as a revert carrying the original message.
    pub fn from_terminal(err: LedgerError) -> Self {
        match err {
            LedgerError::AlreadyVoted => VoteError::AlreadyVoted,
            LedgerError::ElectionNotActive => VoteError::ElectionNotActive,
            LedgerError::TransactionReverted(reason) => VoteError::TransactionReverted(reason),
            other => VoteError::TransactionReverted(Some(other.to_string())),
        }
    }
}

/// A verification lookup could not be answered.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("invalid vote: {0}")]
    Validation(#[from] ValidationError),

    #[error("vote queue unavailable: {0}")]
    Queue(#[from] QueueError),

    #[error("verification temporarily unavailable: {0}")]
    Unavailable(#[from] LedgerError),
}

/// Tabulation could not read the ledger. Distinct from an election with no votes.
#[derive(Debug, Error)]
pub enum TallyError {
    #[error("results temporarily unavailable: {0}")]
    Unavailable(#[from] LedgerError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} must be a positive integer, got {value:?}")]
    InvalidNumber { name: &'static str, value: String },

    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
}

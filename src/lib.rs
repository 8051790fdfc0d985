//! Offline-tolerant vote submission against an external ledger, with
//! deterministic vote hashing and result tabulation.

pub mod config;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod integrity;
pub mod ledger;
pub mod lifecycle;
pub mod models;
pub mod tasks;
pub mod voting;

pub use coordinator::{DrainOutcome, DrainReport, RetryPolicy, SubmissionResult, VoteCoordinator, VoteEvent};
pub use error::{LedgerError, QueueError, TallyError, ValidationError, VoteError};
pub use integrity::{VoteHash, VoterAddress};
pub use models::{Candidate, Election, VoteIntent};

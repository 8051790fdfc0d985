//! Durable queue of votes that have not yet been confirmed by the ledger.
//!
//! Each entry is keyed by its vote hash; the table's UNIQUE constraint makes a
//! second enqueue of the same hash a no-op. Every mutation takes the writer lock
//! and runs inside a transaction, so the foreground submit path and the
//! background drain never interleave half-applied changes.

use super::Database;
use crate::error::QueueError;
use crate::integrity::{VoteHash, VoterAddress};
use crate::models::{QueueEntry, VoteRecord, VoteStatus};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Queued,
    /// An entry with the same vote hash already exists.
    Conflict,
}

/// New retry bookkeeping for an entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptUpdate {
    pub attempts: u32,
    pub next_retry_at: DateTime<Utc>,
    pub status: VoteStatus,
    pub last_error: Option<String>,
}

pub struct VoteQueue {
    db: Database,
    writer: Mutex<()>,
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, election_id, voter_address, candidate_id, encrypted_payload,
           status, attempts, next_retry_at, created_at, claimed_at, last_error
    FROM vote_queue
"#;

fn entry_from_row(row: &SqliteRow) -> Result<QueueEntry, QueueError> {
    let id = row.get::<String, _>("id");
    let corrupt = |reason: String| QueueError::Corrupt { id: id.clone(), reason };

    let vote_hash = id
        .parse::<VoteHash>()
        .map_err(|e| corrupt(format!("bad vote hash: {}", e)))?;
    let voter_address = VoterAddress::parse(&row.get::<String, _>("voter_address"))
        .map_err(|e| corrupt(e.to_string()))?;
    let status_str = row.get::<String, _>("status");
    let status = VoteStatus::parse(&status_str).ok_or_else(|| corrupt(format!("unknown status: {}", status_str)))?;
    let attempts = u32::try_from(row.get::<i64, _>("attempts"))
        .map_err(|_| corrupt("negative attempt count".to_string()))?;

    let time = |column: &str| {
        row.try_get::<Option<DateTime<Utc>>, _>(column)
            .map_err(|e| corrupt(format!("failed to parse {}: {}", column, e)))
    };
    let created_at = time("created_at")?.ok_or_else(|| corrupt("missing created_at".to_string()))?;
    let next_retry_at = time("next_retry_at")?.ok_or_else(|| corrupt("missing next_retry_at".to_string()))?;
    let claimed_at = time("claimed_at")?;

    Ok(QueueEntry {
        record: VoteRecord {
            vote_hash,
            election_id: row.get("election_id"),
            voter_address,
            candidate_id: row.get("candidate_id"),
            encrypted_payload: row.get("encrypted_payload"),
            created_at,
            status,
        },
        attempts,
        next_retry_at,
        claimed_at,
        last_error: row.get("last_error"),
    })
}

impl VoteQueue {
    pub fn new(db: Database) -> Self {
        Self { db, writer: Mutex::new(()) }
    }

    /// Opens the database and puts entries orphaned in `submitting` back to `pending`.
    pub async fn open(db_url: &str) -> Result<Self, QueueError> {
        let queue = Self::new(Database::connect(db_url).await?);
        queue.recover_in_flight().await?;
        Ok(queue)
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn enqueue(&self, entry: &QueueEntry) -> Result<EnqueueOutcome, QueueError> {
        let _writer = self.writer.lock().await;
        let mut tx = self.db.pool().begin().await?;

        let record = &entry.record;
        let result = sqlx::query(
            r#"
            INSERT INTO vote_queue (id, election_id, voter_address, candidate_id, encrypted_payload,
                                    status, attempts, next_retry_at, created_at, claimed_at, last_error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO NOTHING
            "#,
        )
        .bind(record.vote_hash.to_hex())
        .bind(&record.election_id)
        .bind(record.voter_address.to_string())
        .bind(&record.candidate_id)
        .bind(&record.encrypted_payload)
        .bind(record.status.as_str())
        .bind(entry.attempts as i64)
        .bind(entry.next_retry_at)
        .bind(record.created_at)
        .bind(entry.claimed_at)
        .bind(&entry.last_error)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        if result.rows_affected() == 0 {
            debug!("Vote {} already queued", record.vote_hash);
            Ok(EnqueueOutcome::Conflict)
        } else {
            debug!("Queued vote {} as {}", record.vote_hash, record.status.as_str());
            Ok(EnqueueOutcome::Queued)
        }
    }

    pub async fn get(&self, vote_hash: &VoteHash) -> Result<Option<QueueEntry>, QueueError> {
        let row = sqlx::query(&format!("{} WHERE id = ?", SELECT_COLUMNS))
            .bind(vote_hash.to_hex())
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(entry_from_row).transpose()
    }

    pub async fn contains(&self, vote_hash: &VoteHash) -> Result<bool, QueueError> {
        Ok(sqlx::query("SELECT 1 FROM vote_queue WHERE id = ?")
            .bind(vote_hash.to_hex())
            .fetch_optional(self.db.pool())
            .await?
            .is_some())
    }

    /// All entries, oldest first.
    pub async fn list(&self) -> Result<Vec<QueueEntry>, QueueError> {
        sqlx::query(&format!("{} ORDER BY seq", SELECT_COLUMNS))
            .fetch_all(self.db.pool())
            .await?
            .iter()
            .map(entry_from_row)
            .collect()
    }

    pub async fn list_by_status(&self, status: VoteStatus) -> Result<Vec<QueueEntry>, QueueError> {
        sqlx::query(&format!("{} WHERE status = ? ORDER BY seq", SELECT_COLUMNS))
            .bind(status.as_str())
            .fetch_all(self.db.pool())
            .await?
            .iter()
            .map(entry_from_row)
            .collect()
    }

    pub async fn len(&self) -> Result<u64, QueueError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM vote_queue")
            .fetch_one(self.db.pool())
            .await?;
        Ok(count as u64)
    }

    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len().await? == 0)
    }

    /// Removes an entry regardless of status. Returns whether it existed.
    pub async fn remove(&self, vote_hash: &VoteHash) -> Result<bool, QueueError> {
        self.execute_write("DELETE FROM vote_queue WHERE id = ?", vote_hash).await
    }

    /// Removes an entry only if no ledger call is in flight for it.
    pub async fn cancel(&self, vote_hash: &VoteHash) -> Result<bool, QueueError> {
        self.execute_write(
            "DELETE FROM vote_queue WHERE id = ? AND status IN ('pending', 'failed')",
            vote_hash,
        )
        .await
    }

    /// Atomically moves a `pending` entry to `submitting`, stamping the claim with `now`.
    ///
    /// Returns false when the entry is gone or already claimed, in which case
    /// the caller must not touch the ledger for it.
    pub async fn claim(&self, vote_hash: &VoteHash, now: DateTime<Utc>) -> Result<bool, QueueError> {
        let _writer = self.writer.lock().await;
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            "UPDATE vote_queue SET status = 'submitting', claimed_at = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(now)
        .bind(vote_hash.to_hex())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns a `submitting` entry to `pending`, but only while it still carries
    /// the claim taken at `claimed_at`. A newer claim on the same hash is left alone.
    pub async fn release_claim(
        &self,
        vote_hash: &VoteHash,
        claimed_at: Option<DateTime<Utc>>,
    ) -> Result<bool, QueueError> {
        let _writer = self.writer.lock().await;
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE vote_queue
            SET status = 'pending', claimed_at = NULL
            WHERE id = ? AND status = 'submitting' AND claimed_at IS ?
            "#,
        )
        .bind(vote_hash.to_hex())
        .bind(claimed_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Releases claims taken before `cutoff` (or with no recorded claim time).
    ///
    /// Such an entry belongs to an attempt that was abandoned without updating
    /// the queue; the next drain re-checks `has_voted` before casting it.
    pub async fn reclaim_stale(&self, cutoff: DateTime<Utc>) -> Result<u64, QueueError> {
        let mut reclaimed = 0;
        for entry in self.list_by_status(VoteStatus::Submitting).await? {
            if entry.claimed_at.is_some_and(|t| t >= cutoff) {
                continue;
            }
            if self.release_claim(&entry.vote_hash(), entry.claimed_at).await? {
                warn!("Vote {} was stuck in submitting; returned to the queue", entry.vote_hash());
                reclaimed += 1;
            }
        }
        Ok(reclaimed)
    }

    pub async fn update_attempt(&self, vote_hash: &VoteHash, update: &AttemptUpdate) -> Result<bool, QueueError> {
        let _writer = self.writer.lock().await;
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE vote_queue
            SET attempts = ?, next_retry_at = ?, status = ?, last_error = ?, claimed_at = NULL
            WHERE id = ?
            "#,
        )
        .bind(update.attempts as i64)
        .bind(update.next_retry_at)
        .bind(update.status.as_str())
        .bind(&update.last_error)
        .bind(vote_hash.to_hex())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Puts a `failed` entry back in line with a fresh attempt budget.
    pub async fn reset_failed(&self, vote_hash: &VoteHash, now: DateTime<Utc>) -> Result<bool, QueueError> {
        let _writer = self.writer.lock().await;
        let mut tx = self.db.pool().begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE vote_queue
            SET status = 'pending', attempts = 0, next_retry_at = ?, last_error = NULL, claimed_at = NULL
            WHERE id = ? AND status = 'failed'
            "#,
        )
        .bind(now)
        .bind(vote_hash.to_hex())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    /// Returns entries left in `submitting` by a previous process to `pending`.
    ///
    /// Whatever happened to their in-flight call, the next drain re-checks
    /// `has_voted` before casting again.
    pub async fn recover_in_flight(&self) -> Result<u64, QueueError> {
        let _writer = self.writer.lock().await;
        let mut tx = self.db.pool().begin().await?;

        let recovered = sqlx::query("UPDATE vote_queue SET status = 'pending', claimed_at = NULL WHERE status = 'submitting'")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        if recovered > 0 {
            warn!("Recovered {} vote(s) interrupted mid-submission", recovered);
        } else {
            info!("No interrupted submissions to recover");
        }
        Ok(recovered)
    }

    async fn execute_write(&self, sql: &str, vote_hash: &VoteHash) -> Result<bool, QueueError> {
        let _writer = self.writer.lock().await;
        let mut tx = self.db.pool().begin().await?;
        let result = sqlx::query(sql).bind(vote_hash.to_hex()).execute(&mut *tx).await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

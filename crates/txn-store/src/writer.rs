//! The shard writer: the critical path of §4.D. One instance owns one log
//! partition's staging/canonical tables and offset row for the process's
//! lifetime.
//!
//! Double buffering is realized here as a bounded `mpsc` channel of
//! capacity 4 (matching the reference implementation's `workChan`) feeding
//! a single consuming task: the coordinator fills the next batch while
//! this task commits the previous one, and because the task processes one
//! batch at a time there is always at most one write in flight — the same
//! guarantee the reference gets from an explicit `bufA`/`bufB` swap plus a
//! wait-group, without needing to hand-manage two buffers.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use sqlx::{PgPool, Postgres, Transaction};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use txn_copy::{encode_rows, CopyRow};
use txn_models::Transaction as TxnRecord;

use crate::offsets::ADVANCE_OFFSET_SQL;

const WORK_CHANNEL_CAPACITY: usize = 4;
const COMMIT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("dispatch cancelled before the writer accepted the batch")]
    Cancelled,
}

/// One dispatched unit of work: every record fetched for this partition
/// since the last dispatch, plus the highest broker offset among them.
pub struct WriteBatch {
    pub records: Vec<TxnRecord>,
    pub max_offset: i64,
}

impl WriteBatch {
    pub fn with_capacity(capacity: usize) -> Self {
        WriteBatch {
            records: Vec::with_capacity(capacity),
            max_offset: -1,
        }
    }

    pub fn push(&mut self, record: TxnRecord, offset: i64) {
        self.records.push(record);
        if offset > self.max_offset {
            self.max_offset = offset;
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

/// Handle the coordinator holds for one partition's writer task.
pub struct ShardWriter {
    partition: i32,
    work_tx: mpsc::Sender<WriteBatch>,
}

impl ShardWriter {
    /// Spawns the writer's commit task and returns a handle plus its
    /// `JoinHandle` (awaited on shutdown).
    pub fn spawn(partition: i32, pool: PgPool) -> (Self, JoinHandle<()>) {
        let (work_tx, work_rx) = mpsc::channel(WORK_CHANNEL_CAPACITY);
        let handle = tokio::spawn(run_writer(partition, pool, work_rx));
        (
            ShardWriter {
                partition,
                work_tx,
            },
            handle,
        )
    }

    pub fn partition(&self) -> i32 {
        self.partition
    }

    /// Dispatches a batch to the writer, blocking (propagating backpressure
    /// to the caller, and transitively to the broker client) if the channel
    /// is full. Races the send against `cancel` so a coordinator shutting
    /// down never hangs behind a writer stuck retrying a downed database
    /// (§5, §7) — mirrors the original coordinator's
    /// `select { case workChan <- batch: case <-ctx.Done(): }`. A batch lost
    /// to cancellation here was never fetched past the last committed
    /// offset, so it is safely re-delivered on restart.
    pub async fn dispatch(
        &self,
        batch: WriteBatch,
        cancel: &CancellationToken,
    ) -> Result<(), WriterError> {
        tokio::select! {
            result = self.work_tx.send(batch) => {
                result.map_err(|_| WriterError::Database(sqlx::Error::PoolClosed))
            }
            _ = cancel.cancelled() => Err(WriterError::Cancelled),
        }
    }
}

async fn run_writer(partition: i32, pool: PgPool, mut work_rx: mpsc::Receiver<WriteBatch>) {
    while let Some(batch) = work_rx.recv().await {
        if batch.is_empty() {
            continue;
        }
        let batch_len = batch.len();
        let started = std::time::Instant::now();

        loop {
            match commit_batch(&pool, partition, &batch).await {
                Ok(()) => break,
                Err(error) => {
                    tracing::error!(
                        partition,
                        batch_len,
                        ?error,
                        "shard writer commit failed, retrying"
                    );
                    tokio::time::sleep(COMMIT_RETRY_BACKOFF).await;
                }
            }
        }

        metrics::counter!(txn_metrics::WORKER_TRANSACTIONS_STAGED_TOTAL)
            .increment(batch_len as u64);
        metrics::histogram!(txn_metrics::WORKER_TRANSACTION_PROCESSING_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());
        metrics::gauge!(txn_metrics::KAFKA_COMMITTED_OFFSET, "partition" => partition.to_string())
            .set(batch.max_offset as f64);
    }
    tracing::info!(partition, "shard writer stopped");
}

/// Performs the entire per-batch algorithm of §4.D.5 in one transaction:
/// truncate staging, COPY the batch in, merge into canonical, advance the
/// offset, commit.
async fn commit_batch(pool: &PgPool, partition: i32, batch: &WriteBatch) -> Result<(), WriterError> {
    let mut tx: Transaction<'_, Postgres> = pool.begin().await?;

    let staging_table = format!("staging_{partition}");
    let canonical_table = format!("transactions_{partition}");

    sqlx::query(&format!("TRUNCATE {staging_table}"))
        .execute(&mut *tx)
        .await?;

    let now = now_utc();
    let rows: Vec<CopyRow> = batch
        .records
        .iter()
        .map(|record| CopyRow {
            id: record.id,
            account_id: record.account_id,
            amount: record.amount,
            created_at: now,
        })
        .collect();
    let encoded = encode_rows(&rows);

    let copy_sql = format!(
        "COPY {staging_table} (id, account_id, amount, created_at) FROM STDIN BINARY"
    );
    let mut copy_sink = tx.copy_in_raw(&copy_sql).await?;
    copy_sink.send(encoded.as_ref()).await?;
    copy_sink.finish().await?;

    let merge_sql = format!(
        "INSERT INTO {canonical_table} (id, account_id, amount, created_at) \
         SELECT id, account_id, amount, created_at FROM {staging_table} \
         ON CONFLICT (id) DO NOTHING"
    );
    sqlx::query(&merge_sql).execute(&mut *tx).await?;

    sqlx::query(ADVANCE_OFFSET_SQL)
        .bind(partition)
        .bind(batch.max_offset)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;
    Ok(())
}

fn now_utc() -> chrono::DateTime<chrono::Utc> {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    chrono::DateTime::from_timestamp(
        since_epoch.as_secs() as i64,
        since_epoch.subsec_nanos(),
    )
    .unwrap_or_else(chrono::Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn write_batch_tracks_max_offset() {
        let mut batch = WriteBatch::with_capacity(4);
        batch.push(
            TxnRecord {
                id: Uuid::new_v4(),
                account_id: Uuid::new_v4(),
                amount: 1,
            },
            10,
        );
        batch.push(
            TxnRecord {
                id: Uuid::new_v4(),
                account_id: Uuid::new_v4(),
                amount: 2,
            },
            7,
        );
        assert_eq!(batch.max_offset, 10);
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn empty_batch_reports_empty() {
        let batch = WriteBatch::with_capacity(1);
        assert!(batch.is_empty());
    }
}

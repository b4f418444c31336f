//! The write-behind roller (§4.F): a single background task that walks
//! partitions round-robin, aggregating each partition's transaction rows
//! into account balance deltas and truncating the drained partition.

use std::time::Duration;

use sqlx::PgPool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

const TICK_INTERVAL: Duration = Duration::from_secs(2);
const PER_PARTITION_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum RollError {
    #[error("database error rolling partition {partition}: {source}")]
    Database {
        partition: i32,
        #[source]
        source: sqlx::Error,
    },
}

/// Spawns the roller over `[min_partition, max_partition]` against the
/// given shard pools, advancing one partition per tick. `pool_for` maps a
/// partition to the `PgPool` owning its tables (see `ShardRouter`).
pub fn spawn<F>(
    min_partition: i32,
    max_partition: i32,
    pool_for: F,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    F: Fn(i32) -> PgPool + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let mut idx = min_partition;
        let mut ticker = tokio::time::interval(TICK_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("write-behind roller stopping");
                    return;
                }
                _ = ticker.tick() => {
                    let pool = pool_for(idx);
                    match roll_partition(&pool, idx).await {
                        Ok(rolled) => {
                            if rolled {
                                tracing::debug!(partition = idx, "write-behind completed");
                            }
                        }
                        Err(error) => {
                            tracing::error!(partition = idx, ?error, "write-behind error");
                        }
                    }
                    idx += 1;
                    if idx > max_partition {
                        idx = min_partition;
                    }
                }
            }
        }
    })
}

/// Rolls one partition. Returns `Ok(false)` if the partition had nothing
/// to roll (skip, per §4.F step 1).
pub async fn roll_partition(pool: &PgPool, partition: i32) -> Result<bool, RollError> {
    let table = format!("transactions_{partition}");

    let exists: (bool,) = tokio::time::timeout(
        PER_PARTITION_TIMEOUT,
        sqlx::query_as(&format!("SELECT EXISTS (SELECT 1 FROM {table} LIMIT 1)"))
            .fetch_one(pool),
    )
    .await
    .map_err(|_| RollError::Database {
        partition,
        source: sqlx::Error::PoolTimedOut,
    })?
    .map_err(|source| RollError::Database { partition, source })?;

    if !exists.0 {
        return Ok(false);
    }

    let mut tx = pool
        .begin()
        .await
        .map_err(|source| RollError::Database { partition, source })?;

    let update_sql = format!(
        "WITH aggregated_batch AS ( \
            SELECT account_id, SUM(amount) AS net_change FROM {table} GROUP BY account_id \
         ) \
         UPDATE accounts SET balance = accounts.balance + aggregated_batch.net_change \
         FROM aggregated_batch WHERE accounts.id = aggregated_batch.account_id"
    );
    sqlx::query(&update_sql)
        .execute(&mut *tx)
        .await
        .map_err(|source| RollError::Database { partition, source })?;

    // No archival table: an in-scope open question (§9) resolved in
    // DESIGN.md by accepting the reference implementation's trade-off —
    // rows are discarded once rolled, not preserved.
    sqlx::query(&format!("TRUNCATE {table}"))
        .execute(&mut *tx)
        .await
        .map_err(|source| RollError::Database { partition, source })?;

    tx.commit()
        .await
        .map_err(|source| RollError::Database { partition, source })?;

    Ok(true)
}

//! The coordinator's fetch loop (§4.C): pulls broker records for this
//! process's assigned partition range, groups them per partition into
//! `WriteBatch`es, and dispatches each to the shard writer that owns the
//! partition.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use txn_broker::PartitionFetcher;
use txn_store::{ShardWriter, WriteBatch};

/// Records accumulated per partition before being dispatched even if the
/// poll cycle hasn't ended yet (§4.C).
const BATCH_DISPATCH_THRESHOLD: usize = 50_000;

/// Upper bound on records drained in a single broker poll.
const FETCH_MAX_RECORDS_PER_POLL: usize = 50_000;

const FETCH_POLL_TIMEOUT: Duration = Duration::from_millis(500);

/// Runs the fetch loop until `cancel` fires. `PartitionFetcher::poll_batch`
/// is a synchronous call onto the underlying consumer, so this is meant to
/// run inside a `spawn_blocking` task; dispatch to a writer is async and is
/// driven here via the calling Tokio runtime's handle.
pub fn run_fetch_loop(
    fetcher: PartitionFetcher,
    mut writers: HashMap<i32, ShardWriter>,
    cancel: CancellationToken,
) {
    let handle = Handle::current();
    let mut active: HashMap<i32, WriteBatch> = HashMap::new();

    while !cancel.is_cancelled() {
        let started = Instant::now();
        let fetched = fetcher.poll_batch(FETCH_POLL_TIMEOUT, FETCH_MAX_RECORDS_PER_POLL);
        metrics::histogram!(txn_metrics::WORKER_TRANSACTION_FETCH_DURATION_SECONDS)
            .record(started.elapsed().as_secs_f64());

        if fetched.is_empty() {
            continue;
        }

        for record in fetched {
            metrics::gauge!(
                txn_metrics::KAFKA_HIGH_WATERMARK,
                "partition" => record.partition.to_string()
            )
            .set(record.offset as f64);

            let batch = active
                .entry(record.partition)
                .or_insert_with(|| WriteBatch::with_capacity(BATCH_DISPATCH_THRESHOLD));
            batch.push(record.record.transaction, record.offset);

            if batch.len() >= BATCH_DISPATCH_THRESHOLD {
                dispatch(&handle, &mut writers, record.partition, &mut active, &cancel);
            }
        }

        // End-of-poll-cycle dispatch: the latency path for low traffic.
        let pending: Vec<i32> = active.keys().copied().collect();
        for partition in pending {
            dispatch(&handle, &mut writers, partition, &mut active, &cancel);
        }
    }
    tracing::info!("coordinator fetch loop stopped");
}

/// Hands a partition's accumulated batch to its writer. The send is raced
/// against `cancel` (inside `ShardWriter::dispatch`) so a writer stuck
/// behind a downed database can never hang this loop past shutdown — the
/// blocked send is abandoned and the loop exits on its next cancellation
/// check, same as the original coordinator's `select` over its work
/// channel and `ctx.Done()`.
fn dispatch(
    handle: &Handle,
    writers: &mut HashMap<i32, ShardWriter>,
    partition: i32,
    active: &mut HashMap<i32, WriteBatch>,
    cancel: &CancellationToken,
) {
    let Some(batch) = active.remove(&partition) else {
        return;
    };
    if batch.is_empty() {
        return;
    }
    let Some(writer) = writers.get(&partition) else {
        tracing::warn!(partition, "no writer owns this partition, dropping batch");
        return;
    };
    if let Err(error) = handle.block_on(writer.dispatch(batch, cancel)) {
        tracing::error!(partition, ?error, "failed to dispatch batch to shard writer");
    }
}

//! The shard-writer process: the consumer-writer stage (§4.C-§4.F). Owns a
//! contiguous, statically assigned partition range for its lifetime —
//! fetching from the durable log, streaming into shard-local staging
//! tables, merging into the canonical table, advancing offsets, and
//! rolling drained partitions into account balances.

mod coordinator;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use txn_broker::PartitionFetcher;
use txn_store::{read_offsets, ShardRouter, ShardWriter};

/// How long shutdown waits for in-flight writer commits before giving up
/// and exiting anyway (§5) — restart is safe because the offset table and
/// merge idempotence guarantee it.
const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../txn-store/migrations");

#[derive(clap::Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Contiguous log partition range this process owns, `<min>-<max>`.
    #[clap(long = "partitions", default_value = "0-63")]
    pub partitions: String,

    /// Comma-separated list of broker bootstrap servers.
    #[clap(long = "brokers", env = "BROKER_SEEDS", default_value = "localhost:9092")]
    pub brokers: String,

    /// Port to bind the metrics/health server to.
    #[clap(long = "metrics-port", env = "METRICS_PORT", default_value = "9091")]
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionRange {
    pub min: i32,
    pub max: i32,
}

#[derive(Debug, thiserror::Error)]
pub enum PartitionRangeError {
    #[error("--partitions must be formatted as <min>-<max>, got {0:?}")]
    Malformed(String),
    #[error("--partitions min ({min}) must be <= max ({max})")]
    Inverted { min: i32, max: i32 },
}

impl PartitionRange {
    /// Parses `"<min>-<max>"`, validating `0 <= min <= max` (§6 CLI).
    pub fn parse(raw: &str) -> Result<Self, PartitionRangeError> {
        let (min_str, max_str) = raw
            .split_once('-')
            .ok_or_else(|| PartitionRangeError::Malformed(raw.to_string()))?;
        let min: i32 = min_str
            .parse()
            .map_err(|_| PartitionRangeError::Malformed(raw.to_string()))?;
        let max: i32 = max_str
            .parse()
            .map_err(|_| PartitionRangeError::Malformed(raw.to_string()))?;
        if min < 0 || min > max {
            return Err(PartitionRangeError::Inverted { min, max });
        }
        Ok(PartitionRange { min, max })
    }
}

/// Reads `DATABASE_URL_S1`, `DATABASE_URL_S2`, ... from the environment
/// until the sequence breaks, matching §6's multi-shard environment
/// contract.
fn shard_urls_from_env() -> Vec<String> {
    let mut urls = Vec::new();
    let mut n = 1u32;
    while let Ok(url) = std::env::var(format!("DATABASE_URL_S{n}")) {
        urls.push(url);
        n += 1;
    }
    urls
}

pub async fn run(args: Args, range: PartitionRange) -> anyhow::Result<()> {
    tracing::info!(
        partitions = %args.partitions,
        brokers = %args.brokers,
        "starting shard writer process"
    );

    let shard_urls = shard_urls_from_env();
    let router = Arc::new(
        ShardRouter::connect(&shard_urls)
            .await
            .context("connecting to database shards")?,
    );

    for pool in router.all_pools() {
        MIGRATOR
            .run(pool)
            .await
            .context("running database migrations")?;
    }

    let mut start_offsets = Vec::new();
    for partition in range.min..=range.max {
        let pool = router.pool_for_partition(partition);
        let offsets = read_offsets(pool, partition, partition)
            .await
            .context("reading durable offsets")?;
        start_offsets.extend(offsets);
    }

    let mut writers = HashMap::new();
    let mut writer_handles = Vec::new();
    for partition in range.min..=range.max {
        let pool = router.pool_for_partition(partition).clone();
        let (writer, handle) = ShardWriter::spawn(partition, pool);
        writers.insert(partition, writer);
        writer_handles.push(handle);
    }
    tracing::info!(
        min = range.min,
        max = range.max,
        count = writer_handles.len(),
        "shard writers spawned"
    );

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown signal received, stopping shard writer process");
                cancel.cancel();
            }
        }
    });

    let roller_router = router.clone();
    let roller_handle = txn_store::roller::spawn(
        range.min,
        range.max,
        move |p| roller_router.pool_for_partition(p).clone(),
        cancel.clone(),
    );

    let fetcher = PartitionFetcher::new(&args.brokers, range.min, range.max)
        .context("constructing broker fetcher")?;
    fetcher
        .assign(&start_offsets)
        .context("assigning broker partitions")?;

    let fetch_cancel = cancel.clone();
    let fetch_handle = tokio::task::spawn_blocking(move || {
        // `writers` is owned by the fetch loop: when it returns on
        // cancellation the map drops, closing every writer's work channel
        // and letting its decode/commit task drain (§5).
        coordinator::run_fetch_loop(fetcher, writers, fetch_cancel);
    });

    let metrics_app = txn_metrics::build_router();
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.metrics_port))
        .await
        .context("binding metrics port")?;
    tracing::info!(metrics_port = args.metrics_port, "shard writer metrics listening");

    let metrics_cancel = cancel.clone();
    let metrics_server = tokio::spawn(async move {
        axum::serve(metrics_listener, metrics_app)
            .with_graceful_shutdown(async move { metrics_cancel.cancelled().await })
            .await
    });

    cancel.cancelled().await;

    // The fetch loop's dispatches are raced against `cancel` (see
    // `coordinator::dispatch`), so it should return almost immediately;
    // bound the wait anyway so a stuck writer can never hold up exit past
    // the same deadline that governs the writer drain below (§5).
    match tokio::time::timeout(SHUTDOWN_DEADLINE, fetch_handle).await {
        Ok(Ok(())) => {}
        Ok(Err(error)) => tracing::error!(?error, "coordinator fetch loop task panicked"),
        Err(_) => tracing::warn!(
            deadline_secs = SHUTDOWN_DEADLINE.as_secs(),
            "shutdown timed out waiting for coordinator fetch loop to stop"
        ),
    }
    roller_handle.abort();

    let drain = tokio::time::timeout(SHUTDOWN_DEADLINE, async {
        for handle in writer_handles {
            let _ = handle.await;
        }
    })
    .await;
    if drain.is_err() {
        tracing::warn!(
            deadline_secs = SHUTDOWN_DEADLINE.as_secs(),
            "shutdown timed out waiting for in-flight writer commits"
        );
    }

    match metrics_server.await {
        Ok(Err(error)) => tracing::error!(?error, "metrics server exited with an error"),
        Err(error) => tracing::error!(?error, "metrics server task panicked"),
        Ok(Ok(())) => {}
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_valid_range() {
        let range = PartitionRange::parse("0-63").unwrap();
        assert_eq!(range, PartitionRange { min: 0, max: 63 });
    }

    #[test]
    fn rejects_inverted_range() {
        assert!(matches!(
            PartitionRange::parse("10-5"),
            Err(PartitionRangeError::Inverted { min: 10, max: 5 })
        ));
    }

    #[test]
    fn rejects_malformed_range() {
        assert!(matches!(
            PartitionRange::parse("abc"),
            Err(PartitionRangeError::Malformed(_))
        ));
    }

    #[test]
    fn shard_urls_from_env_reads_contiguous_sequence() {
        // Not run in parallel with other env-mutating tests in this crate;
        // kept minimal to avoid cross-test interference.
        std::env::remove_var("DATABASE_URL_S1");
        std::env::remove_var("DATABASE_URL_S2");
        assert!(shard_urls_from_env().is_empty());
        std::env::set_var("DATABASE_URL_S1", "postgres://a");
        std::env::set_var("DATABASE_URL_S2", "postgres://b");
        assert_eq!(
            shard_urls_from_env(),
            vec!["postgres://a".to_string(), "postgres://b".to_string()]
        );
        std::env::remove_var("DATABASE_URL_S1");
        std::env::remove_var("DATABASE_URL_S2");
    }
}

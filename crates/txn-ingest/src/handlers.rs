use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use axum::extract::State;
use axum::response::IntoResponse;
use axum::Json;
use bytes::Bytes;
use serde::Serialize;

use txn_broker::Producer;
use txn_codec::{decode_binary, decode_json, BufferPool};
use txn_models::{LogRecord, Transaction};

use crate::error::IngestError;

#[derive(Clone)]
pub struct AppState {
    pub producer: Arc<Producer>,
    pub pool: Arc<BufferPool>,
}

#[derive(Serialize)]
pub struct CreatedResponse {
    created_count: usize,
}

fn now_micros() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_micros() as i64
}

fn tag_with_timestamp(records: Vec<Transaction>, ingestion_timestamp_micros: i64) -> Vec<LogRecord> {
    records
        .into_iter()
        .map(|transaction| LogRecord {
            transaction,
            ingestion_timestamp_micros,
        })
        .collect()
}

async fn publish_and_respond(
    state: &AppState,
    log_records: Vec<LogRecord>,
) -> Result<impl IntoResponse, IngestError> {
    let created_count = log_records.len();
    let started = Instant::now();
    state.producer.publish_batch(&log_records).await?;
    metrics::histogram!(txn_metrics::KAFKA_PRODUCE_LATENCY_SECONDS)
        .record(started.elapsed().as_secs_f64());

    Ok((
        axum::http::StatusCode::CREATED,
        Json(CreatedResponse { created_count }),
    ))
}

/// `POST /transactions/json` — allocate-per-request `serde_json` decode.
#[tracing::instrument(skip_all)]
pub async fn post_json(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, IngestError> {
    let started = Instant::now();
    let records = decode_json(&body)?;
    metrics::histogram!(txn_metrics::UNMARSHAL_LATENCY_SECONDS, "endpoint" => "json")
        .record(started.elapsed().as_secs_f64());
    publish_and_respond(&state, tag_with_timestamp(records, now_micros())).await
}

/// `POST /transactions/effjson` — same decoder, pooled record batch.
#[tracing::instrument(skip_all)]
pub async fn post_effjson(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, IngestError> {
    let started = Instant::now();
    let decoded = decode_json(&body)?;

    let mut batch = state.pool.acquire();
    batch.records.extend(decoded);
    metrics::histogram!(txn_metrics::UNMARSHAL_LATENCY_SECONDS, "endpoint" => "effjson")
        .record(started.elapsed().as_secs_f64());

    // Read the pooled records by value (`Transaction` is `Copy`) rather than
    // taking the `Vec` out of `batch` — `mem::take` would hand the pool back
    // a batch whose `records` capacity was just reset to zero, defeating the
    // whole point of pooling it.
    let ingestion_timestamp_micros = now_micros();
    let log_records: Vec<LogRecord> = batch
        .records
        .iter()
        .map(|&transaction| LogRecord {
            transaction,
            ingestion_timestamp_micros,
        })
        .collect();
    state.pool.release(batch);

    publish_and_respond(&state, log_records).await
}

/// `POST /transactions/proto` — length-delimited binary batch.
#[tracing::instrument(skip_all)]
pub async fn post_proto(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<impl IntoResponse, IngestError> {
    let started = Instant::now();
    let records = decode_binary(&body)?;
    metrics::histogram!(txn_metrics::UNMARSHAL_LATENCY_SECONDS, "endpoint" => "proto")
        .record(started.elapsed().as_secs_f64());
    publish_and_respond(&state, tag_with_timestamp(records, now_micros())).await
}

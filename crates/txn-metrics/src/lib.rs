//! Metric name constants and the `/metrics` + `/healthz` router shared by
//! both binaries. Names below are contracts — do not rename without
//! updating any dashboards that scrape them.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub const WORKER_TRANSACTIONS_STAGED_TOTAL: &str = "worker_transactions_staged_total";
pub const WORKER_TRANSACTION_PROCESSING_DURATION_SECONDS: &str =
    "worker_transaction_processing_duration_seconds";
pub const WORKER_TRANSACTION_FETCH_DURATION_SECONDS: &str =
    "worker_transaction_fetch_duration_seconds";
pub const KAFKA_HIGH_WATERMARK: &str = "kafka_high_watermark";
pub const KAFKA_COMMITTED_OFFSET: &str = "kafka_committed_offset";
pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION_SECONDS: &str = "http_request_duration_seconds";
pub const KAFKA_PRODUCE_LATENCY_SECONDS: &str = "kafka_produce_latency_seconds";
pub const UNMARSHAL_LATENCY_SECONDS: &str = "unmarshal_latency_seconds";

/// Registers descriptions for every contract metric. Call once at process
/// start, after installing the recorder (`build_router` does both).
pub fn describe_all() {
    metrics::describe_counter!(
        WORKER_TRANSACTIONS_STAGED_TOTAL,
        "Transactions merged into the canonical table by shard writers"
    );
    metrics::describe_histogram!(
        WORKER_TRANSACTION_PROCESSING_DURATION_SECONDS,
        "Time to stage, merge, and commit one writer batch"
    );
    metrics::describe_histogram!(
        WORKER_TRANSACTION_FETCH_DURATION_SECONDS,
        "Time spent per broker fetch poll"
    );
    metrics::describe_gauge!(
        KAFKA_HIGH_WATERMARK,
        "Highest known broker offset, by partition"
    );
    metrics::describe_gauge!(
        KAFKA_COMMITTED_OFFSET,
        "Highest offset committed to the canonical table, by partition"
    );
    metrics::describe_counter!(HTTP_REQUESTS_TOTAL, "Ingest HTTP requests by path/method/status");
    metrics::describe_histogram!(
        HTTP_REQUEST_DURATION_SECONDS,
        "Ingest HTTP handler latency"
    );
    metrics::describe_histogram!(
        KAFKA_PRODUCE_LATENCY_SECONDS,
        "Time to receive broker acknowledgment for a produced batch"
    );
    metrics::describe_histogram!(
        UNMARSHAL_LATENCY_SECONDS,
        "Request body decode latency, by endpoint"
    );
}

/// Builds the `/metrics` + `/healthz` router shared by both binaries.
/// Installs the Prometheus recorder as a side effect; call at most once
/// per process.
pub fn build_router() -> axum::Router<()> {
    let prom = PrometheusBuilder::new()
        .set_buckets(
            &prometheus::exponential_buckets(0.00001, 2.5, 15)
                .expect("calculating histogram buckets"),
        )
        .expect("calculating histogram buckets")
        .install_recorder()
        .expect("failed to install prometheus recorder");

    describe_all();

    axum::Router::new()
        .route("/metrics", get(prometheus_metrics))
        .route("/healthz", get(healthz))
        .layer(tower_http::trace::TraceLayer::new_for_http())
        .with_state(prom)
}

#[tracing::instrument(skip_all)]
async fn prometheus_metrics(State(prom_handle): State<PrometheusHandle>) -> (StatusCode, String) {
    (StatusCode::OK, prom_handle.render())
}

async fn healthz() -> StatusCode {
    StatusCode::OK
}

//! The HTTP intake binary: decodes submitted transaction batches and
//! publishes them to the durable log, synchronously awaiting broker
//! acknowledgment before replying (§4.A, §4.B).

mod error;
mod handlers;

use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use axum::extract::{DefaultBodyLimit, Request};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::post;
use axum::Router;
use tower_http::trace::TraceLayer;

use handlers::AppState;
use txn_broker::Producer;
use txn_codec::{BufferPool, MAX_BODY_BYTES};

pub use handlers::CreatedResponse;

/// How many records a pooled (`effjson`) batch is preallocated for. Mirrors
/// the reference implementation's ingest-side pool sizing (§4.A).
const POOL_BATCH_RECORDS: usize = 1_000;

#[derive(clap::Parser, Debug)]
#[clap(author, version, about, long_about = None)]
pub struct Args {
    /// Comma-separated list of broker bootstrap servers.
    #[clap(long = "brokers", env = "BROKER_SEEDS", default_value = "localhost:9092")]
    pub brokers: String,

    /// Port to bind the HTTP server to.
    #[clap(long = "port", env = "PORT", default_value = "8080")]
    pub port: u16,

    /// Port to bind the metrics/health server to.
    #[clap(long = "metrics-port", env = "METRICS_PORT", default_value = "9090")]
    pub metrics_port: u16,
}

pub async fn run(args: Args) -> anyhow::Result<()> {
    tracing::info!(brokers = %args.brokers, "starting ingest server");

    let producer = Producer::new(&args.brokers).context("constructing broker producer")?;
    let state = AppState {
        producer: Arc::new(producer),
        pool: Arc::new(BufferPool::new(POOL_BATCH_RECORDS)),
    };

    let app = Router::new()
        .route("/transactions/json", post(handlers::post_json))
        .route("/transactions/effjson", post(handlers::post_effjson))
        .route("/transactions/proto", post(handlers::post_proto))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(middleware::from_fn(record_http_metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let metrics_app = txn_metrics::build_router();

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port))
        .await
        .context("binding HTTP port")?;
    let metrics_listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.metrics_port))
        .await
        .context("binding metrics port")?;

    tracing::info!(port = args.port, metrics_port = args.metrics_port, "ingest server listening");

    let serve_started = Instant::now();
    let result = tokio::try_join!(
        async {
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("serving ingest HTTP")
        },
        async {
            axum::serve(metrics_listener, metrics_app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("serving metrics HTTP")
        },
    );
    tracing::debug!(elapsed = ?serve_started.elapsed(), "ingest server stopped");
    result.map(|_| ())
}

/// Records `http_requests_total{path,method,status}` and
/// `http_request_duration_seconds` (§6) around every ingest request.
async fn record_http_metrics(request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let method = request.method().to_string();
    let started = Instant::now();

    let response = next.run(request).await;

    let status = response.status().as_u16().to_string();
    metrics::counter!(
        txn_metrics::HTTP_REQUESTS_TOTAL,
        "path" => path.clone(),
        "method" => method.clone(),
        "status" => status,
    )
    .increment(1);
    metrics::histogram!(
        txn_metrics::HTTP_REQUEST_DURATION_SECONDS,
        "path" => path,
        "method" => method,
    )
    .record(started.elapsed().as_secs_f64());

    response
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("failed to install CTRL+C signal handler");
    tracing::info!("shutdown signal received, stopping ingest server");
}

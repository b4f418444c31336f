//! HTTP error mapping for the ingest handlers, following the taxonomy of
//! §7: client-input errors surface as 4xx without error-level logging;
//! broker failures surface as 5xx and are logged.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use txn_codec::decode::{BINARY_BATCH_LIMIT, JSON_BATCH_LIMIT, MAX_BODY_BYTES};
use txn_models::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("client input error: {0}")]
    ClientInput(#[from] CodecError),
    #[error("broker error: {0}")]
    Broker(#[from] txn_broker::BrokerError),
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        match self {
            IngestError::ClientInput(err) => {
                let message = match &err {
                    CodecError::BatchTooLarge { .. } if is_at_binary_scale(&err) => {
                        format!("Request batch size too large (limit {BINARY_BATCH_LIMIT})")
                    }
                    CodecError::BatchTooLarge { .. } => {
                        format!("Request batch size too large (limit {JSON_BATCH_LIMIT})")
                    }
                    CodecError::BodyTooLarge { .. } => {
                        format!("Request body too large (limit {MAX_BODY_BYTES} bytes)")
                    }
                    other => other.to_string(),
                };
                (StatusCode::BAD_REQUEST, axum::Json(ErrorBody { error: message })).into_response()
            }
            IngestError::Broker(err) => {
                tracing::error!(error = ?err, "producer failed to publish batch");
                (
                    StatusCode::BAD_GATEWAY,
                    axum::Json(ErrorBody {
                        error: "upstream broker unavailable".to_string(),
                    }),
                )
                    .into_response()
            }
        }
    }
}

fn is_at_binary_scale(err: &CodecError) -> bool {
    matches!(err, CodecError::BatchTooLarge { limit, .. } if *limit == BINARY_BATCH_LIMIT)
}

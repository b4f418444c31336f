//! Record decoding and buffer pooling shared by the ingest handlers and the
//! partition coordinator.

pub mod decode;
pub mod pool;

pub use decode::{decode_binary, decode_json, BINARY_BATCH_LIMIT, JSON_BATCH_LIMIT, MAX_BODY_BYTES};
pub use pool::{BufferPool, ByteSlab, RecordBatch, SlabExhausted};

//! Sharded Postgres access: offset storage, the shard writer critical
//! path, and the write-behind roller.

pub mod offsets;
pub mod roller;
pub mod shard;
pub mod writer;

pub use offsets::{read_offsets, OffsetError};
pub use shard::{ShardError, ShardRouter};
pub use writer::{ShardWriter, WriteBatch, WriterError};

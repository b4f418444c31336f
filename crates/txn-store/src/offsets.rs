//! The durable offset table. Read at startup to seed fetch positions;
//! written only inside a shard writer's merge transaction (§4.E) — never
//! from here directly, so this module exposes only the read path plus the
//! SQL text the writer executes in its own transaction.

use sqlx::PgPool;

#[derive(Debug, thiserror::Error)]
pub enum OffsetError {
    #[error("database error reading offsets: {0}")]
    Database(#[from] sqlx::Error),
}

/// Reads `last_offset` for every partition in `[min_partition,
/// max_partition]` from `kafka_offsets`. Partitions absent from the table
/// are omitted; callers resume those from the beginning (§4.C step 2).
pub async fn read_offsets(
    pool: &PgPool,
    min_partition: i32,
    max_partition: i32,
) -> Result<Vec<(i32, i64)>, OffsetError> {
    let rows: Vec<(i32, i64)> = sqlx::query_as(
        "SELECT partition_id, last_offset FROM kafka_offsets \
         WHERE partition_id BETWEEN $1 AND $2",
    )
    .bind(min_partition)
    .bind(max_partition)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

/// SQL executed by the shard writer inside its merge transaction to
/// advance the durable offset. Guarded by `last_offset < $2` so a replayed
/// (already-applied) batch cannot move the offset backwards.
pub const ADVANCE_OFFSET_SQL: &str = "\
    INSERT INTO kafka_offsets (partition_id, last_offset, updated_at) \
    VALUES ($1, $2, now()) \
    ON CONFLICT (partition_id) DO UPDATE \
    SET last_offset = EXCLUDED.last_offset, updated_at = EXCLUDED.updated_at \
    WHERE kafka_offsets.last_offset < EXCLUDED.last_offset";

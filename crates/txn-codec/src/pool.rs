//! A bounded free-list of preallocated `RecordBatch` slabs, mirroring the
//! writer-side and ingest-side pools of the reference implementation.
//! Slabs are never resized; oversize requests bypass the pool entirely and
//! allocate a transient, non-returned buffer (see `pool::transient`).

use std::sync::Mutex;

use txn_models::Transaction;

/// Average encoded size of a single record on the broker wire, plus a
/// fixed safety margin, used to size each slab's backing byte buffer.
pub const AVG_RECORD_SIZE: usize = 49;
pub const SAFETY_MARGIN: usize = 15;

/// A cursor-addressed byte buffer backing one `RecordBatch`. `next_record`
/// hands out non-overlapping sub-slices in order; `reset` rewinds the
/// cursor without zeroing (callers overwrite before reading).
pub struct ByteSlab {
    buf: Vec<u8>,
    offset: usize,
}

#[derive(Debug, thiserror::Error)]
#[error("byte slab exhausted")]
pub struct SlabExhausted;

impl ByteSlab {
    pub fn new(capacity: usize) -> Self {
        ByteSlab {
            buf: vec![0u8; capacity],
            offset: 0,
        }
    }

    /// Returns a mutable sub-slice of `size` bytes positioned at the
    /// current cursor, advancing the cursor past it.
    pub fn next_record(&mut self, size: usize) -> Result<&mut [u8], SlabExhausted> {
        if self.offset + size > self.buf.len() {
            return Err(SlabExhausted);
        }
        let start = self.offset;
        self.offset += size;
        Ok(&mut self.buf[start..start + size])
    }

    pub fn reset(&mut self) {
        self.offset = 0;
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }
}

/// A decoded record batch: a slab of transactions plus the byte slab their
/// values may be re-encoded into downstream (e.g. by the coordinator when
/// copying broker record values into a writer's source buffer).
pub struct RecordBatch {
    pub records: Vec<Transaction>,
    pub byte_slab: ByteSlab,
    capacity: usize,
}

impl RecordBatch {
    fn new(capacity: usize) -> Self {
        RecordBatch {
            records: Vec::with_capacity(capacity),
            byte_slab: ByteSlab::new(capacity * (AVG_RECORD_SIZE + SAFETY_MARGIN)),
            capacity,
        }
    }

    pub fn reset(&mut self) {
        self.records.clear();
        self.byte_slab.reset();
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Bounded free-list of `RecordBatch` slabs, all sized for `capacity`
/// records. `acquire` returns a pool-backed batch when one is free, or
/// allocates a fresh one up to the pool's configured ceiling; beyond that
/// ceiling callers should construct a transient batch instead (see
/// [`RecordBatch::new`] is private — use [`BufferPool::acquire_transient`]).
pub struct BufferPool {
    capacity: usize,
    free: Mutex<Vec<RecordBatch>>,
}

impl BufferPool {
    pub fn new(capacity: usize) -> Self {
        BufferPool {
            capacity,
            free: Mutex::new(Vec::new()),
        }
    }

    pub fn record_capacity(&self) -> usize {
        self.capacity
    }

    /// Acquires a batch from the free list, allocating a new one if the
    /// list is empty. Never blocks.
    pub fn acquire(&self) -> RecordBatch {
        let mut free = self.free.lock().expect("buffer pool mutex poisoned");
        free.pop().unwrap_or_else(|| RecordBatch::new(self.capacity))
    }

    /// Returns a batch to the free list after resetting it. Call this
    /// instead of dropping a pool-acquired batch whenever it should be
    /// reused.
    pub fn release(&self, mut batch: RecordBatch) {
        batch.reset();
        self.free.lock().expect("buffer pool mutex poisoned").push(batch);
    }

    /// Allocates a batch that is never returned to the pool, for requests
    /// whose size exceeds what the pool's fixed-capacity slabs can hold.
    pub fn acquire_transient(&self, capacity: usize) -> RecordBatch {
        RecordBatch::new(capacity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_record_advances_cursor() {
        let mut slab = ByteSlab::new(100);
        let r1 = slab.next_record(40).unwrap();
        assert_eq!(r1.len(), 40);
        let r2 = slab.next_record(40).unwrap();
        assert_eq!(r2.len(), 40);
        assert!(slab.next_record(21).is_err());
    }

    #[test]
    fn reset_rewinds_cursor() {
        let mut slab = ByteSlab::new(40);
        slab.next_record(40).unwrap();
        assert!(slab.next_record(1).is_err());
        slab.reset();
        assert!(slab.next_record(40).is_ok());
    }

    #[test]
    fn pool_reuses_released_batches() {
        let pool = BufferPool::new(10);
        let batch = pool.acquire();
        assert_eq!(pool.free.lock().unwrap().len(), 0);
        pool.release(batch);
        assert_eq!(pool.free.lock().unwrap().len(), 1);
        let _reused = pool.acquire();
        assert_eq!(pool.free.lock().unwrap().len(), 0);
    }

    #[test]
    fn released_batch_is_reset() {
        let pool = BufferPool::new(10);
        let mut batch = pool.acquire();
        batch.records.push(Transaction {
            id: uuid::Uuid::new_v4(),
            account_id: uuid::Uuid::new_v4(),
            amount: 1,
        });
        pool.release(batch);
        let batch = pool.acquire();
        assert!(batch.is_empty());
    }
}

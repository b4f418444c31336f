//! Request-body decoders for the three ingest endpoints. All three enforce
//! the same size limits; they differ only in parser and whether they draw
//! from a pool.

use txn_models::{CodecError, JsonTransaction, Transaction, WIRE_RECORD_LEN};

/// Maximum accepted request body, in bytes (`100_000 * 128`).
pub const MAX_BODY_BYTES: usize = 100_000 * 128;

/// Hard cap on records per JSON batch.
pub const JSON_BATCH_LIMIT: usize = 20_000;

/// Hard cap on records per binary batch.
pub const BINARY_BATCH_LIMIT: usize = 10_000;

fn check_body_size(body: &[u8]) -> Result<(), CodecError> {
    if body.len() > MAX_BODY_BYTES {
        return Err(CodecError::BodyTooLarge {
            got: body.len(),
            limit: MAX_BODY_BYTES,
        });
    }
    Ok(())
}

/// Decodes `[{"id":..,"account_id":..,"amount":..}, ...]`. Used by both
/// `/transactions/json` (allocate-per-request) and `/transactions/effjson`
/// (pooled record batch) — the pooling happens at the call site by writing
/// the result into a pool-acquired `RecordBatch`; the parser itself is the
/// same `serde_json` path for both.
pub fn decode_json(body: &[u8]) -> Result<Vec<Transaction>, CodecError> {
    check_body_size(body)?;
    let records: Vec<JsonTransaction> = serde_json::from_slice(body)?;
    if records.is_empty() {
        return Err(CodecError::EmptyBatch);
    }
    if records.len() > JSON_BATCH_LIMIT {
        return Err(CodecError::BatchTooLarge {
            got: records.len(),
            limit: JSON_BATCH_LIMIT,
        });
    }
    Ok(records.into_iter().map(Transaction::from).collect())
}

/// Decodes a length-delimited binary batch: a `u32` big-endian record
/// count followed by that many fixed-layout `WIRE_RECORD_LEN`-byte
/// records back to back.
pub fn decode_binary(body: &[u8]) -> Result<Vec<Transaction>, CodecError> {
    check_body_size(body)?;
    if body.len() < 4 {
        return Err(CodecError::Truncated {
            expected: 4,
            actual: body.len(),
        });
    }
    let count = u32::from_be_bytes(body[0..4].try_into().unwrap()) as usize;
    if count == 0 {
        return Err(CodecError::EmptyBatch);
    }
    if count > BINARY_BATCH_LIMIT {
        return Err(CodecError::BatchTooLarge {
            got: count,
            limit: BINARY_BATCH_LIMIT,
        });
    }
    let expected_len = 4 + count * WIRE_RECORD_LEN;
    if body.len() != expected_len {
        return Err(CodecError::Truncated {
            expected: expected_len,
            actual: body.len(),
        });
    }

    let mut records = Vec::with_capacity(count);
    let mut offset = 4;
    for _ in 0..count {
        records.push(Transaction::decode_wire(
            &body[offset..offset + WIRE_RECORD_LEN],
        )?);
        offset += WIRE_RECORD_LEN;
    }
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sample_txn() -> Transaction {
        Transaction {
            id: Uuid::new_v4(),
            account_id: Uuid::new_v4(),
            amount: 42,
        }
    }

    #[test]
    fn json_roundtrip() {
        let txn = sample_txn();
        let body = serde_json::to_vec(&[txn]).unwrap();
        let decoded = decode_json(&body).unwrap();
        assert_eq!(decoded, vec![txn]);
    }

    #[test]
    fn json_rejects_empty_batch() {
        let body = serde_json::to_vec::<[Transaction; 0]>(&[]).unwrap();
        assert!(matches!(decode_json(&body), Err(CodecError::EmptyBatch)));
    }

    #[test]
    fn json_rejects_oversize_batch() {
        let txns: Vec<Transaction> = (0..JSON_BATCH_LIMIT + 1).map(|_| sample_txn()).collect();
        let body = serde_json::to_vec(&txns).unwrap();
        assert!(matches!(
            decode_json(&body),
            Err(CodecError::BatchTooLarge { .. })
        ));
    }

    #[test]
    fn json_rejects_oversize_body() {
        let body = vec![b'a'; MAX_BODY_BYTES + 1];
        assert!(matches!(
            decode_json(&body),
            Err(CodecError::BodyTooLarge { .. })
        ));
    }

    fn encode_binary_batch(txns: &[Transaction]) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&(txns.len() as u32).to_be_bytes());
        for txn in txns {
            let mut buf = [0u8; WIRE_RECORD_LEN];
            txn.encode_wire(&mut buf);
            body.extend_from_slice(&buf);
        }
        body
    }

    #[test]
    fn binary_roundtrip() {
        let txns = vec![sample_txn(), sample_txn()];
        let body = encode_binary_batch(&txns);
        assert_eq!(decode_binary(&body).unwrap(), txns);
    }

    #[test]
    fn binary_rejects_empty_batch() {
        let body = encode_binary_batch(&[]);
        assert!(matches!(decode_binary(&body), Err(CodecError::EmptyBatch)));
    }

    #[test]
    fn binary_rejects_oversize_batch() {
        let txns: Vec<Transaction> = (0..BINARY_BATCH_LIMIT + 1).map(|_| sample_txn()).collect();
        let body = encode_binary_batch(&txns);
        assert!(matches!(
            decode_binary(&body),
            Err(CodecError::BatchTooLarge { .. })
        ));
    }

    #[test]
    fn binary_rejects_length_mismatch() {
        let mut body = encode_binary_batch(&[sample_txn()]);
        body.push(0);
        assert!(matches!(
            decode_binary(&body),
            Err(CodecError::Truncated { .. })
        ));
    }
}

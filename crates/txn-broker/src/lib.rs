//! Durable-log producer and partition fetcher, wrapping `rdkafka`.
//!
//! The partition key is always the account id verbatim (§4.B): the broker
//! client's own key hash decides the partition, so this module never
//! computes a partition index itself — it only decides which partitions a
//! given process's coordinator consumes.

use std::time::Duration;

use rdkafka::config::ClientConfig;
use rdkafka::consumer::{BaseConsumer, Consumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::TopicPartitionList;

use txn_models::LogRecord;

pub const TOPIC: &str = "transactions";

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("broker client configuration error: {0}")]
    Config(#[from] rdkafka::error::KafkaError),
    #[error("broker produce failed: {0}")]
    Produce(String),
    #[error("broker unreachable or timed out: {0}")]
    Unreachable(String),
}

/// Publishes a batch of records, awaiting broker acknowledgment for every
/// record before returning. No retry is performed here — the underlying
/// `rdkafka` producer performs its own bounded retries per its
/// `message.send.max.retries` configuration.
pub struct Producer {
    inner: FutureProducer,
}

impl Producer {
    pub fn new(brokers: &str) -> Result<Self, BrokerError> {
        let inner: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "10000")
            .set("acks", "all")
            .create()?;
        Ok(Producer { inner })
    }

    /// Publishes one record, keyed by account id, blocking until the
    /// broker acknowledges it.
    pub async fn publish(&self, record: &LogRecord) -> Result<(), BrokerError> {
        let mut value = [0u8; txn_models::LOG_RECORD_LEN];
        record.encode(&mut value);
        let key = *record.transaction.account_id.as_bytes();

        let delivery = self
            .inner
            .send(
                FutureRecord::to(TOPIC).key(&key[..]).payload(&value[..]),
                Duration::from_secs(10),
            )
            .await;

        match delivery {
            Ok(_) => Ok(()),
            Err((err, _owned_message)) => Err(BrokerError::Produce(err.to_string())),
        }
    }

    /// Publishes every record in the batch, awaiting each acknowledgment
    /// in turn. A single failure aborts the remaining sends; the caller
    /// does not acknowledge the HTTP request (§4.B).
    pub async fn publish_batch(&self, records: &[LogRecord]) -> Result<(), BrokerError> {
        for record in records {
            self.publish(record).await?;
        }
        Ok(())
    }
}

/// One fetched record, still attached to its broker partition/offset.
pub struct FetchedRecord {
    pub partition: i32,
    pub offset: i64,
    pub record: LogRecord,
}

/// Consumes a contiguous, statically assigned partition range
/// `[min_partition, max_partition]`. Multi-process broker-assigned
/// rebalancing is out of scope (§9): this fetcher always owns its whole
/// configured range.
pub struct PartitionFetcher {
    consumer: BaseConsumer,
    min_partition: i32,
    max_partition: i32,
}

impl PartitionFetcher {
    pub fn new(brokers: &str, min_partition: i32, max_partition: i32) -> Result<Self, BrokerError> {
        let consumer: BaseConsumer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("group.id", "txn-writer")
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false")
            .create()?;
        Ok(PartitionFetcher {
            consumer,
            min_partition,
            max_partition,
        })
    }

    /// Assigns every partition in range starting at `start_offsets[p]`
    /// (or the beginning, if absent), per §4.C step 1-2.
    pub fn assign(&self, start_offsets: &[(i32, i64)]) -> Result<(), BrokerError> {
        let mut tpl = TopicPartitionList::new();
        for partition in self.min_partition..=self.max_partition {
            let offset = start_offsets
                .iter()
                .find(|(p, _)| *p == partition)
                .map(|(_, o)| rdkafka::Offset::Offset(o + 1))
                .unwrap_or(rdkafka::Offset::Beginning);
            tpl.add_partition_offset(TOPIC, partition, offset)?;
        }
        self.consumer.assign(&tpl)?;
        Ok(())
    }

    /// Polls once for a bundle of records, with the given timeout. Returns
    /// an empty vec on a timeout with no records (the caller's poll loop
    /// simply continues, per §4.C).
    pub fn poll_batch(&self, timeout: Duration, max_records: usize) -> Vec<FetchedRecord> {
        let mut out = Vec::new();
        while out.len() < max_records {
            match self.consumer.poll(if out.is_empty() {
                timeout
            } else {
                Duration::from_millis(0)
            }) {
                Some(Ok(message)) => {
                    let Some(payload) = message.payload() else {
                        continue;
                    };
                    match LogRecord::decode(payload) {
                        Ok(record) => out.push(FetchedRecord {
                            partition: message.partition(),
                            offset: message.offset(),
                            record,
                        }),
                        Err(error) => {
                            tracing::error!(?error, "dropping malformed log record");
                        }
                    }
                }
                Some(Err(error)) => {
                    tracing::warn!(?error, "broker poll error");
                    break;
                }
                None => break,
            }
        }
        out
    }
}

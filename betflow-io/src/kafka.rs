#![cfg(feature = "kafka")]

use std::time::Duration;

use anyhow::Context as _;
use async_trait::async_trait;
use betflow_core::{Message, MessageId, Result, Source};
use chrono::{DateTime, Utc};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::{ClientConfig, Message as _, Offset, TopicPartitionList};
use tracing::{debug, warn};

use crate::offsets::{parse_id, OffsetTracker};

/// Consumer-group source. A message's publish time is its Kafka timestamp, its id is
/// `partition@offset`, and acknowledging commits offsets back to the group.
pub struct KafkaSource {
    consumer: StreamConsumer,
    topic: String,
    offsets: OffsetTracker,
}

impl KafkaSource {
    pub fn new(brokers: &str, group_id: &str, topic: &str) -> Result<Self> {
        Self::with_offset_reset(brokers, group_id, topic, None)
    }

    pub fn with_offset_reset(
        brokers: &str,
        group_id: &str,
        topic: &str,
        auto_offset_reset: Option<&str>,
    ) -> Result<Self> {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", brokers)
            .set("group.id", group_id)
            .set("enable.partition.eof", "false")
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "10000");
        if let Some(r) = auto_offset_reset {
            cfg.set("auto.offset.reset", r);
        }
        let consumer: StreamConsumer = cfg.create().context("failed to create kafka consumer")?;
        consumer
            .subscribe(&[topic])
            .context("failed to subscribe to topic")?;
        Ok(Self {
            consumer,
            topic: topic.to_string(),
            offsets: OffsetTracker::new(),
        })
    }
}

#[async_trait]
impl Source for KafkaSource {
    async fn next(&mut self) -> Result<Option<Message>> {
        loop {
            match self.consumer.recv().await {
                Ok(m) => {
                    let publish_time = m
                        .timestamp()
                        .to_millis()
                        .and_then(DateTime::<Utc>::from_timestamp_millis)
                        .unwrap_or_else(Utc::now);
                    let payload = m.payload().unwrap_or_default().to_vec();
                    self.offsets.received(m.partition(), m.offset());
                    let id = format!("{}@{}", m.partition(), m.offset());
                    return Ok(Some(Message::new(id, payload, publish_time)));
                }
                Err(e) => {
                    warn!(error = %e, topic = %self.topic, "kafka receive failed");
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    async fn ack(&mut self, ids: &[MessageId]) -> Result<()> {
        for id in ids {
            if let Some((partition, offset)) = parse_id(id) {
                self.offsets.acked(partition, offset);
            }
        }
        let points = self.offsets.commit_points();
        if points.is_empty() {
            return Ok(());
        }
        let mut tpl = TopicPartitionList::new();
        for (partition, offset) in points {
            tpl.add_partition_offset(&self.topic, partition, Offset::Offset(offset))
                .context("commit offset list")?;
        }
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .context("failed to commit offsets")?;
        debug!(topic = %self.topic, "offsets committed");
        Ok(())
    }
}

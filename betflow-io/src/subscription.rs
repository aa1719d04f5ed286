//! Subscription URIs.

use betflow_core::{Error, Result, Source};

use crate::source::FileSource;

/// Opens the source behind a subscription URI.
///
/// - `file:///path/events.jsonl`: a JSON-lines file, see [`FileSource`]
/// - `kafka://broker1:9092,broker2:9092/topic`: a consumer group on `topic` (feature `kafka`)
pub fn open(uri: &str, group_id: Option<&str>) -> Result<Box<dyn Source>> {
    if let Some(path) = uri.strip_prefix("file://") {
        return Ok(Box::new(FileSource::jsonl(path)));
    }
    if let Some(rest) = uri.strip_prefix("kafka://") {
        let (brokers, topic) = rest
            .split_once('/')
            .filter(|(b, t)| !b.is_empty() && !t.is_empty())
            .ok_or_else(|| Error::Config(format!("expected kafka://brokers/topic, got {uri}")))?;
        return open_kafka(brokers, topic, group_id.unwrap_or("betflow"));
    }
    Err(Error::Config(format!("unsupported subscription {uri}")))
}

#[cfg(feature = "kafka")]
fn open_kafka(brokers: &str, topic: &str, group_id: &str) -> Result<Box<dyn Source>> {
    Ok(Box::new(crate::kafka::KafkaSource::new(brokers, group_id, topic)?))
}

#[cfg(not(feature = "kafka"))]
fn open_kafka(_brokers: &str, _topic: &str, _group_id: &str) -> Result<Box<dyn Source>> {
    Err(Error::Config("kafka subscriptions need the `kafka` feature".into()))
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque identifier a source hands out for acknowledgement.
pub type MessageId = String;

/// One ingested message: an opaque payload plus the time the transport accepted it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub payload: Vec<u8>,
    pub publish_time: DateTime<Utc>,
}

impl Message {
    pub fn new(id: impl Into<MessageId>, payload: impl Into<Vec<u8>>, publish_time: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            payload: payload.into(),
            publish_time,
        }
    }
}

/// A split record carrying the publish time of the message it came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Record {
    pub event_time: DateTime<Utc>,
    pub value: serde_json::Value,
}

impl Record {
    pub fn new(event_time: DateTime<Utc>, value: serde_json::Value) -> Self {
        Self { event_time, value }
    }
}

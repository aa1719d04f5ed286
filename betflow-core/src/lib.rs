//! betflow-core: fundamental types and traits shared by the betflow pipeline.
//!
//! Goal: provide the essential abstractions for a windowed split-and-route stream:
//! - Message, Record, Window
//! - Destination-tagged Batch and the per-batch WriteOutcome
//! - Traits: Source (pull + ack) and Sink (batch writes that never propagate failures)
//!
//! Quick example:
//! ```no_run
//! use betflow_core::{Batch, Message, MessageId, Sink, Source, WriteOutcome};
//! # #[tokio::main]
//! # async fn main() -> betflow_core::Result<()> {
//! struct Empty;
//! #[async_trait::async_trait]
//! impl Source for Empty {
//!     async fn next(&mut self) -> betflow_core::Result<Option<Message>> { Ok(None) }
//! }
//!
//! struct Discard;
//! #[async_trait::async_trait]
//! impl Sink for Discard {
//!     async fn write_batch(&self, batch: Batch) -> WriteOutcome {
//!         WriteOutcome::Committed { rows: batch.len() }
//!     }
//! }
//!
//! let mut src = Empty;
//! assert!(src.next().await?.is_none());
//! # Ok(()) }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod config;
pub mod metrics;
pub mod record;

pub use record::{Message, MessageId, Record};

/// A half-open publish-time interval `[start, end)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        self.start <= ts && ts < self.end
    }
}

impl std::fmt::Display for Window {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Which destination table a batch is meant for.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Destination {
    Users,
    Transactions,
}

impl Destination {
    pub fn as_str(&self) -> &'static str {
        match self {
            Destination::Users => "users",
            Destination::Transactions => "transactions",
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Records of one kind, scoped to one window, delivered in a single write call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Batch {
    pub destination: Destination,
    pub window: Window,
    pub rows: Vec<serde_json::Value>,
}

impl Batch {
    pub fn new(destination: Destination, window: Window, rows: Vec<serde_json::Value>) -> Self {
        Self { destination, window, rows }
    }
    pub fn len(&self) -> usize {
        self.rows.len()
    }
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Result of handing one batch to a sink. Failures are reported here instead of
/// being propagated, so one bad batch never aborts the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Empty batch; no load call was issued.
    Skipped,
    Committed { rows: usize },
    /// The batch was logged and permanently dropped.
    Dropped { error: String },
}

impl WriteOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            WriteOutcome::Skipped => "skipped",
            WriteOutcome::Committed { .. } => "committed",
            WriteOutcome::Dropped { .. } => "dropped",
        }
    }
    pub fn is_dropped(&self) -> bool {
        matches!(self, WriteOutcome::Dropped { .. })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("failed to decode message {id}: {reason}")]
    Decode { id: MessageId, reason: String },
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("schema conflict on {table}: column `{column}` is {existing}, batch has {incoming}")]
    SchemaConflict {
        table: String,
        column: String,
        existing: String,
        incoming: String,
    },
    #[error("{0} timed out after {1:?}")]
    Timeout(String, std::time::Duration),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Pull-based ingestion boundary.
///
/// `next` must be cancel safe: the executor polls it inside `tokio::select!`
/// alongside its timers.
#[async_trait::async_trait]
pub trait Source: Send {
    /// Blocks until a message is available; `None` ends a finite stream.
    async fn next(&mut self) -> Result<Option<Message>>;
    /// Acknowledge messages that were fully processed.
    async fn ack(&mut self, _ids: &[MessageId]) -> Result<()> {
        Ok(())
    }
}

#[async_trait::async_trait]
impl<S: Source + ?Sized> Source for Box<S> {
    async fn next(&mut self) -> Result<Option<Message>> {
        (**self).next().await
    }
    async fn ack(&mut self, ids: &[MessageId]) -> Result<()> {
        (**self).ack(ids).await
    }
}

/// Batch-level destination writer.
#[async_trait::async_trait]
pub trait Sink: Send + Sync {
    async fn write_batch(&self, batch: Batch) -> WriteOutcome;
}

pub mod prelude {
    pub use super::{
        Batch, Destination, Error, Message, MessageId, Record, Result, Sink, Source, Window, WriteOutcome,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(secs, 0).unwrap()
    }

    #[test]
    fn window_is_half_open() {
        let w = Window { start: ts(0), end: ts(30) };
        assert!(w.contains(ts(0)));
        assert!(w.contains(ts(29)));
        assert!(!w.contains(ts(30)));
    }

    #[test]
    fn windows_order_by_start() {
        let a = Window { start: ts(0), end: ts(30) };
        let b = Window { start: ts(30), end: ts(60) };
        assert!(a < b);
    }

    #[test]
    fn outcome_labels() {
        assert_eq!(WriteOutcome::Skipped.label(), "skipped");
        assert_eq!(WriteOutcome::Committed { rows: 3 }.label(), "committed");
        let dropped = WriteOutcome::Dropped { error: "boom".into() };
        assert!(dropped.is_dropped());
        assert_eq!(dropped.label(), "dropped");
    }

    #[test]
    fn destination_serializes_lowercase() {
        let s = serde_json::to_string(&Destination::Transactions).unwrap();
        assert_eq!(s, "\"transactions\"");
    }
}

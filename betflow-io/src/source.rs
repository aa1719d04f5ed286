use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use betflow_core::{Message, MessageId, Result, Source};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tokio::sync::mpsc;
use tracing::debug;

/// Reads messages from a JSON-lines file, one message per line.
///
/// A line shaped like `{"publish_time": ..., "data": ...}` is an envelope: `publish_time`
/// is an RFC3339 string or epoch milliseconds, and `data` is the payload (a string is
/// taken verbatim, anything else is re-serialized). Any other line is itself the payload
/// and is stamped with the read time. The file ending ends the stream.
pub struct FileSource {
    path: PathBuf,
    lines: Option<Lines<BufReader<tokio::fs::File>>>,
    line_no: u64,
}

impl FileSource {
    pub fn jsonl(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lines: None,
            line_no: 0,
        }
    }
}

#[async_trait]
impl Source for FileSource {
    async fn next(&mut self) -> Result<Option<Message>> {
        if self.lines.is_none() {
            let file = tokio::fs::File::open(&self.path).await?;
            self.lines = Some(BufReader::new(file).lines());
        }
        let Some(lines) = self.lines.as_mut() else {
            return Ok(None);
        };
        while let Some(line) = lines.next_line().await? {
            self.line_no += 1;
            if line.trim().is_empty() {
                continue;
            }
            let id = format!("{}:{}", self.path.display(), self.line_no);
            return Ok(Some(parse_line(id, &line)));
        }
        Ok(None)
    }
}

fn extract_time(v: &Value) -> Option<DateTime<Utc>> {
    match v {
        Value::Number(n) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        Value::String(s) => DateTime::parse_from_rfc3339(s).ok().map(|t| t.with_timezone(&Utc)),
        _ => None,
    }
}

fn parse_line(id: String, line: &str) -> Message {
    if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(line) {
        if let (Some(pt), Some(data)) = (obj.get("publish_time"), obj.get("data")) {
            let publish_time = extract_time(pt).unwrap_or_else(|| {
                debug!(%id, "unreadable publish_time, using now");
                Utc::now()
            });
            let payload = match data {
                Value::String(s) => s.clone().into_bytes(),
                other => other.to_string().into_bytes(),
            };
            return Message::new(id, payload, publish_time);
        }
    }
    Message::new(id, line.as_bytes(), Utc::now())
}

/// Shared record of acknowledged message ids.
#[derive(Debug, Clone, Default)]
pub struct AckLog(Arc<Mutex<Vec<MessageId>>>);

impl AckLog {
    pub fn ids(&self) -> Vec<MessageId> {
        self.0.lock().clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.lock().iter().any(|a| a == id)
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().is_empty()
    }
}

/// In-process source fed through a tokio channel; the stream ends when every sender
/// is dropped.
///
/// Example
/// ```no_run
/// use betflow_core::Message;
/// use betflow_io::ChannelSource;
/// let (tx, source) = ChannelSource::channel();
/// tx.send(Message::new("m1", br#"{"uid": 1}"#.to_vec(), chrono::Utc::now())).unwrap();
/// let acked = source.ack_log();
/// # let _ = acked;
/// ```
pub struct ChannelSource {
    rx: mpsc::UnboundedReceiver<Message>,
    acked: AckLog,
}

impl ChannelSource {
    pub fn channel() -> (mpsc::UnboundedSender<Message>, Self) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            tx,
            Self {
                rx,
                acked: AckLog::default(),
            },
        )
    }

    /// Handle that keeps observing acknowledgements after the source is moved.
    pub fn ack_log(&self) -> AckLog {
        self.acked.clone()
    }
}

#[async_trait]
impl Source for ChannelSource {
    async fn next(&mut self) -> Result<Option<Message>> {
        Ok(self.rx.recv().await)
    }

    async fn ack(&mut self, ids: &[MessageId]) -> Result<()> {
        self.acked.0.lock().extend_from_slice(ids);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use betflow_core::Error;
    use tokio::io::AsyncWriteExt;

    fn tmp_file(prefix: &str) -> PathBuf {
        let mut d = std::env::temp_dir();
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        d.push(format!("betflow_source_test_{}_{}.jsonl", prefix, nanos));
        d
    }

    #[tokio::test]
    async fn file_source_reads_envelopes_and_bare_lines() {
        let path = tmp_file("envelope");
        let mut f = tokio::fs::File::create(&path).await.unwrap();
        f.write_all(
            concat!(
                r#"{"publish_time": "2024-01-01T00:00:10Z", "data": {"uid": 42}}"#, "\n",
                "\n",
                r#"{"publish_time": 1704067245000, "data": "{\"uid\": 7}"}"#, "\n",
                r#"{"uid": 9}"#, "\n",
            )
            .as_bytes(),
        )
        .await
        .unwrap();
        f.flush().await.unwrap();

        let mut src = FileSource::jsonl(&path);
        let a = src.next().await.unwrap().unwrap();
        assert_eq!(a.publish_time.to_rfc3339(), "2024-01-01T00:00:10+00:00");
        assert_eq!(serde_json::from_slice::<Value>(&a.payload).unwrap()["uid"], 42);
        assert!(a.id.ends_with(":1"));

        let b = src.next().await.unwrap().unwrap();
        assert_eq!(b.publish_time.timestamp(), 1_704_067_245);
        assert_eq!(b.payload, br#"{"uid": 7}"#.to_vec());
        assert!(b.id.ends_with(":3"), "blank lines are skipped but counted");

        let c = src.next().await.unwrap().unwrap();
        assert_eq!(c.payload, br#"{"uid": 9}"#.to_vec());

        assert!(src.next().await.unwrap().is_none());
        let _ = tokio::fs::remove_file(path).await;
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let mut src = FileSource::jsonl(tmp_file("missing"));
        assert!(matches!(src.next().await, Err(Error::Io(_))));
    }

    #[tokio::test]
    async fn channel_source_records_acks() {
        let (tx, mut src) = ChannelSource::channel();
        let acked = src.ack_log();
        tx.send(Message::new("m1", b"{}".to_vec(), Utc::now())).unwrap();
        drop(tx);
        let m = src.next().await.unwrap().unwrap();
        src.ack(&[m.id]).await.unwrap();
        assert!(src.next().await.unwrap().is_none());
        assert!(acked.contains("m1"));
        assert_eq!(acked.len(), 1);
    }
}

use std::time::{Duration, Instant};

use async_trait::async_trait;
use betflow_core::config::{parse_duration_ms, SinkConfig};
use betflow_core::{metrics, Batch, Destination, Error, Result, Sink, WriteOutcome};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::table::{TableClient, TableRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriterOptions {
    /// Upper bound on one load call.
    pub timeout: Duration,
    /// Extra attempts after the first failure; 0 drops on the first error.
    pub max_retries: u32,
    /// Base delay between attempts, doubled each retry.
    pub backoff: Duration,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            max_retries: 0,
            backoff: Duration::from_secs(1),
        }
    }
}

impl WriterOptions {
    pub fn from_config(cfg: &SinkConfig) -> Result<Self> {
        let timeout = parse_duration_ms(&cfg.write_timeout)?;
        if timeout <= 0 {
            return Err(Error::Config("sink.write_timeout must be positive".into()));
        }
        let backoff = parse_duration_ms(&cfg.retry_backoff)?.max(0);
        Ok(Self {
            timeout: Duration::from_millis(timeout as u64),
            max_retries: cfg.max_retries,
            backoff: Duration::from_millis(backoff as u64),
        })
    }
}

/// Writes batches for one destination into one table.
///
/// Holds the table client for its whole life; concurrent `write_batch` calls on the
/// same writer are serialized. A failed batch is logged and reported as
/// `WriteOutcome::Dropped`, never returned as an error.
///
/// Example
/// ```no_run
/// use betflow_core::Destination;
/// use betflow_io::{MemoryTable, SinkWriter, TableRef, WriterOptions};
/// let writer = SinkWriter::new(
///     MemoryTable::new(),
///     Destination::Users,
///     TableRef::new("casino", "users"),
///     WriterOptions::default(),
/// );
/// # let _ = writer;
/// ```
pub struct SinkWriter<C> {
    client: Mutex<C>,
    destination: Destination,
    table: TableRef,
    opts: WriterOptions,
}

impl<C: TableClient> SinkWriter<C> {
    pub fn new(client: C, destination: Destination, table: TableRef, opts: WriterOptions) -> Self {
        Self {
            client: Mutex::new(client),
            destination,
            table,
            opts,
        }
    }

    pub fn table(&self) -> &TableRef {
        &self.table
    }

    pub fn destination(&self) -> Destination {
        self.destination
    }

    async fn attempt(&self, batch: &Batch) -> Result<usize> {
        let client = self.client.lock().await;
        match tokio::time::timeout(self.opts.timeout, client.load(&self.table, &batch.rows)).await {
            Ok(Ok(stats)) => {
                if stats.schema_changed {
                    debug!(table = %self.table, "table schema created or evolved");
                }
                Ok(stats.rows)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => Err(Error::Timeout(format!("load into {}", self.table), self.opts.timeout)),
        }
    }
}

#[async_trait]
impl<C: TableClient> Sink for SinkWriter<C> {
    async fn write_batch(&self, batch: Batch) -> WriteOutcome {
        let dest = self.destination.as_str();
        if batch.is_empty() {
            metrics::BATCH_WRITES.with_label_values(&[dest, "skipped"]).inc();
            debug!(table = %self.table, window = %batch.window, "empty batch, nothing to load");
            return WriteOutcome::Skipped;
        }

        let started = Instant::now();
        let mut retries = 0u32;
        let outcome = loop {
            match self.attempt(&batch).await {
                Ok(rows) => break WriteOutcome::Committed { rows },
                Err(e) if retries < self.opts.max_retries => {
                    retries += 1;
                    let delay = self.opts.backoff.saturating_mul(1u32 << (retries - 1).min(16));
                    warn!(table = %self.table, window = %batch.window, error = %e, retry = retries, "load failed, retrying");
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    error!(
                        table = %self.table,
                        window = %batch.window,
                        rows = batch.len(),
                        error = %e,
                        "dropping batch after failed load"
                    );
                    break WriteOutcome::Dropped { error: e.to_string() };
                }
            }
        };

        metrics::SINK_WRITE_LATENCY_MS
            .with_label_values(&[dest])
            .observe(started.elapsed().as_secs_f64() * 1000.0);
        metrics::BATCH_WRITES.with_label_values(&[dest, outcome.label()]).inc();
        if let WriteOutcome::Committed { rows } = outcome {
            metrics::ROWS_WRITTEN.with_label_values(&[dest]).inc_by(rows as u64);
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::LoadStats;
    use crate::MemoryTable;
    use betflow_core::Window;
    use chrono::{DateTime, Utc};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn window() -> Window {
        Window {
            start: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            end: DateTime::<Utc>::from_timestamp(30, 0).unwrap(),
        }
    }

    fn batch(rows: Vec<serde_json::Value>) -> Batch {
        Batch::new(Destination::Transactions, window(), rows)
    }

    /// Fails the first `fail` calls, then succeeds.
    struct Flaky {
        fail: usize,
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl TableClient for Flaky {
        async fn load(&self, _table: &TableRef, rows: &[serde_json::Value]) -> Result<LoadStats> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail {
                return Err(Error::Anyhow(anyhow::anyhow!("quota exceeded")));
            }
            Ok(LoadStats {
                rows: rows.len(),
                schema_changed: false,
            })
        }
    }

    struct Stuck;

    #[async_trait]
    impl TableClient for Stuck {
        async fn load(&self, _table: &TableRef, _rows: &[serde_json::Value]) -> Result<LoadStats> {
            std::future::pending().await
        }
    }

    /// Tracks how many loads run at the same time.
    #[derive(Default)]
    struct Overlap {
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl TableClient for Arc<Overlap> {
        async fn load(&self, _table: &TableRef, rows: &[serde_json::Value]) -> Result<LoadStats> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(LoadStats {
                rows: rows.len(),
                schema_changed: false,
            })
        }
    }

    fn writer<C: TableClient>(client: C, opts: WriterOptions) -> SinkWriter<C> {
        SinkWriter::new(client, Destination::Transactions, TableRef::new("casino", "transactions"), opts)
    }

    #[tokio::test]
    async fn empty_batch_skips_the_client() {
        let store = MemoryTable::new();
        let w = writer(store.clone(), WriterOptions::default());
        assert_eq!(w.write_batch(batch(vec![])).await, WriteOutcome::Skipped);
        assert_eq!(store.load_calls(), 0);
    }

    #[tokio::test]
    async fn commits_rows() {
        let store = MemoryTable::new();
        let w = writer(store.clone(), WriterOptions::default());
        let out = w.write_batch(batch(vec![json!({"uid": 1}), json!({"uid": 2})])).await;
        assert_eq!(out, WriteOutcome::Committed { rows: 2 });
        assert_eq!(store.rows(w.table()).len(), 2);
    }

    #[tokio::test]
    async fn failure_is_dropped_without_retry_by_default() {
        let calls = Arc::new(AtomicUsize::new(0));
        let w = writer(Flaky { fail: 1, calls: calls.clone() }, WriterOptions::default());
        let out = w.write_batch(batch(vec![json!({"uid": 1})])).await;
        assert!(out.is_dropped());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_with_backoff() {
        let calls = Arc::new(AtomicUsize::new(0));
        let opts = WriterOptions {
            max_retries: 2,
            backoff: Duration::from_millis(1),
            ..WriterOptions::default()
        };
        let w = writer(Flaky { fail: 2, calls: calls.clone() }, opts);
        let out = w.write_batch(batch(vec![json!({"uid": 1})])).await;
        assert_eq!(out, WriteOutcome::Committed { rows: 1 });
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn slow_load_times_out() {
        let opts = WriterOptions {
            timeout: Duration::from_millis(20),
            ..WriterOptions::default()
        };
        let w = writer(Stuck, opts);
        match w.write_batch(batch(vec![json!({"uid": 1})])).await {
            WriteOutcome::Dropped { error } => assert!(error.contains("timed out"), "{error}"),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn loads_on_one_client_never_overlap() {
        let overlap = Arc::new(Overlap::default());
        let w = writer(overlap.clone(), WriterOptions::default());
        let (a, b) = tokio::join!(
            w.write_batch(batch(vec![json!({"uid": 1})])),
            w.write_batch(batch(vec![json!({"uid": 2}), json!({"uid": 3})]))
        );
        assert_eq!(a, WriteOutcome::Committed { rows: 1 });
        assert_eq!(b, WriteOutcome::Committed { rows: 2 });
        assert_eq!(overlap.peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn options_from_config() {
        let cfg = SinkConfig {
            write_timeout: "5s".into(),
            max_retries: 3,
            retry_backoff: "250ms".into(),
            ..SinkConfig::default()
        };
        let opts = WriterOptions::from_config(&cfg).unwrap();
        assert_eq!(opts.timeout, Duration::from_secs(5));
        assert_eq!(opts.max_retries, 3);
        assert_eq!(opts.backoff, Duration::from_millis(250));
    }
}

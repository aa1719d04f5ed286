//! Orchestration: source -> splitter -> window buffer -> router -> two sinks.

use std::future::Future;
use std::sync::Arc;

use betflow_core::config::{parse_duration_ms, window_size_seconds, TimeMode, WindowConfig};
use betflow_core::{metrics, Error, Message, MessageId, Result, Sink, Source, Window, WriteOutcome};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::{JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

use crate::route::BatchRouter;
use crate::split::Splitter;
use crate::time::{TimeDomain, WatermarkPolicy};
use crate::window::{ClosedWindow, Rejected, WindowAssigner, WindowBuffer};

/// What happened to one closed window.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowReport {
    pub window: Window,
    pub records: usize,
    pub users: WriteOutcome,
    pub transactions: WriteOutcome,
    pub acks: Vec<MessageId>,
}

/// Counters for one `run`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub messages: u64,
    /// Messages dropped as malformed: undecodable payloads and publish times no
    /// window can hold.
    pub decode_errors: u64,
    pub late_records: u64,
    pub windows_emitted: u64,
    /// Windows still open at shutdown whose records were not flushed.
    pub windows_discarded: u64,
    pub batches_committed: u64,
    pub batches_skipped: u64,
    pub batches_dropped: u64,
}

impl RunSummary {
    fn tally(&mut self, outcome: &WriteOutcome) {
        match outcome {
            WriteOutcome::Skipped => self.batches_skipped += 1,
            WriteOutcome::Committed { .. } => self.batches_committed += 1,
            WriteOutcome::Dropped { .. } => self.batches_dropped += 1,
        }
    }
}

#[derive(Clone)]
struct Routes {
    router: BatchRouter,
    users: Arc<dyn Sink>,
    transactions: Arc<dyn Sink>,
}

impl Routes {
    /// Routing happens before either write; the two writes then run side by side.
    fn dispatch(&self, inflight: &mut JoinSet<WindowReport>, closed: ClosedWindow) {
        metrics::WINDOWS_EMITTED.inc();
        let routes = self.clone();
        inflight.spawn(async move {
            let ClosedWindow { window, records, acks } = closed;
            let n = records.len();
            let (users, transactions) = routes.router.partition(window, records);
            let (users, transactions) = tokio::join!(
                routes.users.write_batch(users),
                routes.transactions.write_batch(transactions)
            );
            WindowReport {
                window,
                records: n,
                users,
                transactions,
                acks,
            }
        });
    }
}

/// Drives the windowed split-and-route pipeline.
///
/// Example
/// ```no_run
/// use betflow_ops::{Executor, WindowAssigner};
/// let exec = Executor::new(WindowAssigner::tumbling(chrono::Duration::seconds(30)));
/// # let _ = exec;
/// ```
pub struct Executor {
    source: Option<Box<dyn Source>>,
    users: Option<Arc<dyn Sink>>,
    transactions: Option<Arc<dyn Sink>>,
    splitter: Splitter,
    router: BatchRouter,
    assigner: WindowAssigner,
    time: TimeDomain,
    tick: std::time::Duration,
    reports: Option<UnboundedSender<WindowReport>>,
}

impl Executor {
    pub fn new(assigner: WindowAssigner) -> Self {
        Self {
            source: None,
            users: None,
            transactions: None,
            splitter: Splitter::new(),
            router: BatchRouter::default(),
            assigner,
            time: TimeDomain::event(WatermarkPolicy::default()),
            tick: std::time::Duration::from_secs(1),
            reports: None,
        }
    }

    /// Window size, lateness, clock and tick from the `[window]` config section.
    pub fn from_config(cfg: &WindowConfig) -> Result<Self> {
        let size = Duration::seconds(window_size_seconds(cfg.size)?);
        let policy = WatermarkPolicy::new(Duration::milliseconds(parse_duration_ms(&cfg.allowed_lateness)?));
        let tick_ms = parse_duration_ms(&cfg.tick)?;
        if tick_ms <= 0 {
            return Err(Error::Config("window.tick must be positive".into()));
        }
        let time = match cfg.time {
            TimeMode::Event => TimeDomain::event(policy),
            TimeMode::Processing => TimeDomain::processing(policy),
        };
        let mut exec = Self::new(WindowAssigner::tumbling(size));
        exec.time(time).tick(std::time::Duration::from_millis(tick_ms as u64));
        Ok(exec)
    }

    pub fn source<S: Source + 'static>(&mut self, s: S) -> &mut Self {
        self.source = Some(Box::new(s));
        self
    }

    pub fn users_sink<K: Sink + 'static>(&mut self, s: K) -> &mut Self {
        self.users = Some(Arc::new(s));
        self
    }

    pub fn transactions_sink<K: Sink + 'static>(&mut self, s: K) -> &mut Self {
        self.transactions = Some(Arc::new(s));
        self
    }

    pub fn router(&mut self, router: BatchRouter) -> &mut Self {
        self.router = router;
        self
    }

    pub fn time(&mut self, time: TimeDomain) -> &mut Self {
        self.time = time;
        self
    }

    pub fn tick(&mut self, tick: std::time::Duration) -> &mut Self {
        self.tick = tick;
        self
    }

    /// Receive one `WindowReport` per flushed window.
    pub fn with_reports(&mut self, tx: UnboundedSender<WindowReport>) -> &mut Self {
        self.reports = Some(tx);
        self
    }

    /// Runs until the source ends.
    pub async fn run(&mut self) -> Result<RunSummary> {
        self.run_until(std::future::pending()).await
    }

    /// Runs until the source ends or `shutdown` resolves. In-flight window writes are
    /// always awaited before returning; windows still open at shutdown are discarded.
    #[instrument(name = "executor", skip_all)]
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<RunSummary>
    where
        F: Future<Output = ()> + Send,
    {
        let mut source = self.source.take().ok_or_else(|| anyhow::anyhow!("no source"))?;
        let routes = Routes {
            router: self.router.clone(),
            users: self.users.clone().ok_or_else(|| anyhow::anyhow!("no users sink"))?,
            transactions: self
                .transactions
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no transactions sink"))?,
        };

        let mut buffer = WindowBuffer::new(self.assigner);
        let mut inflight: JoinSet<WindowReport> = JoinSet::new();
        let mut summary = RunSummary::default();
        let mut failure: Option<Error> = None;
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        info!(window = ?self.assigner.size(), "pipeline started");
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    info!("shutdown requested, draining in-flight writes");
                    break;
                }
                Some(joined) = inflight.join_next(), if !inflight.is_empty() => {
                    self.complete(joined, source.as_mut(), &mut summary).await;
                }
                _ = ticker.tick() => {
                    if let Some(wm) = self.time.on_tick(Utc::now()) {
                        self.advance(&mut buffer, wm, &routes, &mut inflight, &mut summary);
                    }
                }
                next = source.next() => match next {
                    Ok(Some(msg)) => {
                        if let Some(wm) = self.on_message(msg, &mut buffer, source.as_mut(), &mut summary).await {
                            self.advance(&mut buffer, wm, &routes, &mut inflight, &mut summary);
                        }
                    }
                    Ok(None) => {
                        let rest = buffer.drain_all();
                        info!(windows = rest.len(), "source finished, flushing open windows");
                        for closed in rest {
                            summary.windows_emitted += 1;
                            routes.dispatch(&mut inflight, closed);
                        }
                        break;
                    }
                    Err(e) => {
                        error!(error = %e, "source failed");
                        failure = Some(e);
                        break;
                    }
                }
            }
            metrics::OPEN_WINDOWS.set(buffer.open_windows() as i64);
        }

        while let Some(joined) = inflight.join_next().await {
            self.complete(joined, source.as_mut(), &mut summary).await;
        }

        let open = buffer.open_windows();
        if open > 0 {
            warn!(
                windows = open,
                records = buffer.buffered(),
                "discarding open windows; their messages stay unacknowledged"
            );
            summary.windows_discarded += open as u64;
        }
        metrics::OPEN_WINDOWS.set(0);

        match failure {
            Some(e) => Err(e),
            None => Ok(summary),
        }
    }

    async fn on_message(
        &mut self,
        msg: Message,
        buffer: &mut WindowBuffer,
        source: &mut dyn Source,
        summary: &mut RunSummary,
    ) -> Option<DateTime<Utc>> {
        summary.messages += 1;
        metrics::MESSAGES_RECEIVED.inc();
        let publish_time = msg.publish_time;

        match self.splitter.split(&msg) {
            Ok(records) => match buffer.insert(publish_time, records, Some(msg.id)) {
                Ok(_) => {}
                Err(Rejected::Late(late)) => {
                    summary.late_records += late.records.len() as u64;
                    metrics::DROPPED_RECORDS
                        .with_label_values(&["late"])
                        .inc_by(late.records.len() as u64);
                    debug!(
                        window = %late.window,
                        watermark = %late.watermark,
                        records = late.records.len(),
                        "dropping records for a closed window"
                    );
                    // on the wall clock a message is late because of when it arrived,
                    // so leave it to the transport to deliver again
                    if !self.time.is_processing() {
                        if let Some(id) = late.ack {
                            ack(source, &[id]).await;
                        }
                    }
                }
                Err(Rejected::OutOfRange { publish_time, ack: id, .. }) => {
                    summary.decode_errors += 1;
                    metrics::DROPPED_RECORDS.with_label_values(&["out_of_range"]).inc();
                    warn!(id = ?id, %publish_time, "dropping message whose publish time fits no window");
                    if let Some(id) = id {
                        ack(source, &[id]).await;
                    }
                }
            },
            Err(e) => {
                // no retry and no dead letter: the message is gone after this
                summary.decode_errors += 1;
                metrics::DROPPED_RECORDS.with_label_values(&["decode"]).inc();
                warn!(id = %msg.id, error = %e, "dropping undecodable message");
                ack(source, &[msg.id]).await;
            }
        }

        // a publish time no window can hold says nothing about progress
        self.assigner.assign(publish_time)?;
        self.time.on_message(publish_time)
    }

    fn advance(
        &self,
        buffer: &mut WindowBuffer,
        wm: DateTime<Utc>,
        routes: &Routes,
        inflight: &mut JoinSet<WindowReport>,
        summary: &mut RunSummary,
    ) {
        metrics::LAG_WATERMARK_MS.set((Utc::now() - wm).num_milliseconds());
        for closed in buffer.advance(wm) {
            summary.windows_emitted += 1;
            routes.dispatch(inflight, closed);
        }
    }

    async fn complete(
        &self,
        joined: std::result::Result<WindowReport, JoinError>,
        source: &mut dyn Source,
        summary: &mut RunSummary,
    ) {
        let report = match joined {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "window flush task failed; its messages stay unacknowledged");
                return;
            }
        };
        summary.tally(&report.users);
        summary.tally(&report.transactions);
        info!(
            window = %report.window,
            records = report.records,
            users = report.users.label(),
            transactions = report.transactions.label(),
            "window flushed"
        );
        if !report.acks.is_empty() {
            ack(source, &report.acks).await;
        }
        if let Some(tx) = &self.reports {
            let _ = tx.send(report);
        }
    }
}

async fn ack(source: &mut dyn Source, ids: &[MessageId]) {
    if let Err(e) = source.ack(ids).await {
        warn!(error = %e, count = ids.len(), "failed to acknowledge messages");
    }
}

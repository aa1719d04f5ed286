use std::collections::BTreeMap;

use betflow_core::{MessageId, Record, Window};
use chrono::{DateTime, Duration, Utc};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowAssigner {
    /// Fixed-size, contiguous, non-overlapping windows aligned to the Unix epoch.
    Tumbling { size: Duration },
}

impl WindowAssigner {
    pub fn tumbling(size: Duration) -> Self {
        WindowAssigner::Tumbling { size }
    }

    pub fn size(&self) -> Duration {
        match *self {
            WindowAssigner::Tumbling { size } => size,
        }
    }

    /// The unique window containing `ts`, or `None` when that window would reach
    /// outside the representable time range.
    pub fn assign(&self, ts: DateTime<Utc>) -> Option<Window> {
        match *self {
            WindowAssigner::Tumbling { size } => {
                let size_ms = size.num_milliseconds().max(1);
                // floor, also for instants before the epoch
                let start_ms = ts.timestamp_millis().div_euclid(size_ms).checked_mul(size_ms)?;
                let start = DateTime::<Utc>::from_timestamp_millis(start_ms)?;
                let end = start.checked_add_signed(Duration::milliseconds(size_ms))?;
                Some(Window { start, end })
            }
        }
    }
}

#[derive(Debug, Default)]
struct Pane {
    records: Vec<Record>,
    acks: Vec<MessageId>,
}

/// Everything a window accumulated, handed out once when it closes.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosedWindow {
    pub window: Window,
    pub records: Vec<Record>,
    /// Messages that contributed to this window, to acknowledge after the flush.
    pub acks: Vec<MessageId>,
}

/// Records rejected because their window already closed.
#[derive(Debug, Clone, PartialEq)]
pub struct Late {
    pub window: Window,
    pub watermark: DateTime<Utc>,
    pub records: Vec<Record>,
    pub ack: Option<MessageId>,
}

/// Why the records of one message were not buffered.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejected {
    Late(Late),
    /// No window can hold this publish time.
    OutOfRange {
        publish_time: DateTime<Utc>,
        records: Vec<Record>,
        ack: Option<MessageId>,
    },
}

/// Buffers records per window and releases each window once the watermark passes its end.
///
/// Windows never overlap, so ordering the open windows by start also orders them by
/// deadline; closing is a pop from the front until the first window still open.
#[derive(Debug)]
pub struct WindowBuffer {
    assigner: WindowAssigner,
    panes: BTreeMap<Window, Pane>,
    watermark: Option<DateTime<Utc>>,
}

impl WindowBuffer {
    pub fn new(assigner: WindowAssigner) -> Self {
        Self {
            assigner,
            panes: BTreeMap::new(),
            watermark: None,
        }
    }

    pub fn assigner(&self) -> &WindowAssigner {
        &self.assigner
    }

    /// Adds the records of one message to the window of `publish_time`.
    pub fn insert<I>(
        &mut self,
        publish_time: DateTime<Utc>,
        records: I,
        ack: Option<MessageId>,
    ) -> Result<Window, Rejected>
    where
        I: IntoIterator<Item = Record>,
    {
        let Some(window) = self.assigner.assign(publish_time) else {
            return Err(Rejected::OutOfRange {
                publish_time,
                records: records.into_iter().collect(),
                ack,
            });
        };
        if let Some(wm) = self.watermark {
            if window.end <= wm {
                return Err(Rejected::Late(Late {
                    window,
                    watermark: wm,
                    records: records.into_iter().collect(),
                    ack,
                }));
            }
        }
        let pane = self.panes.entry(window).or_default();
        pane.records.extend(records);
        pane.acks.extend(ack);
        Ok(window)
    }

    /// Moves the watermark forward (never back) and closes every window that ended.
    pub fn advance(&mut self, watermark: DateTime<Utc>) -> Vec<ClosedWindow> {
        let wm = match self.watermark {
            Some(current) if current >= watermark => current,
            _ => watermark,
        };
        self.watermark = Some(wm);

        let mut closed = Vec::new();
        while let Some(entry) = self.panes.first_entry() {
            if entry.key().end > wm {
                break;
            }
            let (window, pane) = entry.remove_entry();
            debug!(%window, records = pane.records.len(), "window closed");
            closed.push(ClosedWindow {
                window,
                records: pane.records,
                acks: pane.acks,
            });
        }
        closed
    }

    /// Closes every open window regardless of the watermark (end of a finite stream).
    pub fn drain_all(&mut self) -> Vec<ClosedWindow> {
        std::mem::take(&mut self.panes)
            .into_iter()
            .map(|(window, pane)| ClosedWindow {
                window,
                records: pane.records,
                acks: pane.acks,
            })
            .collect()
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    pub fn open_windows(&self) -> usize {
        self.panes.len()
    }

    /// Records buffered across all open windows.
    pub fn buffered(&self) -> usize {
        self.panes.values().map(|p| p.records.len()).sum()
    }
}

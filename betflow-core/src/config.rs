use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::{Error, Result};

/// Seconds in one unit of `window.size`.
pub const HALF_MINUTE_SECS: f64 = 30.0;

/// Longest accepted window: one week.
pub const MAX_WINDOW_SECS: i64 = 7 * 24 * 3600;

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct SourceConfig {
    /// `file://<path>` or `kafka://<brokers>/<topic>`
    #[serde(default)]
    pub subscription: String,
    #[serde(default)]
    pub group_id: Option<String>,
}

/// Which clock decides when a window closes.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TimeMode {
    /// Watermark follows the highest publish time observed, so a backlog is
    /// windowed like live traffic.
    #[default]
    Event,
    /// Watermark follows the wall clock, advanced on every tick.
    Processing,
}

impl std::str::FromStr for TimeMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "event" => Ok(TimeMode::Event),
            "processing" => Ok(TimeMode::Processing),
            other => Err(Error::Config(format!(
                "unknown time mode {other:?}, expected \"event\" or \"processing\""
            ))),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WindowConfig {
    /// Window length in half-minutes.
    #[serde(default = "default_window_size")]
    pub size: f64,
    #[serde(default = "default_lateness")]
    pub allowed_lateness: String, // e.g., "10s"
    #[serde(default)]
    pub time: TimeMode,
    #[serde(default = "default_tick")]
    pub tick: String,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            size: default_window_size(),
            allowed_lateness: default_lateness(),
            time: TimeMode::default(),
            tick: default_tick(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SinkConfig {
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default)]
    pub dataset: String,
    /// `[transactions_table, users_table]`
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default = "default_warehouse")]
    pub warehouse: PathBuf,
    #[serde(default = "default_write_timeout")]
    pub write_timeout: String,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: String,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            project_id: None,
            dataset: String::new(),
            tables: Vec::new(),
            warehouse: default_warehouse(),
            write_timeout: default_write_timeout(),
            max_retries: 0,
            retry_backoff: default_retry_backoff(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct PipelineConfig {
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub window: WindowConfig,
    #[serde(default)]
    pub sink: SinkConfig,
}

fn default_window_size() -> f64 {
    1.0
}
fn default_lateness() -> String {
    "0s".into()
}
fn default_tick() -> String {
    "1s".into()
}
fn default_warehouse() -> PathBuf {
    PathBuf::from("./warehouse")
}
fn default_write_timeout() -> String {
    "60s".into()
}
fn default_retry_backoff() -> String {
    "1s".into()
}

impl PipelineConfig {
    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.subscription.trim().is_empty() {
            return Err(Error::Config("an input subscription must be specified".into()));
        }
        window_size_seconds(self.window.size)?;
        if self.sink.dataset.trim().is_empty() {
            return Err(Error::Config("sink.dataset must be set".into()));
        }
        if self.sink.tables.len() != 2 || self.sink.tables.iter().any(|t| t.trim().is_empty()) {
            return Err(Error::Config(format!(
                "sink.tables must name exactly two tables [transactions, users], got {:?}",
                self.sink.tables
            )));
        }
        parse_duration_ms(&self.window.allowed_lateness)?;
        if parse_duration_ms(&self.window.tick)? <= 0 {
            return Err(Error::Config("window.tick must be positive".into()));
        }
        if parse_duration_ms(&self.sink.write_timeout)? <= 0 {
            return Err(Error::Config("sink.write_timeout must be positive".into()));
        }
        parse_duration_ms(&self.sink.retry_backoff)?;
        Ok(())
    }

    pub fn transactions_table(&self) -> &str {
        self.sink.tables.first().map(String::as_str).unwrap_or_default()
    }

    pub fn users_table(&self) -> &str {
        self.sink.tables.get(1).map(String::as_str).unwrap_or_default()
    }
}

/// Converts a window size in half-minutes to whole seconds, truncating.
pub fn window_size_seconds(half_minutes: f64) -> Result<i64> {
    if !half_minutes.is_finite() {
        return Err(Error::Config(format!("window size must be finite, got {half_minutes}")));
    }
    let secs = (half_minutes * HALF_MINUTE_SECS).trunc();
    if secs < 1.0 {
        return Err(Error::Config(format!(
            "window size {half_minutes} is shorter than one second"
        )));
    }
    if secs > MAX_WINDOW_SECS as f64 {
        return Err(Error::Config(format!(
            "window size {half_minutes} is longer than {MAX_WINDOW_SECS} seconds"
        )));
    }
    Ok(secs as i64)
}

pub fn parse_duration_ms(s: &str) -> Result<i64> {
    // very small parser for values like "10s", "500ms", "2m"
    let s = s.trim();
    let bad = || Error::Config(format!("invalid duration: {s:?}"));
    let (num, unit_ms) = if let Some(num) = s.strip_suffix("ms") {
        (num, 1)
    } else if let Some(num) = s.strip_suffix('s') {
        (num, 1_000)
    } else if let Some(num) = s.strip_suffix('m') {
        (num, 60_000)
    } else if let Some(num) = s.strip_suffix('h') {
        (num, 3_600_000)
    } else {
        // default assume seconds
        (s, 1_000)
    };
    let n = num.trim().parse::<i64>().map_err(|_| bad())?;
    if n < 0 {
        return Err(bad());
    }
    n.checked_mul(unit_ms).ok_or_else(bad)
}

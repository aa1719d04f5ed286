//! betflow-ops: the processing stages built on top of betflow-core.
//!
//! Included stages:
//! - `Splitter`: decodes a raw bet event into a user row and a transaction row
//! - `WindowAssigner` / `WindowBuffer`: fixed publish-time windows closed by a watermark
//! - `BatchRouter`: splits a closed window into destination-tagged batches
//! - `Executor`: wires a source, the stages above and two sinks together

pub mod executor;
pub mod route;
pub mod split;
pub mod time;
pub mod window;

pub use executor::{Executor, RunSummary, WindowReport};
pub use route::{BatchRouter, Tagged, USER_DISCRIMINANT};
pub use split::{RawEvent, RoundResult, Splitter, TransactionRecord, UserProfile, UserRecord};
pub use time::{TimeDomain, WatermarkClock, WatermarkPolicy};
pub use window::{ClosedWindow, Late, Rejected, WindowAssigner, WindowBuffer};

pub mod prelude {
    pub use super::{
        BatchRouter, Executor, RawEvent, RunSummary, Splitter, Tagged, TimeDomain, WatermarkPolicy,
        WindowAssigner, WindowBuffer, WindowReport,
    };
}

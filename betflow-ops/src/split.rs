//! Decoding of raw bet events and their split into a user row and a transaction row.

use betflow_core::{Error, Message, Record, Result};
use serde::{Deserialize, Serialize};
use tracing::instrument;

/// Outcome of one casino round.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RoundResult {
    Win,
    Loss,
}

/// Registration data of a player, with running totals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserProfile {
    pub user_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_email: Option<String>,
    pub currency: String,
    pub debit_amount: f64,
    pub credit_amount: f64,
    /// Fields the producer added that we don't model; kept for additive schema evolution.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// The wire format of one ingested message.
///
/// Amounts (here and in `UserProfile`) are decimals on the wire but decoded as
/// `f64`, so an integral amount such as `100` is written back as `100.0`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RawEvent {
    pub uid: i64,
    pub user_info: UserProfile,
    pub round_results: RoundResult,
    pub bet_amount: f64,
    pub win_amount: f64,
    /// UTC, `YYYY-MM-DD HH:MM:SS`
    pub timestamp: String,
    #[serde(rename = "conversion_rate_EUR", default, skip_serializing_if = "Option::is_none")]
    pub conversion_rate_eur: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// `UserProfile` flattened with the owning `uid`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserRecord {
    pub uid: i64,
    #[serde(flatten)]
    pub profile: UserProfile,
}

/// `RawEvent` without its `user_info`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRecord {
    pub uid: i64,
    pub round_results: RoundResult,
    pub bet_amount: f64,
    pub win_amount: f64,
    pub timestamp: String,
    #[serde(rename = "conversion_rate_EUR", default, skip_serializing_if = "Option::is_none")]
    pub conversion_rate_eur: Option<f64>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl RawEvent {
    pub fn decode(payload: &[u8]) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_slice(payload)
    }

    pub fn split(self) -> (UserRecord, TransactionRecord) {
        let user = UserRecord {
            uid: self.uid,
            profile: self.user_info,
        };
        let tx = TransactionRecord {
            uid: self.uid,
            round_results: self.round_results,
            bet_amount: self.bet_amount,
            win_amount: self.win_amount,
            timestamp: self.timestamp,
            conversion_rate_eur: self.conversion_rate_eur,
            extra: self.extra,
        };
        (user, tx)
    }
}

/// Turns one message into exactly two records stamped with its publish time.
#[derive(Debug, Clone, Copy, Default)]
pub struct Splitter;

impl Splitter {
    pub fn new() -> Self {
        Self
    }

    /// Returns `[user, transaction]`. Malformed payloads are a per-message error.
    #[instrument(name = "split", skip_all, fields(id = %msg.id))]
    pub fn split(&self, msg: &Message) -> Result<[Record; 2]> {
        let raw = RawEvent::decode(&msg.payload).map_err(|e| Error::Decode {
            id: msg.id.clone(),
            reason: e.to_string(),
        })?;
        let (user, tx) = raw.split();
        Ok([
            Record::new(msg.publish_time, serde_json::to_value(user)?),
            Record::new(msg.publish_time, serde_json::to_value(tx)?),
        ])
    }
}

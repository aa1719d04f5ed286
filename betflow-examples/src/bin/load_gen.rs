//! Generates registration and bet events as JSONL envelopes, for replay through a
//! `file://` subscription:
//!
//! ```text
//! cargo run -p betflow-examples --bin load_gen -- --event-count 500 --out events.jsonl
//! betflow run --input-subscription file://events.jsonl --bigquery-dataset casino \
//!     --bigquery-tables transactions users
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Result;
use betflow_ops::{RawEvent, RoundResult, UserProfile};
use chrono::{DateTime, Duration, Timelike, Utc};
use clap::Parser;
use rand::rngs::StdRng;
use rand::seq::{IteratorRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use tokio::io::AsyncWriteExt;

#[derive(Parser, Debug)]
#[command(name = "load_gen", about = "Fake casino traffic for betflow")]
struct Args {
    /// Number of bet events to produce
    #[arg(long, default_value_t = 100)]
    event_count: u64,
    /// Output file; stdout when omitted
    #[arg(long)]
    out: Option<PathBuf>,
    /// Publish time of the first event (RFC3339); defaults to now
    #[arg(long)]
    start: Option<DateTime<Utc>>,
    /// Publish-time distance between consecutive events
    #[arg(long, default_value_t = 1000)]
    interval_ms: i64,
    /// Real delay between writes, for tailing consumers
    #[arg(long, default_value_t = 0)]
    sleep_ms: u64,
    #[arg(long)]
    seed: Option<u64>,
}

const FIRST_NAMES: &[&str] = &["Ana", "Bruno", "Chen", "Dara", "Eli", "Farah", "Goran", "Hana", "Ivo", "Jun"];
const LAST_NAMES: &[&str] = &["Silva", "Novak", "Okafor", "Larsen", "Tanaka", "Moreau", "Kowalski", "Haddad"];
const CURRENCIES: &[&str] = &["EUR", "USD", "GBP", "BRL", "JPY", "PLN"];

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

/// Players currently on the site, with their running debit/credit totals.
#[derive(Debug, Default)]
struct UserPool {
    users: BTreeMap<i64, UserProfile>,
}

impl UserPool {
    fn len(&self) -> usize {
        self.users.len()
    }

    /// Registers a player. Ids drift upwards over time; an id already in the pool is
    /// a returning player and keeps its totals.
    fn register(&mut self, rng: &mut impl Rng, now: DateTime<Utc>, elapsed: Duration) -> i64 {
        let tens_of_minutes = elapsed.num_minutes() / 10 + 1;
        let millis = match i64::from(now.nanosecond() / 1_000_000) {
            0 => rng.gen_range(1..=1000),
            ms => ms,
        };
        let low = tens_of_minutes + millis;
        let high = ((10 + tens_of_minutes) * millis).max(low);
        let uid = rng.gen_range(low..=high);

        let first = FIRST_NAMES.choose(rng).copied().unwrap_or("Ana");
        let last = LAST_NAMES.choose(rng).copied().unwrap_or("Silva");
        let profile = UserProfile {
            user_name: format!("{first} {last}"),
            user_phone: Some(format!("+{}", rng.gen_range(10_000_000_000_u64..99_999_999_999))),
            user_email: Some(format!("{}.{}{}@example.com", first.to_lowercase(), last.to_lowercase(), uid)),
            currency: CURRENCIES.choose(rng).copied().unwrap_or("EUR").to_string(),
            debit_amount: 0.0,
            credit_amount: 0.0,
            extra: Default::default(),
        };
        self.users.entry(uid).or_insert(profile);
        uid
    }

    /// One round played by a random registered player; `None` while nobody is registered.
    fn bet(&mut self, rng: &mut impl Rng, now: DateTime<Utc>) -> Option<RawEvent> {
        let uid = *self.users.keys().choose(rng)?;
        let profile = self.users.get_mut(&uid)?;
        let bet_amount = round2(rng.gen_range(10.0..1000.0));
        let (round_results, win_amount) = if rng.gen_range(1..=10) >= 6 {
            (RoundResult::Win, round2(bet_amount * rng.gen_range(0.5..4.0)))
        } else {
            (RoundResult::Loss, 0.0)
        };
        profile.debit_amount = round2(profile.debit_amount + bet_amount);
        profile.credit_amount = round2(profile.credit_amount + win_amount);
        Some(RawEvent {
            uid,
            user_info: profile.clone(),
            round_results,
            bet_amount,
            win_amount,
            timestamp: now.format("%Y-%m-%d %H:%M:%S").to_string(),
            conversion_rate_eur: None,
            extra: Default::default(),
        })
    }
}

/// One generator step: maybe register someone (always when the pool is empty,
/// otherwise one time in four), then play a round.
fn step(pool: &mut UserPool, rng: &mut impl Rng, now: DateTime<Utc>, elapsed: Duration) -> Option<RawEvent> {
    if pool.users.is_empty() || rng.gen_range(1..=4) == 3 {
        pool.register(rng, now, elapsed);
    }
    pool.bet(rng, now)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut out: Box<dyn tokio::io::AsyncWrite + Unpin + Send> = match &args.out {
        Some(path) => Box::new(tokio::fs::File::create(path).await?),
        None => Box::new(tokio::io::stdout()),
    };

    let start = args.start.unwrap_or_else(Utc::now);
    let mut pool = UserPool::default();
    for i in 0..args.event_count {
        let elapsed = Duration::milliseconds(args.interval_ms * i as i64);
        let publish_time = start + elapsed;
        let Some(event) = step(&mut pool, &mut rng, publish_time, elapsed) else {
            continue;
        };
        let line = serde_json::json!({
            "publish_time": publish_time.to_rfc3339(),
            "data": event,
        });
        out.write_all(line.to_string().as_bytes()).await?;
        out.write_all(b"\n").await?;
        if args.sleep_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(args.sleep_ms)).await;
        }
    }
    out.flush().await?;
    eprintln!("wrote {} events for {} users", args.event_count, pool.len());
    Ok(())
}

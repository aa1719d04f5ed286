use chrono::{DateTime, Duration, Utc};

/// Policy that defines how to compute watermarks.
/// watermark = max_observed_time - allowed_lateness
#[derive(Debug, Clone, Copy)]
pub struct WatermarkPolicy {
    pub allowed_lateness: Duration,
}

impl WatermarkPolicy {
    pub fn new(allowed_lateness: Duration) -> Self {
        Self { allowed_lateness }
    }
}

impl WatermarkPolicy {
    /// `ts - allowed_lateness`, clamped to the earliest representable instant.
    pub fn apply(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        ts.checked_sub_signed(self.allowed_lateness)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl Default for WatermarkPolicy {
    fn default() -> Self {
        Self::new(Duration::zero())
    }
}

#[derive(Debug, Clone)]
pub struct WatermarkClock {
    policy: WatermarkPolicy,
    max_observed: Option<DateTime<Utc>>,
}

impl WatermarkClock {
    pub fn new(policy: WatermarkPolicy) -> Self {
        Self {
            policy,
            max_observed: None,
        }
    }

    pub fn observe(&mut self, ts: DateTime<Utc>) {
        self.max_observed = match self.max_observed {
            Some(max) if ts > max => Some(ts),
            None => Some(ts),
            Some(max) => Some(max),
        };
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.max_observed.map(|t| self.policy.apply(t))
    }
}

/// Where the pipeline's notion of "now" comes from.
#[derive(Debug, Clone)]
pub enum TimeDomain {
    /// Driven by publish times of incoming messages.
    Event(WatermarkClock),
    /// Driven by the wall clock on every tick.
    Processing(WatermarkPolicy),
}

impl TimeDomain {
    pub fn event(policy: WatermarkPolicy) -> Self {
        TimeDomain::Event(WatermarkClock::new(policy))
    }

    pub fn processing(policy: WatermarkPolicy) -> Self {
        TimeDomain::Processing(policy)
    }

    /// Windows close on the wall clock rather than on publish times.
    pub fn is_processing(&self) -> bool {
        matches!(self, TimeDomain::Processing(_))
    }

    /// Watermark after a message published at `ts` arrived.
    pub fn on_message(&mut self, ts: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimeDomain::Event(clock) => {
                clock.observe(ts);
                clock.watermark()
            }
            TimeDomain::Processing(_) => None,
        }
    }

    /// Watermark at wall-clock time `now`.
    pub fn on_tick(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimeDomain::Event(_) => None,
            TimeDomain::Processing(policy) => Some(policy.apply(now)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_advances_with_observations_and_lateness() {
        let pol = WatermarkPolicy::new(Duration::seconds(10));
        let mut clk = WatermarkClock::new(pol);
        let t0 = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let t1 = DateTime::<Utc>::from_timestamp(1_700_000_030, 0).unwrap();
        assert_eq!(clk.watermark(), None);
        clk.observe(t0);
        assert_eq!(clk.watermark(), Some(t0 - Duration::seconds(10)));
        clk.observe(t1);
        assert_eq!(clk.watermark(), Some(t1 - Duration::seconds(10)));
        // Out of order earlier than max shouldn't decrease WM
        clk.observe(t0 - Duration::seconds(100));
        assert_eq!(clk.watermark(), Some(t1 - Duration::seconds(10)));
    }

    #[test]
    fn domains_only_react_to_their_own_clock() {
        let t = DateTime::<Utc>::from_timestamp(1_700_000_000, 0).unwrap();
        let mut event = TimeDomain::event(WatermarkPolicy::default());
        assert_eq!(event.on_message(t), Some(t));
        assert_eq!(event.on_tick(t + Duration::hours(1)), None);

        let mut processing = TimeDomain::processing(WatermarkPolicy::new(Duration::seconds(5)));
        assert_eq!(processing.on_message(t), None);
        assert_eq!(processing.on_tick(t), Some(t - Duration::seconds(5)));
        assert!(processing.is_processing());
        assert!(!event.is_processing());
    }

    #[test]
    fn lateness_never_underflows() {
        let pol = WatermarkPolicy::new(Duration::days(1));
        assert_eq!(pol.apply(DateTime::<Utc>::MIN_UTC), DateTime::<Utc>::MIN_UTC);
    }
}

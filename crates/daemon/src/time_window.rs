//! Which timestamps a fetch needs, as a pure function of "now".

use time::{Duration, OffsetDateTime, UtcOffset};

/// Measurement files are published every 15 minutes.
pub const SLOT: Duration = Duration::minutes(15);
/// Forecast runs appear roughly this long after their issuance hour.
pub const FORECAST_PUBLICATION_DELAY: Duration = Duration::minutes(15);

/// Start of the 15-minute slot containing `t`, in UTC.
pub fn floor_to_slot(t: OffsetDateTime) -> OffsetDateTime {
    floor_to(t, SLOT.whole_seconds())
}

/// Start of the hour containing `t`, in UTC.
pub fn floor_to_hour(t: OffsetDateTime) -> OffsetDateTime {
    floor_to(t, 3600)
}

fn floor_to(t: OffsetDateTime, step_seconds: i64) -> OffsetDateTime {
    let t = t.to_offset(UtcOffset::UTC);
    let excess = t.unix_timestamp().rem_euclid(step_seconds);
    t - Duration::seconds(excess) - Duration::nanoseconds(t.nanosecond() as i64)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeWindowPolicy {
    lookback: Duration,
    forecast_hours_back: u32,
}

impl TimeWindowPolicy {
    pub fn new(lookback: Duration, forecast_hours_back: u32) -> Self {
        Self {
            lookback,
            forecast_hours_back,
        }
    }

    pub fn lookback(&self) -> Duration {
        self.lookback
    }

    pub fn with_lookback(self, lookback: Duration) -> Self {
        Self { lookback, ..self }
    }

    /// Slot timestamps, ascending. The window ends at the last slot boundary
    /// at or before `now` and holds every slot no older than
    /// `now - lookback`; the end slot is always included.
    pub fn measurement_window(&self, now: OffsetDateTime) -> Vec<OffsetDateTime> {
        let oldest_allowed = now - self.lookback;
        let mut slot = floor_to_slot(now);
        let mut slots = vec![slot];
        loop {
            slot -= SLOT;
            if slot < oldest_allowed {
                break;
            }
            slots.push(slot);
        }
        slots.reverse();
        slots
    }

    /// Forecast entries older than this are dropped.
    pub fn forecast_cutoff(&self, now: OffsetDateTime) -> OffsetDateTime {
        now
    }

    /// Issuance hours to try, newest first: the latest run expected to be
    /// published, then one hour older at a time. Always at least one.
    pub fn forecast_issuances(&self, now: OffsetDateTime) -> Vec<OffsetDateTime> {
        let latest = floor_to_hour(now - FORECAST_PUBLICATION_DELAY);
        (0..self.forecast_hours_back.max(1) as i64)
            .map(|hours| latest - Duration::hours(hours))
            .collect()
    }
}

//! Conversions between `std::time::Duration` and wall-clock timestamps.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

/// Converts a std duration, saturating at the largest representable delta.
pub fn delta(duration: Duration) -> TimeDelta {
    TimeDelta::from_std(duration).unwrap_or(TimeDelta::MAX)
}

/// `now + duration`, saturating at the maximum timestamp.
pub fn after(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    now.checked_add_signed(delta(duration))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Time left until `deadline`, or `None` once it has passed.
pub fn remaining(now: DateTime<Utc>, deadline: DateTime<Utc>) -> Option<Duration> {
    (deadline - now).to_std().ok().filter(|d| !d.is_zero())
}

//! Injectable clock and New Zealand racing-date arithmetic.
//!
//! Racing dates are Pacific/Auckland calendar days, never UTC days. All
//! partition boundaries and "which day's meetings" decisions go through
//! this crate so DST transitions are handled in exactly one place.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Pacific::Auckland;

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

/// Source of the current instant. Production uses [`SystemClock`]; tests
/// inject a [`FixedClock`] so time-dependent logic stays deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Fixed, manually advanced clock for tests.
#[derive(Debug)]
pub struct FixedClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().expect("clock lock poisoned") = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.now.lock().expect("clock lock poisoned");
        *guard += by;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock poisoned")
    }
}

// ---------------------------------------------------------------------------
// NZ date arithmetic
// ---------------------------------------------------------------------------

/// The Pacific/Auckland calendar date containing `instant`.
pub fn nz_date(instant: DateTime<Utc>) -> NaiveDate {
    instant.with_timezone(&Auckland).date_naive()
}

/// UTC instant of the first valid local time at or after `date 00:00` in
/// Pacific/Auckland. NZ's DST gap falls at 02:00 so midnight itself always
/// exists, but the lookup stays total either way.
pub fn nz_midnight_utc(date: NaiveDate) -> Result<DateTime<Utc>> {
    let local = date.and_time(NaiveTime::MIN);
    Auckland
        .from_local_datetime(&local)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| anyhow!("no valid NZ local time for {date} 00:00"))
}

/// Half-open UTC range `[date 00:00 NZ, date+1 00:00 NZ)`.
///
/// The range length is 23, 24, or 25 hours depending on DST transitions;
/// partition bounds must use these instants, never UTC midnights.
pub fn nz_day_bounds(date: NaiveDate) -> Result<(DateTime<Utc>, DateTime<Utc>)> {
    let start = nz_midnight_utc(date)?;
    let next = date
        .succ_opt()
        .ok_or_else(|| anyhow!("date overflow past {date}"))?;
    let end = nz_midnight_utc(next)?;
    Ok((start, end))
}

/// Partition child-table suffix for an NZ date: `YYYY_MM_DD`.
pub fn partition_suffix(date: NaiveDate) -> String {
    date.format("%Y_%m_%d").to_string()
}

/// Next UTC instant strictly after `after` at which Pacific/Auckland wall
/// clocks read `hour:minute`. Used for the nightly partition run and the
/// daily-init schedule.
pub fn next_nz_wall_clock(after: DateTime<Utc>, hour: u32, minute: u32) -> Result<DateTime<Utc>> {
    let time = NaiveTime::from_hms_opt(hour, minute, 0)
        .ok_or_else(|| anyhow!("invalid wall-clock time {hour:02}:{minute:02}"))?;

    let mut date = nz_date(after);
    // Scan at most a few days forward; a DST gap can swallow one candidate.
    for _ in 0..3 {
        if let Some(local) = Auckland.from_local_datetime(&date.and_time(time)).earliest() {
            let utc = local.with_timezone(&Utc);
            if utc > after {
                return Ok(utc);
            }
        }
        date = date
            .succ_opt()
            .ok_or_else(|| anyhow!("date overflow past {date}"))?;
    }
    Err(anyhow!(
        "no NZ wall-clock {hour:02}:{minute:02} found within 3 days of {after}"
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

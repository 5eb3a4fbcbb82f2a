//! Polling-interval policy: time-to-start in, next-poll delay out.
//!
//! Total and stateless. Retirement is not this function's business — the
//! scheduler consults race status for that; the policy only shapes cadence.

use std::fmt;
use std::time::Duration;

/// Cadence once a race is inside five minutes of its start (or past it).
pub const FAST_POLL: Duration = Duration::from_millis(15_000);
/// Cadence between five and fifteen minutes out.
pub const MID_POLL: Duration = Duration::from_millis(30_000);
/// Cadence beyond fifteen minutes out.
pub const SLOW_POLL: Duration = Duration::from_millis(60_000);

/// The one input the policy rejects: a time-to-start that is not a number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NonFiniteTimeToStart(pub f64);

impl fmt::Display for NonFiniteTimeToStart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "non-finite time-to-start: {}", self.0)
    }
}

impl std::error::Error for NonFiniteTimeToStart {}

/// Delay until the next poll for a race starting in `time_to_start_secs`
/// seconds (negative once the advertised start has passed).
pub fn next_interval(time_to_start_secs: f64) -> Result<Duration, NonFiniteTimeToStart> {
    if !time_to_start_secs.is_finite() {
        return Err(NonFiniteTimeToStart(time_to_start_secs));
    }
    Ok(if time_to_start_secs <= 300.0 {
        FAST_POLL
    } else if time_to_start_secs <= 900.0 {
        MID_POLL
    } else {
        SLOW_POLL
    })
}

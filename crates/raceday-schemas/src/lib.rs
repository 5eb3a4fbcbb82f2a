//! Canonical domain types shared across the raceday workspace.
//!
//! Everything here is plain data: serde-derived, no I/O, no clocks. The
//! store persists these shapes; the transformer produces them; the
//! scheduler and pipeline pass them around.

use anyhow::{anyhow, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// RaceStatus
// ---------------------------------------------------------------------------

/// Lifecycle status of a race.
///
/// Status only ever moves forward along
/// `upcoming -> open -> closed -> interim -> final`, with `abandoned`
/// reachable from any non-terminal state. The store's guarded upsert
/// discards regressions; [`RaceStatus::rank`] defines the order it guards
/// with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaceStatus {
    Upcoming,
    Open,
    Closed,
    Interim,
    Final,
    Abandoned,
}

impl RaceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RaceStatus::Upcoming => "upcoming",
            RaceStatus::Open => "open",
            RaceStatus::Closed => "closed",
            RaceStatus::Interim => "interim",
            RaceStatus::Final => "final",
            RaceStatus::Abandoned => "abandoned",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "upcoming" => Ok(RaceStatus::Upcoming),
            "open" => Ok(RaceStatus::Open),
            "closed" => Ok(RaceStatus::Closed),
            "interim" => Ok(RaceStatus::Interim),
            "final" => Ok(RaceStatus::Final),
            "abandoned" => Ok(RaceStatus::Abandoned),
            other => Err(anyhow!("invalid race status: {}", other)),
        }
    }

    /// Monotone rank used by the guarded status update. `abandoned` ranks
    /// above everything so it is reachable from any non-terminal state and
    /// can never itself be overwritten.
    pub fn rank(&self) -> i16 {
        match self {
            RaceStatus::Upcoming => 0,
            RaceStatus::Open => 1,
            RaceStatus::Closed => 2,
            RaceStatus::Interim => 3,
            RaceStatus::Final => 4,
            RaceStatus::Abandoned => 5,
        }
    }

    /// `final` and `abandoned` end polling for a race.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RaceStatus::Final | RaceStatus::Abandoned)
    }
}

// ---------------------------------------------------------------------------
// RaceType
// ---------------------------------------------------------------------------

/// Discipline of a meeting. Only thoroughbred and harness meetings are
/// ingested; greyhound exists so payload decoding stays total.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RaceType {
    Thoroughbred,
    Harness,
    Greyhound,
}

impl RaceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RaceType::Thoroughbred => "thoroughbred",
            RaceType::Harness => "harness",
            RaceType::Greyhound => "greyhound",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "thoroughbred" => Ok(RaceType::Thoroughbred),
            "harness" => Ok(RaceType::Harness),
            "greyhound" => Ok(RaceType::Greyhound),
            other => Err(anyhow!("invalid race type: {}", other)),
        }
    }

    pub fn is_supported(&self) -> bool {
        matches!(self, RaceType::Thoroughbred | RaceType::Harness)
    }
}

// ---------------------------------------------------------------------------
// PoolType
// ---------------------------------------------------------------------------

/// Betting pool kinds tracked per race.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum PoolType {
    Win,
    Place,
    Quinella,
    Trifecta,
    Exacta,
    First4,
}

impl PoolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolType::Win => "win",
            PoolType::Place => "place",
            PoolType::Quinella => "quinella",
            PoolType::Trifecta => "trifecta",
            PoolType::Exacta => "exacta",
            PoolType::First4 => "first4",
        }
    }

    /// Lenient parse for upstream payload keys. Returns `None` for pool
    /// types the system does not track; the transformer drops those.
    pub fn from_payload_key(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "win" => Some(PoolType::Win),
            "place" => Some(PoolType::Place),
            "quinella" => Some(PoolType::Quinella),
            "trifecta" => Some(PoolType::Trifecta),
            "exacta" => Some(PoolType::Exacta),
            "first4" | "first_4" | "firstfour" => Some(PoolType::First4),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// TimeToStartBucket
// ---------------------------------------------------------------------------

/// Fixed ladder of time-to-start buckets stamped on money-flow samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeToStartBucket {
    M60,
    M30,
    M15,
    M10,
    M5,
    M2,
    M1,
    S30,
    AtStart,
    PostStart,
}

impl TimeToStartBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeToStartBucket::M60 => "60m",
            TimeToStartBucket::M30 => "30m",
            TimeToStartBucket::M15 => "15m",
            TimeToStartBucket::M10 => "10m",
            TimeToStartBucket::M5 => "5m",
            TimeToStartBucket::M2 => "2m",
            TimeToStartBucket::M1 => "1m",
            TimeToStartBucket::S30 => "30s",
            TimeToStartBucket::AtStart => "at_start",
            TimeToStartBucket::PostStart => "post_start",
        }
    }

    /// Bucket for a given number of seconds until race start. Negative
    /// seconds mean the advertised start has passed.
    pub fn for_time_to_start(secs: i64) -> Self {
        match secs {
            s if s < 0 => TimeToStartBucket::PostStart,
            0 => TimeToStartBucket::AtStart,
            s if s <= 30 => TimeToStartBucket::S30,
            s if s <= 60 => TimeToStartBucket::M1,
            s if s <= 120 => TimeToStartBucket::M2,
            s if s <= 300 => TimeToStartBucket::M5,
            s if s <= 600 => TimeToStartBucket::M10,
            s if s <= 900 => TimeToStartBucket::M15,
            s if s <= 1800 => TimeToStartBucket::M30,
            _ => TimeToStartBucket::M60,
        }
    }
}

// ---------------------------------------------------------------------------
// Keyed-state entities
// ---------------------------------------------------------------------------

/// A racing venue-day. Upserted at daily init; metadata may be corrected
/// during the day; never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Meeting {
    pub meeting_id: String,
    pub name: String,
    pub country: String,
    pub race_type: RaceType,
    /// Single-letter category code from the upstream API.
    pub category_code: Option<String>,
    /// NZ local calendar day this meeting belongs to.
    pub date: NaiveDate,
}

/// One event within a meeting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Race {
    pub race_id: String,
    pub meeting_id: String,
    pub race_number: i32,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub status: RaceStatus,
    pub distance_m: Option<i32>,
    pub track_condition: Option<String>,
    pub weather: Option<String>,
}

/// A runner in a race. Odds fields hold the latest observed fixed odds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Entrant {
    pub entrant_id: String,
    pub race_id: String,
    pub runner_number: i32,
    pub name: String,
    pub jockey: Option<String>,
    pub trainer: Option<String>,
    pub weight_kg: Option<f64>,
    pub silk_url: Option<String>,
    pub is_scratched: bool,
    pub win_odds: Option<f64>,
    pub place_odds: Option<f64>,
}

/// Aggregate pool totals for a race. One row per (race_id, pool_type).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RacePool {
    pub race_id: String,
    pub pool_type: PoolType,
    pub total: f64,
    pub currency: String,
    pub last_updated: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// History events (append-only)
// ---------------------------------------------------------------------------

/// Point-in-time sample of one entrant's odds for one pool type.
/// Append-only; partitioned by the NZ date of `event_timestamp`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OddsEvent {
    pub entrant_id: String,
    pub race_id: String,
    pub event_timestamp: DateTime<Utc>,
    pub pool_type: PoolType,
    pub odds: f64,
}

/// Point-in-time sample of betting-pool money attributed to one entrant.
/// Deltas are present only when the transformer had a previous snapshot to
/// diff against; a fresh process emits absolute totals alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MoneyFlowEvent {
    pub entrant_id: String,
    pub race_id: String,
    pub event_timestamp: DateTime<Utc>,
    pub time_to_start_bucket: TimeToStartBucket,
    /// Absolute pool amounts by pool type at sample time.
    pub pool_amounts: BTreeMap<PoolType, f64>,
    /// Increment vs. the previous sample, by pool type. Absent on the
    /// first sample after process start or cache eviction.
    pub deltas: Option<BTreeMap<PoolType, f64>>,
    /// Hold (bet) percentage of the win pool carried by this entrant.
    pub hold_percentage: Option<f64>,
}

/// Per-race money-flow totals kept by the pipeline between polls so the
/// transformer can emit increments.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoneyFlowTotals {
    /// entrant_id -> pool type -> absolute amount.
    pub by_entrant: BTreeMap<String, BTreeMap<PoolType, f64>>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

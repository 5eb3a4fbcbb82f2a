//! Wire shapes returned by the racing API.
//!
//! Decoding is by field name and tolerates unknown fields (serde default
//! behavior). Required fields are non-optional so a payload missing one
//! fails to decode rather than producing half-formed records; the few
//! fields the transformer itself filters on (`meeting_id`) stay optional.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::collections::BTreeMap;

// ---------------------------------------------------------------------------
// Meetings endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct MeetingsResponse {
    #[serde(default)]
    pub meetings: Vec<MeetingPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeetingPayload {
    /// Missing ids do occur upstream; the transformer drops such meetings.
    #[serde(default)]
    pub meeting_id: Option<String>,
    pub name: String,
    pub country: String,
    pub race_type: String,
    #[serde(default)]
    pub category_code: Option<String>,
    /// Advertised meeting date, `YYYY-MM-DD`.
    pub date: String,
    #[serde(default)]
    pub races: Vec<RaceSummaryPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaceSummaryPayload {
    pub race_id: String,
    pub race_number: i32,
    pub name: String,
    pub start_time: DateTime<Utc>,
    #[serde(default)]
    pub status: Option<String>,
}

// ---------------------------------------------------------------------------
// Race detail endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct RacePayload {
    pub race: RaceHeaderPayload,
    #[serde(default)]
    pub entrants: Vec<EntrantPayload>,
    #[serde(default)]
    pub money_tracker: Option<MoneyTrackerPayload>,
    #[serde(default)]
    pub pools: Vec<PoolTotalPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RaceHeaderPayload {
    pub race_id: String,
    pub meeting_id: String,
    pub race_number: i32,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub status: String,
    #[serde(default)]
    pub distance_m: Option<i32>,
    #[serde(default)]
    pub track_condition: Option<String>,
    #[serde(default)]
    pub weather: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntrantPayload {
    pub entrant_id: String,
    pub runner_number: i32,
    pub name: String,
    #[serde(default)]
    pub jockey: Option<String>,
    #[serde(default)]
    pub trainer: Option<String>,
    #[serde(default)]
    pub weight_kg: Option<f64>,
    #[serde(default)]
    pub silk_url: Option<String>,
    #[serde(default)]
    pub is_scratched: bool,
    #[serde(default)]
    pub odds: Option<EntrantOddsPayload>,
}

/// Current odds per pool for one entrant. Zero is the upstream sentinel
/// for "no price"; the transformer skips those.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EntrantOddsPayload {
    #[serde(default)]
    pub fixed_win: Option<f64>,
    #[serde(default)]
    pub fixed_place: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoneyTrackerPayload {
    #[serde(default)]
    pub entrants: Vec<EntrantMoneyPayload>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EntrantMoneyPayload {
    pub entrant_id: String,
    /// Absolute money held per pool type, keyed by the upstream pool name.
    #[serde(default)]
    pub pools: BTreeMap<String, f64>,
    #[serde(default)]
    pub hold_percentage: Option<f64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PoolTotalPayload {
    pub pool_type: String,
    pub total: f64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

fn default_currency() -> String {
    "$".to_string()
}

//! Pure conversion from racing API payloads to canonical records.
//!
//! No I/O and no clocks: the caller supplies the sample instant and the
//! previous money-flow snapshot, so the same inputs always produce the
//! same outputs.

use std::collections::{BTreeMap, HashSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};

use raceday_schemas::{
    Entrant, Meeting, MoneyFlowEvent, MoneyFlowTotals, OddsEvent, PoolType, Race, RacePool,
    RaceStatus, RaceType, TimeToStartBucket,
};
use raceday_upstream::payloads::{MeetingPayload, RacePayload};

/// Upstream writes a literal zero when an entrant has no price.
const ODDS_SENTINEL: f64 = 0.0;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// A payload decoded but cannot be turned into valid records.
#[derive(Debug)]
pub enum TransformError {
    InvalidStatus { race_id: String, status: String },
    InvalidRaceNumber { race_id: String, race_number: i32 },
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::InvalidStatus { race_id, status } => {
                write!(f, "race {race_id}: unknown status '{status}'")
            }
            TransformError::InvalidRaceNumber { race_id, race_number } => {
                write!(f, "race {race_id}: invalid race number {race_number}")
            }
        }
    }
}

impl std::error::Error for TransformError {}

// ---------------------------------------------------------------------------
// Meetings
// ---------------------------------------------------------------------------

/// Convert the meetings payload for one racing day.
///
/// Drops meetings without a `meeting_id` and meetings of unsupported race
/// types. An unparseable advertised date falls back to the racing date the
/// meetings were requested for.
pub fn transform_meetings(payloads: &[MeetingPayload], racing_date: NaiveDate) -> Vec<Meeting> {
    let mut out = Vec::with_capacity(payloads.len());
    for payload in payloads {
        let Some(meeting_id) = payload.meeting_id.clone() else {
            tracing::warn!(name = %payload.name, "dropping meeting without meeting_id");
            continue;
        };
        let race_type = match RaceType::parse(&payload.race_type) {
            Ok(rt) if rt.is_supported() => rt,
            Ok(_) | Err(_) => continue,
        };
        let date = payload
            .date
            .parse::<NaiveDate>()
            .unwrap_or(racing_date);
        out.push(Meeting {
            meeting_id,
            name: payload.name.clone(),
            country: payload.country.clone(),
            race_type,
            category_code: payload.category_code.clone(),
            date,
        });
    }
    out
}

// ---------------------------------------------------------------------------
// Race snapshot
// ---------------------------------------------------------------------------

/// Inputs the transformer cannot derive itself.
#[derive(Debug, Clone)]
pub struct TransformContext {
    /// Sample instant stamped on every emitted history event.
    pub now: DateTime<Utc>,
    /// Money-flow totals from the previous poll of this race, when the
    /// pipeline still holds them. Absent -> no deltas are emitted.
    pub previous: Option<MoneyFlowTotals>,
}

/// Everything one poll of one race produces.
#[derive(Debug, Clone)]
pub struct TransformedRace {
    pub race: Race,
    pub entrants: Vec<Entrant>,
    pub pools: Vec<RacePool>,
    pub odds_events: Vec<OddsEvent>,
    pub money_flow_events: Vec<MoneyFlowEvent>,
    /// Absolute totals from this sample, for the pipeline's snapshot cache.
    pub totals: MoneyFlowTotals,
}

/// Convert one race detail snapshot.
pub fn transform_race(
    payload: &RacePayload,
    ctx: &TransformContext,
) -> Result<TransformedRace, TransformError> {
    let header = &payload.race;

    let status = RaceStatus::parse(&header.status.to_ascii_lowercase()).map_err(|_| {
        TransformError::InvalidStatus {
            race_id: header.race_id.clone(),
            status: header.status.clone(),
        }
    })?;
    if header.race_number < 1 {
        return Err(TransformError::InvalidRaceNumber {
            race_id: header.race_id.clone(),
            race_number: header.race_number,
        });
    }

    let race = Race {
        race_id: header.race_id.clone(),
        meeting_id: header.meeting_id.clone(),
        race_number: header.race_number,
        name: header.name.clone(),
        start_time: header.start_time,
        status,
        distance_m: header.distance_m,
        track_condition: header.track_condition.clone(),
        weather: header.weather.clone(),
    };

    // Duplicate entrant ids keep the first occurrence.
    let mut seen: HashSet<&str> = HashSet::new();
    let mut entrants = Vec::with_capacity(payload.entrants.len());
    let mut odds_events = Vec::new();
    for ep in &payload.entrants {
        if !seen.insert(ep.entrant_id.as_str()) {
            tracing::warn!(
                race_id = %header.race_id,
                entrant_id = %ep.entrant_id,
                "duplicate entrant in payload, keeping first"
            );
            continue;
        }

        let odds = ep.odds.clone().unwrap_or_default();
        entrants.push(Entrant {
            entrant_id: ep.entrant_id.clone(),
            race_id: header.race_id.clone(),
            runner_number: ep.runner_number,
            name: ep.name.clone(),
            jockey: ep.jockey.clone(),
            trainer: ep.trainer.clone(),
            weight_kg: ep.weight_kg,
            silk_url: ep.silk_url.clone(),
            is_scratched: ep.is_scratched,
            win_odds: priced(odds.fixed_win),
            place_odds: priced(odds.fixed_place),
        });

        for (pool_type, value) in [
            (PoolType::Win, odds.fixed_win),
            (PoolType::Place, odds.fixed_place),
        ] {
            if let Some(odds_value) = priced(value) {
                odds_events.push(OddsEvent {
                    entrant_id: ep.entrant_id.clone(),
                    race_id: header.race_id.clone(),
                    event_timestamp: ctx.now,
                    pool_type,
                    odds: odds_value,
                });
            }
        }
    }

    let pools = transform_pools(payload, ctx.now);

    let time_to_start = (header.start_time - ctx.now).num_seconds();
    let bucket = TimeToStartBucket::for_time_to_start(time_to_start);
    let (money_flow_events, totals) = transform_money_flow(payload, ctx, bucket, &seen);

    Ok(TransformedRace {
        race,
        entrants,
        pools,
        odds_events,
        money_flow_events,
        totals,
    })
}

/// A price counts only when present and distinct from the no-price sentinel.
fn priced(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v != ODDS_SENTINEL && *v > 0.0)
}

fn transform_pools(payload: &RacePayload, now: DateTime<Utc>) -> Vec<RacePool> {
    let race_id = &payload.race.race_id;
    let mut pools = Vec::with_capacity(payload.pools.len());
    for pp in &payload.pools {
        let Some(pool_type) = PoolType::from_payload_key(&pp.pool_type) else {
            tracing::warn!(race_id = %race_id, pool = %pp.pool_type, "dropping unknown pool type");
            continue;
        };
        pools.push(RacePool {
            race_id: race_id.clone(),
            pool_type,
            total: pp.total,
            currency: pp.currency.clone(),
            last_updated: pp.last_updated.unwrap_or(now),
        });
    }
    pools
}

fn transform_money_flow(
    payload: &RacePayload,
    ctx: &TransformContext,
    bucket: TimeToStartBucket,
    known_entrants: &HashSet<&str>,
) -> (Vec<MoneyFlowEvent>, MoneyFlowTotals) {
    let race_id = &payload.race.race_id;
    let mut events = Vec::new();
    let mut totals = MoneyFlowTotals::default();

    let Some(tracker) = &payload.money_tracker else {
        return (events, totals);
    };

    for em in &tracker.entrants {
        if !known_entrants.contains(em.entrant_id.as_str()) {
            tracing::warn!(
                race_id = %race_id,
                entrant_id = %em.entrant_id,
                "money tracker references unknown entrant, skipping"
            );
            continue;
        }

        let mut amounts: BTreeMap<PoolType, f64> = BTreeMap::new();
        for (key, amount) in &em.pools {
            let Some(pool_type) = PoolType::from_payload_key(key) else {
                tracing::warn!(race_id = %race_id, pool = %key, "dropping unknown pool type");
                continue;
            };
            amounts.insert(pool_type, *amount);
        }
        if amounts.is_empty() {
            continue;
        }

        let deltas = ctx.previous.as_ref().map(|prev| {
            let prev_amounts = prev.by_entrant.get(&em.entrant_id);
            amounts
                .iter()
                .map(|(pool, current)| {
                    let before = prev_amounts
                        .and_then(|m| m.get(pool))
                        .copied()
                        .unwrap_or(0.0);
                    (*pool, current - before)
                })
                .collect::<BTreeMap<_, _>>()
        });

        totals
            .by_entrant
            .insert(em.entrant_id.clone(), amounts.clone());

        events.push(MoneyFlowEvent {
            entrant_id: em.entrant_id.clone(),
            race_id: race_id.clone(),
            event_timestamp: ctx.now,
            time_to_start_bucket: bucket,
            pool_amounts: amounts,
            deltas,
            hold_percentage: em.hold_percentage,
        });
    }

    (events, totals)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use raceday_upstream::payloads::{
        EntrantMoneyPayload, EntrantOddsPayload, EntrantPayload, MoneyTrackerPayload,
        PoolTotalPayload, RaceHeaderPayload,
    };

    fn utc(s: &str) -> DateTime<Utc> {
        s.parse().unwrap()
    }

    fn meeting_payload(id: Option<&str>, race_type: &str) -> MeetingPayload {
        MeetingPayload {
            meeting_id: id.map(str::to_string),
            name: "Riccarton Park".to_string(),
            country: "NZ".to_string(),
            race_type: race_type.to_string(),
            category_code: Some("T".to_string()),
            date: "2025-07-03".to_string(),
            races: vec![],
        }
    }

    fn entrant_payload(id: &str, number: i32, odds: Option<EntrantOddsPayload>) -> EntrantPayload {
        EntrantPayload {
            entrant_id: id.to_string(),
            runner_number: number,
            name: format!("Runner {number}"),
            jockey: None,
            trainer: None,
            weight_kg: None,
            silk_url: None,
            is_scratched: false,
            odds,
        }
    }

    fn race_payload() -> RacePayload {
        RacePayload {
            race: RaceHeaderPayload {
                race_id: "r1".to_string(),
                meeting_id: "m1".to_string(),
                race_number: 4,
                name: "Open Handicap".to_string(),
                start_time: utc("2025-07-03T02:30:00Z"),
                status: "open".to_string(),
                distance_m: Some(1600),
                track_condition: Some("good".to_string()),
                weather: Some("fine".to_string()),
            },
            entrants: vec![
                entrant_payload(
                    "e1",
                    1,
                    Some(EntrantOddsPayload {
                        fixed_win: Some(3.4),
                        fixed_place: Some(1.5),
                    }),
                ),
                entrant_payload(
                    "e2",
                    2,
                    Some(EntrantOddsPayload {
                        fixed_win: Some(0.0), // sentinel: no price yet
                        fixed_place: None,
                    }),
                ),
            ],
            money_tracker: Some(MoneyTrackerPayload {
                entrants: vec![EntrantMoneyPayload {
                    entrant_id: "e1".to_string(),
                    pools: BTreeMap::from([
                        ("win".to_string(), 1200.0),
                        ("place".to_string(), 300.0),
                    ]),
                    hold_percentage: Some(12.5),
                }],
            }),
            pools: vec![
                PoolTotalPayload {
                    pool_type: "win".to_string(),
                    total: 15_000.0,
                    currency: "$".to_string(),
                    last_updated: None,
                },
                PoolTotalPayload {
                    pool_type: "duet".to_string(), // untracked pool kind
                    total: 99.0,
                    currency: "$".to_string(),
                    last_updated: None,
                },
            ],
        }
    }

    fn ctx(now: &str) -> TransformContext {
        TransformContext {
            now: utc(now),
            previous: None,
        }
    }

    #[test]
    fn meetings_filtered_by_id_and_race_type() {
        let date = "2025-07-03".parse().unwrap();
        let meetings = transform_meetings(
            &[
                meeting_payload(Some("m1"), "thoroughbred"),
                meeting_payload(Some("m2"), "greyhound"),
                meeting_payload(None, "harness"),
                meeting_payload(Some("m3"), "harness"),
            ],
            date,
        );
        let ids: Vec<_> = meetings.iter().map(|m| m.meeting_id.as_str()).collect();
        assert_eq!(ids, vec!["m1", "m3"]);
    }

    #[test]
    fn unparseable_meeting_date_falls_back_to_racing_date() {
        let date: NaiveDate = "2025-07-03".parse().unwrap();
        let mut payload = meeting_payload(Some("m1"), "harness");
        payload.date = "not-a-date".to_string();
        let meetings = transform_meetings(&[payload], date);
        assert_eq!(meetings[0].date, date);
    }

    #[test]
    fn sentinel_odds_emit_no_events() {
        let out = transform_race(&race_payload(), &ctx("2025-07-03T02:10:00Z")).unwrap();
        // e1 win + e1 place only; e2's zero win and absent place are skipped
        assert_eq!(out.odds_events.len(), 2);
        assert!(out.odds_events.iter().all(|e| e.entrant_id == "e1"));
        // but e2 is still an entrant, with no stored odds
        let e2 = out.entrants.iter().find(|e| e.entrant_id == "e2").unwrap();
        assert_eq!(e2.win_odds, None);
    }

    #[test]
    fn duplicate_entrants_keep_first() {
        let mut payload = race_payload();
        payload.entrants.push(entrant_payload(
            "e1",
            7,
            Some(EntrantOddsPayload {
                fixed_win: Some(9.9),
                fixed_place: None,
            }),
        ));
        let out = transform_race(&payload, &ctx("2025-07-03T02:10:00Z")).unwrap();
        assert_eq!(out.entrants.len(), 2);
        let e1 = out.entrants.iter().find(|e| e.entrant_id == "e1").unwrap();
        assert_eq!(e1.runner_number, 1);
    }

    #[test]
    fn unknown_pool_types_are_dropped() {
        let out = transform_race(&race_payload(), &ctx("2025-07-03T02:10:00Z")).unwrap();
        assert_eq!(out.pools.len(), 1);
        assert_eq!(out.pools[0].pool_type, PoolType::Win);
    }

    #[test]
    fn first_sample_has_no_deltas() {
        let out = transform_race(&race_payload(), &ctx("2025-07-03T02:10:00Z")).unwrap();
        assert_eq!(out.money_flow_events.len(), 1);
        assert!(out.money_flow_events[0].deltas.is_none());
        assert_eq!(
            out.money_flow_events[0].pool_amounts.get(&PoolType::Win),
            Some(&1200.0)
        );
    }

    #[test]
    fn deltas_computed_against_previous_totals() {
        let first = transform_race(&race_payload(), &ctx("2025-07-03T02:10:00Z")).unwrap();

        let mut next_payload = race_payload();
        if let Some(tracker) = next_payload.money_tracker.as_mut() {
            tracker.entrants[0]
                .pools
                .insert("win".to_string(), 1500.0);
        }
        let next = transform_race(
            &next_payload,
            &TransformContext {
                now: utc("2025-07-03T02:10:30Z"),
                previous: Some(first.totals),
            },
        )
        .unwrap();

        let deltas = next.money_flow_events[0].deltas.as_ref().unwrap();
        assert_eq!(deltas.get(&PoolType::Win), Some(&300.0));
        assert_eq!(deltas.get(&PoolType::Place), Some(&0.0));
    }

    #[test]
    fn bucket_reflects_time_to_start() {
        // 20 minutes before start
        let out = transform_race(&race_payload(), &ctx("2025-07-03T02:10:00Z")).unwrap();
        assert_eq!(
            out.money_flow_events[0].time_to_start_bucket,
            TimeToStartBucket::M30
        );
        // 30 seconds after start
        let out = transform_race(&race_payload(), &ctx("2025-07-03T02:30:30Z")).unwrap();
        assert_eq!(
            out.money_flow_events[0].time_to_start_bucket,
            TimeToStartBucket::PostStart
        );
    }

    #[test]
    fn unknown_status_is_rejected() {
        let mut payload = race_payload();
        payload.race.status = "paused".to_string();
        let err = transform_race(&payload, &ctx("2025-07-03T02:10:00Z")).unwrap_err();
        assert!(matches!(err, TransformError::InvalidStatus { .. }));
    }

    #[test]
    fn money_tracker_rows_for_unknown_entrants_are_skipped() {
        let mut payload = race_payload();
        if let Some(tracker) = payload.money_tracker.as_mut() {
            tracker.entrants.push(EntrantMoneyPayload {
                entrant_id: "ghost".to_string(),
                pools: BTreeMap::from([("win".to_string(), 42.0)]),
                hold_percentage: None,
            });
        }
        let out = transform_race(&payload, &ctx("2025-07-03T02:10:00Z")).unwrap();
        assert_eq!(out.money_flow_events.len(), 1);
        assert_eq!(out.money_flow_events[0].entrant_id, "e1");
    }
}

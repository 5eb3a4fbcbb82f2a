//! fetch_active_races returns only pollable races inside the 24h window,
//! soonest first.
//!
//! Requires a live PostgreSQL instance reachable via RACEDAY_DATABASE_URL.

use chrono::{Duration, Utc};
use uuid::Uuid;

use raceday_db::{bulk_upsert_meetings, bulk_upsert_races, fetch_active_races, testkit_pool};
use raceday_schemas::{Meeting, Race, RaceStatus, RaceType};

#[tokio::test]
#[ignore = "requires RACEDAY_DATABASE_URL"]
async fn window_filters_status_and_start_time() {
    let pool = testkit_pool().await.expect("connect + migrate");
    let now = Utc::now();
    let tag = Uuid::new_v4();
    let mid = format!("m-{tag}");

    bulk_upsert_meetings(
        &pool,
        &[Meeting {
            meeting_id: mid.clone(),
            name: "Test Park".to_string(),
            country: "NZ".to_string(),
            race_type: RaceType::Harness,
            category_code: None,
            date: now.date_naive(),
        }],
    )
    .await
    .unwrap();

    let race = |n: i32, start, status| Race {
        race_id: format!("r{n}-{tag}"),
        meeting_id: mid.clone(),
        race_number: n,
        name: format!("Race {n}"),
        start_time: start,
        status,
        distance_m: None,
        track_condition: None,
        weather: None,
    };

    bulk_upsert_races(
        &pool,
        &[
            race(1, now + Duration::hours(2), RaceStatus::Open),
            race(2, now + Duration::minutes(10), RaceStatus::Upcoming),
            race(3, now + Duration::hours(25), RaceStatus::Open), // beyond window
            race(4, now - Duration::minutes(5), RaceStatus::Open), // started, still open
            race(5, now + Duration::hours(1), RaceStatus::Final), // terminal
            race(6, now - Duration::hours(2), RaceStatus::Open), // started too long ago
        ],
    )
    .await
    .unwrap();

    let active = fetch_active_races(&pool, now).await.unwrap();
    let mine: Vec<_> = active
        .iter()
        .filter(|r| r.race_id.ends_with(&tag.to_string()))
        .collect();

    assert_eq!(mine.len(), 3);
    // soonest first, and the recently started race is discovered
    assert_eq!(mine[0].race_id, format!("r4-{tag}"));
    assert_eq!(mine[1].race_id, format!("r2-{tag}"));
    assert_eq!(mine[2].race_id, format!("r1-{tag}"));
}

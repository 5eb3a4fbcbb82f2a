//! Leaving the discovery window must not retire a live race. The fake
//! store applies the production filters (status upcoming/open, start in
//! [now - 1h, now + 24h)), so a race that starts, or moves to closed or
//! interim, vanishes from discovery exactly as it would in production —
//! and must keep polling at the fast cadence until it turns final.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use raceday_clock::FixedClock;
use raceday_db::ActiveRace;
use raceday_pipeline::{ProcessCounts, ProcessOutcome, ProcessRace};
use raceday_scheduler::{ActiveRaceSource, RaceScheduler, SchedulerConfig};
use raceday_schemas::RaceStatus;

type RaceMap = Arc<Mutex<HashMap<String, ActiveRace>>>;

/// Mirrors the production discovery query over an in-memory race table.
struct WindowedStore {
    races: RaceMap,
}

#[async_trait]
impl ActiveRaceSource for WindowedStore {
    async fn active_races(&self, now: DateTime<Utc>) -> Result<Vec<ActiveRace>> {
        let mut out: Vec<ActiveRace> = self
            .races
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                matches!(r.status, RaceStatus::Upcoming | RaceStatus::Open)
                    && r.start_time >= now - chrono::Duration::hours(1)
                    && r.start_time < now + chrono::Duration::hours(24)
            })
            .cloned()
            .collect();
        out.sort_by_key(|r| r.start_time);
        Ok(out)
    }

    async fn race_status(&self, race_id: &str) -> Result<Option<RaceStatus>> {
        Ok(self.races.lock().unwrap().get(race_id).map(|r| r.status))
    }
}

fn seed(races: &RaceMap, race_id: &str, start: DateTime<Utc>, status: RaceStatus) {
    races.lock().unwrap().insert(
        race_id.to_string(),
        ActiveRace {
            race_id: race_id.to_string(),
            start_time: start,
            status,
        },
    );
}

/// Walks the race through a stored status per poll and writes it back,
/// the way a real poll's guarded upsert would.
struct SequenceProcessor {
    calls: AtomicUsize,
    races: RaceMap,
    sequence: Vec<RaceStatus>,
}

#[async_trait]
impl ProcessRace for SequenceProcessor {
    async fn process_race(&self, race_id: &str) -> Result<ProcessOutcome> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let status = *self
            .sequence
            .get(n)
            .unwrap_or_else(|| self.sequence.last().expect("sequence is non-empty"));
        if let Some(race) = self.races.lock().unwrap().get_mut(race_id) {
            race.status = status;
        }
        Ok(ProcessOutcome {
            status,
            terminal: status.is_terminal(),
            counts: ProcessCounts::default(),
        })
    }
}

#[tokio::test(start_paused = true)]
async fn race_already_past_start_is_adopted_and_polls_fast() {
    let now = Utc::now();
    let races: RaceMap = Arc::new(Mutex::new(HashMap::new()));
    seed(&races, "r3", now - chrono::Duration::seconds(30), RaceStatus::Open);

    let processor = Arc::new(SequenceProcessor {
        calls: AtomicUsize::new(0),
        races: Arc::clone(&races),
        sequence: vec![RaceStatus::Open],
    });
    let scheduler = RaceScheduler::new(
        SchedulerConfig::default(),
        Arc::new(WindowedStore {
            races: Arc::clone(&races),
        }),
        Arc::clone(&processor) as Arc<dyn ProcessRace>,
        Arc::new(FixedClock::new(now)),
    );
    scheduler.start().await;

    // Adopted despite start_time < now, at the fast cadence.
    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(processor.calls.load(Ordering::SeqCst), 2);

    // Reconciliation cycles pass; the open race keeps ticking.
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(processor.calls.load(Ordering::SeqCst), 6);
    assert_eq!(scheduler.snapshot().await.active_races, 1);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn closed_race_survives_reconciliation_until_final() {
    let now = Utc::now();
    let races: RaceMap = Arc::new(Mutex::new(HashMap::new()));
    seed(&races, "r1", now - chrono::Duration::seconds(30), RaceStatus::Open);

    // closed for the first polls (photo finish), interim once the placings
    // post, then final. The race leaves the discovery window at the first
    // closed poll, long before the 60s reconciliation.
    let processor = Arc::new(SequenceProcessor {
        calls: AtomicUsize::new(0),
        races: Arc::clone(&races),
        sequence: vec![
            RaceStatus::Closed,
            RaceStatus::Closed,
            RaceStatus::Closed,
            RaceStatus::Closed,
            RaceStatus::Interim,
            RaceStatus::Final,
        ],
    });
    let scheduler = RaceScheduler::new(
        SchedulerConfig::default(),
        Arc::new(WindowedStore {
            races: Arc::clone(&races),
        }),
        Arc::clone(&processor) as Arc<dyn ProcessRace>,
        Arc::new(FixedClock::new(now)),
    );
    scheduler.start().await;

    // Ticks at 15..90s; the reconciliation at 60s sees the race outside
    // the window with stored status closed and must leave it alone.
    tokio::time::sleep(Duration::from_secs(70)).await;
    assert!(
        processor.calls.load(Ordering::SeqCst) >= 4,
        "polling must continue through closed, got {} calls",
        processor.calls.load(Ordering::SeqCst)
    );
    assert_eq!(
        scheduler.snapshot().await.active_races,
        1,
        "closed race must not be retired by reconciliation"
    );

    // The sixth poll turns final and retires the race.
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(processor.calls.load(Ordering::SeqCst), 6);
    assert_eq!(scheduler.snapshot().await.active_races, 0);

    // No resurrection on later reconciliations.
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(processor.calls.load(Ordering::SeqCst), 6);

    scheduler.stop().await;
}

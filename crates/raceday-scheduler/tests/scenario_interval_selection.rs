//! The scheduler picks cadence from time-to-start: a race 20 minutes out
//! ticks every 60s; a race 3 minutes out ticks every 15s.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use raceday_clock::FixedClock;
use raceday_db::ActiveRace;
use raceday_pipeline::{ProcessCounts, ProcessOutcome, ProcessRace};
use raceday_scheduler::{ActiveRaceSource, RaceScheduler, SchedulerConfig};
use raceday_schemas::RaceStatus;

struct StaticRaces(Vec<ActiveRace>);

#[async_trait]
impl ActiveRaceSource for StaticRaces {
    async fn active_races(&self, _now: DateTime<Utc>) -> Result<Vec<ActiveRace>> {
        Ok(self.0.clone())
    }
}

struct CountingProcessor {
    calls: AtomicUsize,
}

#[async_trait]
impl ProcessRace for CountingProcessor {
    async fn process_race(&self, _race_id: &str) -> Result<ProcessOutcome> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ProcessOutcome {
            status: RaceStatus::Open,
            terminal: false,
            counts: ProcessCounts::default(),
        })
    }
}

fn open_race(race_id: &str, start: DateTime<Utc>) -> ActiveRace {
    ActiveRace {
        race_id: race_id.to_string(),
        start_time: start,
        status: RaceStatus::Open,
    }
}

#[tokio::test(start_paused = true)]
async fn race_twenty_minutes_out_polls_each_minute() {
    let now = Utc::now();
    let processor = Arc::new(CountingProcessor {
        calls: AtomicUsize::new(0),
    });
    let scheduler = RaceScheduler::new(
        SchedulerConfig::default(),
        Arc::new(StaticRaces(vec![open_race(
            "r1",
            now + chrono::Duration::minutes(20),
        )])),
        Arc::clone(&processor) as Arc<dyn ProcessRace>,
        Arc::new(FixedClock::new(now)),
    );
    scheduler.start().await;

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(processor.calls.load(Ordering::SeqCst), 0, "first tick waits 60s");

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(processor.calls.load(Ordering::SeqCst), 1);

    // Still far out after the poll: the recomputed interval stays 60s.
    tokio::time::sleep(Duration::from_secs(61)).await;
    assert_eq!(processor.calls.load(Ordering::SeqCst), 2);

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn race_three_minutes_out_polls_every_fifteen_seconds() {
    let now = Utc::now();
    let processor = Arc::new(CountingProcessor {
        calls: AtomicUsize::new(0),
    });
    let scheduler = RaceScheduler::new(
        SchedulerConfig::default(),
        Arc::new(StaticRaces(vec![open_race(
            "r2",
            now + chrono::Duration::minutes(3),
        )])),
        Arc::clone(&processor) as Arc<dyn ProcessRace>,
        Arc::new(FixedClock::new(now)),
    );
    scheduler.start().await;

    tokio::time::sleep(Duration::from_secs(16)).await;
    assert_eq!(processor.calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(processor.calls.load(Ordering::SeqCst), 2);

    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(processor.calls.load(Ordering::SeqCst), 3);

    scheduler.stop().await;
}

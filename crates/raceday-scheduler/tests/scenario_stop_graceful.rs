//! Shutdown semantics: start is idempotent, stop waits for the in-flight
//! poll, and nothing fires after stop returns.

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

struct SlowProcessor {
    started: AtomicUsize,
    completed: AtomicUsize,
}

#[async_trait]
impl ProcessRace for SlowProcessor {
    async fn process_race(&self, _race_id: &str) -> Result<ProcessOutcome> {
        self.started.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        self.completed.fetch_add(1, Ordering::SeqCst);
        Ok(ProcessOutcome {
            status: RaceStatus::Open,
            terminal: false,
            counts: ProcessCounts::default(),
        })
    }
}

fn scheduler_with(processor: Arc<SlowProcessor>) -> RaceScheduler {
    let now = Utc::now();
    RaceScheduler::new(
        SchedulerConfig::default(),
        Arc::new(StaticRaces(vec![ActiveRace {
            race_id: "r1".to_string(),
            start_time: now + chrono::Duration::minutes(2),
            status: RaceStatus::Open,
        }])),
        processor as Arc<dyn ProcessRace>,
        Arc::new(FixedClock::new(now)),
    )
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_the_in_flight_poll() {
    let processor = Arc::new(SlowProcessor {
        started: AtomicUsize::new(0),
        completed: AtomicUsize::new(0),
    });
    let scheduler = scheduler_with(Arc::clone(&processor));

    scheduler.start().await;
    // second start is a no-op
    scheduler.start().await;
    assert!(scheduler.is_running().await);

    // Let the first tick fire and get mid-poll (tick at 15s, poll runs 5s).
    tokio::time::sleep(Duration::from_secs(17)).await;
    assert_eq!(processor.started.load(Ordering::SeqCst), 1);
    assert_eq!(processor.completed.load(Ordering::SeqCst), 0);

    scheduler.stop().await;
    assert!(!scheduler.is_running().await);
    // The in-flight poll was allowed to finish inside the 10s grace.
    assert_eq!(processor.completed.load(Ordering::SeqCst), 1);

    // Long after stop: no timers survive shutdown.
    tokio::time::sleep(Duration::from_secs(300)).await;
    assert_eq!(processor.started.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_before_start_is_a_no_op() {
    let processor = Arc::new(SlowProcessor {
        started: AtomicUsize::new(0),
        completed: AtomicUsize::new(0),
    });
    let scheduler = scheduler_with(Arc::clone(&processor));

    scheduler.stop().await;
    assert!(!scheduler.is_running().await);
    assert_eq!(scheduler.snapshot().await.polls_executed, 0);
}

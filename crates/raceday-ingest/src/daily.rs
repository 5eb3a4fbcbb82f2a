//! Daily initialization: seed the store with the racing day's meetings,
//! races, and entrants before the scheduler starts polling.
//!
//! Reentrant by construction: concurrent triggers join the in-flight run
//! and receive its result instead of starting a second sweep.

use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use sqlx::PgPool;
use tokio::sync::Mutex;

use raceday_clock::{nz_date, Clock};
use raceday_db::{
    bulk_upsert_entrants, bulk_upsert_meetings, bulk_upsert_pools, bulk_upsert_races,
};
use raceday_schemas::{Entrant, Race, RacePool};
use raceday_transform::{transform_meetings, transform_race, TransformContext};
use raceday_upstream::RacingApi;

/// Meetings whose races are fetched concurrently.
pub const DEFAULT_MEETING_CONCURRENCY: usize = 4;

/// Outcome of one initialization sweep, logged and returned to triggers.
#[derive(Debug, Clone, Serialize)]
pub struct DailyInitStats {
    pub racing_date: NaiveDate,
    pub meetings_fetched: usize,
    pub meetings_written: u64,
    pub races_fetched: usize,
    pub races_written: u64,
    pub entrants_written: u64,
    pub pools_written: u64,
    /// Transient upstream retries observed while the sweep ran (delta of
    /// the client's process-wide retry counter).
    pub retries: u64,
    /// Races whose fetch or transform failed this run. Their siblings are
    /// unaffected; the scheduler's polls may still recover them later.
    pub failed_races: Vec<String>,
    pub duration_ms: u64,
}

type SharedRun = Shared<BoxFuture<'static, Arc<Result<DailyInitStats>>>>;

pub struct DailyInitializer {
    api: Arc<dyn RacingApi>,
    pool: PgPool,
    clock: Arc<dyn Clock>,
    meeting_concurrency: usize,
    in_flight: Mutex<Option<(u64, SharedRun)>>,
    generation: std::sync::atomic::AtomicU64,
}

impl DailyInitializer {
    pub fn new(api: Arc<dyn RacingApi>, pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            api,
            pool,
            clock,
            meeting_concurrency: DEFAULT_MEETING_CONCURRENCY,
            in_flight: Mutex::new(None),
            generation: std::sync::atomic::AtomicU64::new(0),
        }
    }

    pub fn with_meeting_concurrency(mut self, k: usize) -> Self {
        self.meeting_concurrency = k.max(1);
        self
    }

    /// Run (or join) a daily initialization sweep.
    pub async fn run(&self) -> Arc<Result<DailyInitStats>> {
        let (generation, fut) = {
            let mut guard = self.in_flight.lock().await;
            if let Some((generation, fut)) = guard.as_ref() {
                tracing::info!("daily init already in progress, joining in-flight run");
                (*generation, fut.clone())
            } else {
                let generation = self
                    .generation
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                let fut = run_sweep(
                    Arc::clone(&self.api),
                    self.pool.clone(),
                    Arc::clone(&self.clock),
                    self.meeting_concurrency,
                )
                .map(Arc::new)
                .boxed()
                .shared();
                *guard = Some((generation, fut.clone()));
                (generation, fut)
            }
        };

        let result = fut.await;

        // Only the run that was actually awaited clears its own slot;
        // a newer run's slot is left untouched.
        let mut guard = self.in_flight.lock().await;
        if matches!(guard.as_ref(), Some((g, _)) if *g == generation) {
            *guard = None;
        }
        result
    }
}

async fn run_sweep(
    api: Arc<dyn RacingApi>,
    pool: PgPool,
    clock: Arc<dyn Clock>,
    meeting_concurrency: usize,
) -> Result<DailyInitStats> {
    let started = Instant::now();
    let retries_before = api.retries_total();
    let racing_date = nz_date(clock.now());
    tracing::info!(date = %racing_date, "daily init starting");

    let payloads = api
        .fetch_meetings(racing_date)
        .await
        .with_context(|| format!("fetch meetings for {racing_date}"))?;
    let meetings_fetched = payloads.len();

    let meetings = transform_meetings(&payloads, racing_date);
    let meetings_written = bulk_upsert_meetings(&pool, &meetings).await?;

    // Per-meeting race sweeps, at most `meeting_concurrency` in parallel.
    // A failed race is recorded and skipped; its siblings proceed.
    let kept: std::collections::HashSet<&str> =
        meetings.iter().map(|m| m.meeting_id.as_str()).collect();
    let mut sweeps: Vec<BoxFuture<'_, MeetingSweep>> = Vec::new();
    for p in payloads.iter() {
        let keep = p
            .meeting_id
            .as_deref()
            .map(|id| kept.contains(id))
            .unwrap_or(false);
        if keep {
            sweeps.push(sweep_meeting_races(&api, &clock, p).boxed());
        }
    }
    let results: Vec<MeetingSweep> = stream::iter(sweeps)
        .buffer_unordered(meeting_concurrency)
        .collect()
        .await;

    let mut races: Vec<Race> = Vec::new();
    let mut entrants: Vec<Entrant> = Vec::new();
    let mut pools: Vec<RacePool> = Vec::new();
    let mut failed_races: Vec<String> = Vec::new();
    let mut races_fetched = 0usize;
    for sweep in results {
        races_fetched += sweep.fetched;
        races.extend(sweep.races);
        entrants.extend(sweep.entrants);
        pools.extend(sweep.pools);
        failed_races.extend(sweep.failed);
    }

    // Races before entrants/pools: foreign keys resolve top-down.
    let races_written = bulk_upsert_races(&pool, &races).await?;
    let entrants_written = bulk_upsert_entrants(&pool, &entrants).await?;
    let pools_written = bulk_upsert_pools(&pool, &pools).await?;

    let stats = DailyInitStats {
        racing_date,
        meetings_fetched,
        meetings_written,
        races_fetched,
        races_written,
        entrants_written,
        pools_written,
        retries: api.retries_total().saturating_sub(retries_before),
        failed_races,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    tracing::info!(
        date = %racing_date,
        meetings = stats.meetings_fetched,
        races = stats.races_fetched,
        failed = stats.failed_races.len(),
        retries = stats.retries,
        duration_ms = stats.duration_ms,
        "daily init finished"
    );
    Ok(stats)
}

struct MeetingSweep {
    fetched: usize,
    races: Vec<Race>,
    entrants: Vec<Entrant>,
    pools: Vec<RacePool>,
    failed: Vec<String>,
}

async fn sweep_meeting_races(
    api: &Arc<dyn RacingApi>,
    clock: &Arc<dyn Clock>,
    meeting: &raceday_upstream::MeetingPayload,
) -> MeetingSweep {
    let mut sweep = MeetingSweep {
        fetched: 0,
        races: Vec::new(),
        entrants: Vec::new(),
        pools: Vec::new(),
        failed: Vec::new(),
    };

    for summary in &meeting.races {
        sweep.fetched += 1;
        let payload = match api.fetch_race(&summary.race_id).await {
            Ok(p) => p,
            Err(err) => {
                tracing::warn!(race_id = %summary.race_id, error = %err, "daily init race fetch failed");
                sweep.failed.push(summary.race_id.clone());
                continue;
            }
        };
        let ctx = TransformContext {
            now: clock.now(),
            previous: None,
        };
        match transform_race(&payload, &ctx) {
            Ok(t) => {
                sweep.races.push(t.race);
                sweep.entrants.extend(t.entrants);
                sweep.pools.extend(t.pools);
            }
            Err(err) => {
                tracing::warn!(race_id = %summary.race_id, error = %err, "daily init transform failed");
                sweep.failed.push(summary.race_id.clone());
            }
        }
    }

    sweep
}

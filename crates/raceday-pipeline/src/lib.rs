//! One end-to-end race poll: fetch -> transform -> store.
//!
//! State-table writes happen in a single transaction; history appends run
//! outside it so contention on the keyed tables can never roll back
//! already-valid samples. Replaying an identical snapshot is a no-op at
//! the store (natural-key conflicts), which is what makes tick retries
//! safe.

use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::PgPool;

use raceday_clock::Clock;
use raceday_db::{
    append_money_flow_events, append_odds_events, upsert_race_snapshot, with_store_retry,
};
use raceday_schemas::RaceStatus;
use raceday_transform::{transform_race, TransformContext};
use raceday_upstream::RacingApi;

pub mod cache;

pub use cache::SnapshotCache;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessCounts {
    pub entrants: usize,
    pub odds_events: u64,
    pub money_flow_events: u64,
}

/// What one poll produced, reported back to the scheduler.
#[derive(Debug, Clone, Copy)]
pub struct ProcessOutcome {
    pub status: RaceStatus,
    pub terminal: bool,
    pub counts: ProcessCounts,
}

/// Seam the scheduler drives. The production implementation is
/// [`RaceProcessor`]; scheduler tests substitute fakes.
#[async_trait]
pub trait ProcessRace: Send + Sync {
    async fn process_race(&self, race_id: &str) -> Result<ProcessOutcome>;
}

// ---------------------------------------------------------------------------
// RaceProcessor
// ---------------------------------------------------------------------------

pub struct RaceProcessor {
    api: Arc<dyn RacingApi>,
    pool: PgPool,
    clock: Arc<dyn Clock>,
    cache: SnapshotCache,
}

impl RaceProcessor {
    pub fn new(api: Arc<dyn RacingApi>, pool: PgPool, clock: Arc<dyn Clock>) -> Self {
        Self {
            api,
            pool,
            clock,
            cache: SnapshotCache::default(),
        }
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache = SnapshotCache::new(capacity);
        self
    }

    async fn run(&self, race_id: &str) -> Result<ProcessOutcome> {
        let payload = self
            .api
            .fetch_race(race_id)
            .await
            .with_context(|| format!("fetch race {race_id}"))?;

        let ctx = TransformContext {
            now: self.clock.now(),
            previous: self.cache.get(race_id),
        };
        let transformed = transform_race(&payload, &ctx)
            .with_context(|| format!("transform race {race_id}"))?;

        // Keyed state first, atomically.
        with_store_retry("race snapshot upsert", || {
            upsert_race_snapshot(
                &self.pool,
                &transformed.race,
                &transformed.entrants,
                &transformed.pools,
            )
        })
        .await?;

        // History outside the transaction. Both appends skip natural-key
        // conflicts, so a partially-failed tick that re-runs writes each
        // sample exactly once.
        let odds_written = with_store_retry("odds append", || {
            append_odds_events(&self.pool, &transformed.odds_events)
        })
        .await?;
        let money_written = with_store_retry("money flow append", || {
            append_money_flow_events(&self.pool, &transformed.money_flow_events)
        })
        .await?;

        let status = transformed.race.status;
        if status.is_terminal() {
            self.cache.invalidate(race_id);
        } else {
            self.cache.put(race_id, transformed.totals.clone());
        }

        tracing::debug!(
            race_id,
            status = status.as_str(),
            entrants = transformed.entrants.len(),
            odds = odds_written,
            money_flow = money_written,
            "race poll stored"
        );

        Ok(ProcessOutcome {
            status,
            terminal: status.is_terminal(),
            counts: ProcessCounts {
                entrants: transformed.entrants.len(),
                odds_events: odds_written,
                money_flow_events: money_written,
            },
        })
    }
}

#[async_trait]
impl ProcessRace for RaceProcessor {
    async fn process_race(&self, race_id: &str) -> Result<ProcessOutcome> {
        self.run(race_id).await
    }
}

//! Shared runtime state for the daemon's HTTP handlers.

use std::sync::Arc;

use serde::Serialize;
use sqlx::PgPool;

use raceday_scheduler::RaceScheduler;

/// Static build metadata included in status responses.
#[derive(Clone, Debug, Serialize)]
pub struct BuildInfo {
    pub service: &'static str,
    pub version: &'static str,
}

/// Cloneable (Arc) handle shared across all Axum handlers.
pub struct AppState {
    pub pool: PgPool,
    pub scheduler: Arc<RaceScheduler>,
    pub build: BuildInfo,
}

impl AppState {
    pub fn new(pool: PgPool, scheduler: Arc<RaceScheduler>) -> Self {
        Self {
            pool,
            scheduler,
            build: BuildInfo {
                service: "raceday-daemon",
                version: env!("CARGO_PKG_VERSION"),
            },
        }
    }
}

/// Monotonically increasing uptime since first call (process lifetime).
pub fn uptime_secs() -> u64 {
    static START: std::sync::OnceLock<std::time::Instant> = std::sync::OnceLock::new();
    START
        .get_or_init(std::time::Instant::now)
        .elapsed()
        .as_secs()
}

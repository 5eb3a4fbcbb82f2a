//! Daily initialization and partition maintenance for the racing day.

pub mod daily;
pub mod partitions;

pub use daily::{DailyInitStats, DailyInitializer, DEFAULT_MEETING_CONCURRENCY};
pub use partitions::{
    create_startup_partitions, create_tomorrow_partitions, run_partition_maintainer,
    MAINTENANCE_HOUR, MAINTENANCE_MINUTE,
};

use std::sync::Arc;

use raceday_clock::{next_nz_wall_clock, Clock};

/// NZ wall-clock times at which the daily initializer re-runs (early
/// morning before the first meetings, and evening for late cards).
pub const DAILY_INIT_TIMES: [(u32, u32); 2] = [(6, 30), (18, 30)];

/// Long-running task: trigger the daily initializer at each configured NZ
/// wall-clock time. The daemon aborts the task on shutdown.
pub async fn run_daily_schedule(init: Arc<DailyInitializer>, clock: Arc<dyn Clock>) {
    loop {
        let now = clock.now();
        let next = DAILY_INIT_TIMES
            .iter()
            .filter_map(|(h, m)| next_nz_wall_clock(now, *h, *m).ok())
            .min();
        let Some(next) = next else {
            tracing::error!("cannot schedule daily init");
            return;
        };
        let wait = (next - now).to_std().unwrap_or_default();
        tracing::debug!(at = %next, wait_secs = wait.as_secs(), "next daily init");
        tokio::time::sleep(wait).await;

        if let Err(err) = init.run().await.as_ref() {
            tracing::error!(error = %err, "scheduled daily init failed");
        }
    }
}

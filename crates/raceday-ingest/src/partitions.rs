//! Partition maintenance for the history tables.
//!
//! Tomorrow's partitions are created well before NZ midnight so the first
//! post-rollover append never has to take the recovery path. Failures are
//! logged and surfaced to the caller; they never crash the process.

use anyhow::{anyhow, Context, Result};
use sqlx::PgPool;
use std::sync::Arc;

use raceday_clock::{next_nz_wall_clock, nz_date, Clock};
use raceday_db::{ensure_partition, HistoryTable};

/// NZ wall-clock time of the nightly partition run.
pub const MAINTENANCE_HOUR: u32 = 22;
pub const MAINTENANCE_MINUTE: u32 = 0;

/// Create partitions for tomorrow's NZ date on every history table.
/// Idempotent: existing partitions are left alone.
pub async fn create_tomorrow_partitions(pool: &PgPool, clock: &dyn Clock) -> Result<()> {
    let today = nz_date(clock.now());
    let tomorrow = today
        .succ_opt()
        .ok_or_else(|| anyhow!("date overflow past {today}"))?;
    for table in HistoryTable::ALL {
        ensure_partition(pool, table, tomorrow)
            .await
            .with_context(|| format!("create tomorrow's {} partition", table.table_name()))?;
    }
    tracing::info!(date = %tomorrow, "tomorrow's history partitions ready");
    Ok(())
}

/// Startup variant: make sure today's and tomorrow's partitions exist so
/// the first polls and the day rollover are both covered.
pub async fn create_startup_partitions(pool: &PgPool, clock: &dyn Clock) -> Result<()> {
    let today = nz_date(clock.now());
    for table in HistoryTable::ALL {
        ensure_partition(pool, table, today)
            .await
            .with_context(|| format!("create today's {} partition", table.table_name()))?;
    }
    create_tomorrow_partitions(pool, clock).await
}

/// Long-running task: wake at [`MAINTENANCE_HOUR`]:[`MAINTENANCE_MINUTE`]
/// NZ each day and create tomorrow's partitions. The daemon aborts the
/// task on shutdown.
pub async fn run_partition_maintainer(pool: PgPool, clock: Arc<dyn Clock>) {
    loop {
        let now = clock.now();
        let next = match next_nz_wall_clock(now, MAINTENANCE_HOUR, MAINTENANCE_MINUTE) {
            Ok(next) => next,
            Err(err) => {
                tracing::error!(error = %err, "cannot schedule partition maintenance");
                return;
            }
        };
        let wait = (next - now).to_std().unwrap_or_default();
        tracing::debug!(at = %next, wait_secs = wait.as_secs(), "next partition maintenance");
        tokio::time::sleep(wait).await;

        if let Err(err) = create_tomorrow_partitions(&pool, clock.as_ref()).await {
            tracing::error!(error = %err, "partition maintenance failed, will retry tomorrow");
        }
    }
}

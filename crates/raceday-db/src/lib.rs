//! PostgreSQL store for raceday.
//!
//! Owns the one process-wide connection pool. Keyed state (meetings,
//! races, entrants, pools) lives in [`state`]; append-only partitioned
//! history lives in [`history`].

use std::time::Duration;

use anyhow::{Context, Result};
use sqlx::{postgres::PgPoolOptions, PgPool};

pub mod history;
pub mod state;

pub use history::{
    append_money_flow_events, append_odds_events, ensure_partition, partition_exists, HistoryTable,
};
pub use state::{
    bulk_upsert_entrants, bulk_upsert_meetings, bulk_upsert_pools, bulk_upsert_races,
    fetch_active_races, fetch_race_status, upsert_race_snapshot, ActiveRace,
};

pub const ENV_DB_URL: &str = "RACEDAY_DATABASE_URL";

/// Per-statement server-side timeout applied to every pooled connection.
const STATEMENT_TIMEOUT: &str = "15s";

/// Build the process-wide pool.
///
/// Warm minimum of 2, 30s idle reap, 2s acquire deadline: a stalled pool
/// turns into a fast acquire error (and a 503 from /health) instead of a
/// pile-up of waiting ticks.
pub async fn connect(cfg: &raceday_config::DbConfig) -> Result<PgPool> {
    connect_url(&cfg.database_url(), cfg.pool_max).await
}

/// Connect using RACEDAY_DATABASE_URL (tests and tooling).
pub async fn connect_from_env() -> Result<PgPool> {
    let url = std::env::var(ENV_DB_URL).with_context(|| format!("missing env var {ENV_DB_URL}"))?;
    connect_url(&url, 10).await
}

async fn connect_url(url: &str, max_connections: u32) -> Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(max_connections)
        .min_connections(2)
        .idle_timeout(Duration::from_secs(30))
        .acquire_timeout(Duration::from_secs(2))
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                sqlx::query(&format!("set statement_timeout = '{STATEMENT_TIMEOUT}'"))
                    .execute(&mut *conn)
                    .await?;
                Ok(())
            })
        })
        .connect(url)
        .await
        .context("failed to connect to Postgres")?;
    Ok(pool)
}

/// Test helper: connect via RACEDAY_DATABASE_URL and apply migrations.
pub async fn testkit_pool() -> Result<PgPool> {
    let pool = connect_from_env().await?;
    migrate(&pool).await?;
    Ok(pool)
}

/// Run embedded SQLx migrations. Tests and the migrations runner use this;
/// the daemon assumes an already-migrated store.
pub async fn migrate(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("db migrate failed")?;
    Ok(())
}

/// Connectivity probe for the health endpoint. Bounded by the pool's 2s
/// acquire timeout, so sustained pool exhaustion surfaces here.
pub async fn health_check(pool: &PgPool) -> Result<()> {
    let (one,): (i32,) = sqlx::query_as("select 1")
        .fetch_one(pool)
        .await
        .context("health connectivity query failed")?;
    anyhow::ensure!(one == 1, "health query returned {one}");
    Ok(())
}

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Deadlocks (40P01) and serialization failures (40001) are worth a retry;
/// everything else is surfaced as-is.
pub fn is_transient_db_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            matches!(db_err.code().as_deref(), Some("40001") | Some("40P01"))
        }
        sqlx::Error::PoolTimedOut => true,
        _ => false,
    }
}

/// Routing failure on a partitioned table: no child covers the row
/// (SQLSTATE 23514). Recovered by creating the partition and retrying once.
pub fn is_partition_missing(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23514")
                && db_err.message().contains("no partition of relation")
        }
        _ => false,
    }
}

pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("23505"),
        _ => false,
    }
}

/// Backoff schedule for transient store errors: up to 3 retries.
const STORE_RETRY_DELAYS: [Duration; 3] = [
    Duration::from_millis(100),
    Duration::from_millis(250),
    Duration::from_millis(500),
];

/// Run `op`, retrying transient database errors up to 3 times with
/// 100/250/500 ms backoff. Non-transient errors surface immediately.
pub async fn with_store_retry<T, F, Fut>(what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T>>,
{
    let mut attempt = 0usize;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                let transient = err
                    .downcast_ref::<sqlx::Error>()
                    .map(is_transient_db_error)
                    .unwrap_or(false);
                if !transient || attempt >= STORE_RETRY_DELAYS.len() {
                    return Err(err);
                }
                let delay = STORE_RETRY_DELAYS[attempt];
                tracing::warn!(
                    what,
                    attempt = attempt + 1,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "retrying transient store failure"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test(start_paused = true)]
    async fn store_retry_gives_up_after_three_retries() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_store_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::Error::new(sqlx::Error::PoolTimedOut)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 4, "initial attempt + 3 retries");
    }

    #[tokio::test(start_paused = true)]
    async fn store_retry_passes_through_non_transient_errors() {
        let calls = AtomicU32::new(0);
        let result: Result<()> = with_store_retry("test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err(anyhow::anyhow!("schema violation")) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn store_retry_recovers_on_later_success() {
        let calls = AtomicU32::new(0);
        let result = with_store_retry("test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n == 0 {
                    Err(anyhow::Error::new(sqlx::Error::PoolTimedOut))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 1);
    }
}

//! Append-only history writes into NZ-date range partitions.
//!
//! `ensure_partition` is idempotent; the append functions recover from a
//! missing partition once (ensure, retry) so a poll that lands just after
//! NZ midnight cannot fail on a day the maintainer has not reached yet.
//! Replayed samples conflict on the natural key and are skipped — there is
//! no UPDATE or DELETE path for history rows.

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, QueryBuilder};

use raceday_clock::{nz_date, nz_day_bounds, partition_suffix};
use raceday_schemas::{MoneyFlowEvent, OddsEvent};

use crate::is_partition_missing;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryTable {
    Odds,
    MoneyFlow,
}

impl HistoryTable {
    pub fn table_name(&self) -> &'static str {
        match self {
            HistoryTable::Odds => "odds_history",
            HistoryTable::MoneyFlow => "money_flow_history",
        }
    }

    pub const ALL: [HistoryTable; 2] = [HistoryTable::Odds, HistoryTable::MoneyFlow];
}

/// Create the child partition covering one NZ date. Safe to call
/// repeatedly and concurrently; "already exists" is success.
pub async fn ensure_partition(pool: &PgPool, table: HistoryTable, date: NaiveDate) -> Result<()> {
    let parent = table.table_name();
    let child = format!("{parent}_{}", partition_suffix(date));
    let (start, end) = nz_day_bounds(date)?;

    // DDL cannot take bind parameters; both identifiers are built from a
    // fixed table name and a formatted date, and the bounds are RFC3339.
    let sql = format!(
        "create table if not exists {child} partition of {parent} \
         for values from ('{}') to ('{}')",
        start.to_rfc3339(),
        end.to_rfc3339()
    );

    match sqlx::query(&sql).execute(pool).await {
        Ok(_) => Ok(()),
        // Concurrent creators can still race past IF NOT EXISTS.
        Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("42P07") => Ok(()),
        Err(err) => Err(err).with_context(|| format!("create partition {child}")),
    }
}

/// True when the child partition for `date` exists.
pub async fn partition_exists(pool: &PgPool, table: HistoryTable, date: NaiveDate) -> Result<bool> {
    let child = format!("{}_{}", table.table_name(), partition_suffix(date));
    let (exists,): (bool,) = sqlx::query_as("select to_regclass($1) is not null")
        .bind(&child)
        .fetch_one(pool)
        .await
        .with_context(|| format!("partition_exists({child})"))?;
    Ok(exists)
}

/// Append odds samples. Returns the number of rows actually inserted;
/// replayed samples conflict on the natural key and count zero.
pub async fn append_odds_events(pool: &PgPool, events: &[OddsEvent]) -> Result<u64> {
    if events.is_empty() {
        return Ok(0);
    }
    match insert_odds(pool, events).await {
        Ok(n) => Ok(n),
        Err(err) if is_partition_missing(&err) => {
            recover_partitions(pool, HistoryTable::Odds, events.iter().map(|e| e.event_timestamp))
                .await?;
            insert_odds(pool, events).await.context("append_odds_events retry failed")
        }
        Err(err) => Err(err).context("append_odds_events failed"),
    }
}

/// Append money-flow samples; same idempotence contract as odds.
pub async fn append_money_flow_events(pool: &PgPool, events: &[MoneyFlowEvent]) -> Result<u64> {
    if events.is_empty() {
        return Ok(0);
    }

    // Serialize the per-pool maps up front; PoolType unit variants become
    // plain string keys.
    let mut rows = Vec::with_capacity(events.len());
    for e in events {
        let amounts =
            serde_json::to_value(&e.pool_amounts).context("serialize pool_amounts failed")?;
        let deltas = e
            .deltas
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .context("serialize deltas failed")?;
        rows.push((e, amounts, deltas));
    }

    match insert_money_flow(pool, &rows).await {
        Ok(n) => Ok(n),
        Err(err) if is_partition_missing(&err) => {
            recover_partitions(
                pool,
                HistoryTable::MoneyFlow,
                events.iter().map(|e| e.event_timestamp),
            )
            .await?;
            insert_money_flow(pool, &rows)
                .await
                .context("append_money_flow_events retry failed")
        }
        Err(err) => Err(err).context("append_money_flow_events failed"),
    }
}

async fn insert_odds(pool: &PgPool, events: &[OddsEvent]) -> Result<u64, sqlx::Error> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "insert into odds_history (entrant_id, race_id, event_timestamp, pool_type, odds) ",
    );
    qb.push_values(events, |mut b, e| {
        b.push_bind(&e.entrant_id)
            .push_bind(&e.race_id)
            .push_bind(e.event_timestamp)
            .push_bind(e.pool_type.as_str())
            .push_bind(e.odds);
    });
    qb.push(" on conflict do nothing");
    let res = qb.build().execute(pool).await?;
    Ok(res.rows_affected())
}

type MoneyFlowRow<'a> = (&'a MoneyFlowEvent, serde_json::Value, Option<serde_json::Value>);

async fn insert_money_flow(pool: &PgPool, rows: &[MoneyFlowRow<'_>]) -> Result<u64, sqlx::Error> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "insert into money_flow_history (entrant_id, race_id, event_timestamp, \
         time_to_start_bucket, pool_amounts, deltas, hold_percentage) ",
    );
    qb.push_values(rows, |mut b, (e, amounts, deltas)| {
        b.push_bind(&e.entrant_id)
            .push_bind(&e.race_id)
            .push_bind(e.event_timestamp)
            .push_bind(e.time_to_start_bucket.as_str())
            .push_bind(amounts)
            .push_bind(deltas)
            .push_bind(e.hold_percentage);
    });
    qb.push(" on conflict do nothing");
    let res = qb.build().execute(pool).await?;
    Ok(res.rows_affected())
}

async fn recover_partitions(
    pool: &PgPool,
    table: HistoryTable,
    timestamps: impl Iterator<Item = chrono::DateTime<chrono::Utc>>,
) -> Result<()> {
    let dates: BTreeSet<NaiveDate> = timestamps.map(nz_date).collect();
    for date in dates {
        tracing::warn!(
            table = table.table_name(),
            %date,
            "partition missing at append time, creating"
        );
        ensure_partition(pool, table, date).await?;
    }
    Ok(())
}

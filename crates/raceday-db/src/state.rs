//! Transactional upserts and queries for the keyed state tables.
//!
//! Each bulk upsert runs in a single transaction; the conflict target is
//! the entity's natural id and the update clause refreshes every non-key
//! column except `created_at`. Race status alone is guarded: the stored
//! value only changes when the incoming status ranks at or above it under
//! `race_status_rank`, so a stale poll can never walk a race backwards.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, PgPool, Row};

use raceday_schemas::{Entrant, Meeting, Race, RacePool, RaceStatus};

// ---------------------------------------------------------------------------
// Per-row statements (shared by the bulk and snapshot entry points)
// ---------------------------------------------------------------------------

async fn upsert_meeting(conn: &mut PgConnection, m: &Meeting) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(
        r#"
        insert into meetings (meeting_id, name, country, race_type, category_code, date)
        values ($1, $2, $3, $4, $5, $6)
        on conflict (meeting_id) do update
            set name          = excluded.name,
                country       = excluded.country,
                race_type     = excluded.race_type,
                category_code = excluded.category_code,
                date          = excluded.date,
                updated_at    = now()
        "#,
    )
    .bind(&m.meeting_id)
    .bind(&m.name)
    .bind(&m.country)
    .bind(m.race_type.as_str())
    .bind(&m.category_code)
    .bind(m.date)
    .execute(conn)
    .await?;
    Ok(res.rows_affected())
}

async fn upsert_race(conn: &mut PgConnection, r: &Race) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(
        r#"
        insert into races (
            race_id, meeting_id, race_number, name, start_time, status,
            distance_m, track_condition, weather
        )
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        on conflict (race_id) do update
            set meeting_id      = excluded.meeting_id,
                race_number     = excluded.race_number,
                name            = excluded.name,
                start_time      = excluded.start_time,
                status          = case
                    when race_status_rank(excluded.status) >= race_status_rank(races.status)
                        then excluded.status
                    else races.status
                end,
                distance_m      = excluded.distance_m,
                track_condition = excluded.track_condition,
                weather         = excluded.weather,
                updated_at      = now()
        "#,
    )
    .bind(&r.race_id)
    .bind(&r.meeting_id)
    .bind(r.race_number)
    .bind(&r.name)
    .bind(r.start_time)
    .bind(r.status.as_str())
    .bind(r.distance_m)
    .bind(&r.track_condition)
    .bind(&r.weather)
    .execute(conn)
    .await?;
    Ok(res.rows_affected())
}

async fn upsert_entrant(conn: &mut PgConnection, e: &Entrant) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(
        r#"
        insert into entrants (
            entrant_id, race_id, runner_number, name, jockey, trainer,
            weight_kg, silk_url, is_scratched, win_odds, place_odds
        )
        values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        on conflict (entrant_id) do update
            set race_id       = excluded.race_id,
                runner_number = excluded.runner_number,
                name          = excluded.name,
                jockey        = excluded.jockey,
                trainer       = excluded.trainer,
                weight_kg     = excluded.weight_kg,
                silk_url      = excluded.silk_url,
                is_scratched  = excluded.is_scratched,
                win_odds      = excluded.win_odds,
                place_odds    = excluded.place_odds,
                updated_at    = now()
        "#,
    )
    .bind(&e.entrant_id)
    .bind(&e.race_id)
    .bind(e.runner_number)
    .bind(&e.name)
    .bind(&e.jockey)
    .bind(&e.trainer)
    .bind(e.weight_kg)
    .bind(&e.silk_url)
    .bind(e.is_scratched)
    .bind(e.win_odds)
    .bind(e.place_odds)
    .execute(conn)
    .await?;
    Ok(res.rows_affected())
}

async fn upsert_pool(conn: &mut PgConnection, p: &RacePool) -> Result<u64, sqlx::Error> {
    let res = sqlx::query(
        r#"
        insert into race_pools (race_id, pool_type, total, currency, last_updated)
        values ($1, $2, $3, $4, $5)
        on conflict (race_id, pool_type) do update
            set total        = excluded.total,
                currency     = excluded.currency,
                last_updated = excluded.last_updated,
                updated_at   = now()
        "#,
    )
    .bind(&p.race_id)
    .bind(p.pool_type.as_str())
    .bind(p.total)
    .bind(&p.currency)
    .bind(p.last_updated)
    .execute(conn)
    .await?;
    Ok(res.rows_affected())
}

// ---------------------------------------------------------------------------
// Bulk upserts (one transaction each)
// ---------------------------------------------------------------------------

pub async fn bulk_upsert_meetings(pool: &PgPool, meetings: &[Meeting]) -> Result<u64> {
    if meetings.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await.context("begin meetings upsert")?;
    let mut written = 0u64;
    for m in meetings {
        written += upsert_meeting(&mut tx, m)
            .await
            .with_context(|| format!("upsert meeting {}", m.meeting_id))?;
    }
    tx.commit().await.context("commit meetings upsert")?;
    Ok(written)
}

pub async fn bulk_upsert_races(pool: &PgPool, races: &[Race]) -> Result<u64> {
    if races.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await.context("begin races upsert")?;
    let mut written = 0u64;
    for r in races {
        written += upsert_race(&mut tx, r)
            .await
            .with_context(|| format!("upsert race {}", r.race_id))?;
    }
    tx.commit().await.context("commit races upsert")?;
    Ok(written)
}

pub async fn bulk_upsert_entrants(pool: &PgPool, entrants: &[Entrant]) -> Result<u64> {
    if entrants.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await.context("begin entrants upsert")?;
    let mut written = 0u64;
    for e in entrants {
        written += upsert_entrant(&mut tx, e)
            .await
            .with_context(|| format!("upsert entrant {}", e.entrant_id))?;
    }
    tx.commit().await.context("commit entrants upsert")?;
    Ok(written)
}

pub async fn bulk_upsert_pools(pool: &PgPool, pools: &[RacePool]) -> Result<u64> {
    if pools.is_empty() {
        return Ok(0);
    }
    let mut tx = pool.begin().await.context("begin pools upsert")?;
    let mut written = 0u64;
    for p in pools {
        written += upsert_pool(&mut tx, p)
            .await
            .with_context(|| format!("upsert pool {}/{}", p.race_id, p.pool_type.as_str()))?;
    }
    tx.commit().await.context("commit pools upsert")?;
    Ok(written)
}

/// One poll's state-table writes — race, its entrants, its pools — in a
/// single transaction, so readers never observe a half-applied snapshot.
/// History appends deliberately stay outside (see the pipeline).
pub async fn upsert_race_snapshot(
    pool: &PgPool,
    race: &Race,
    entrants: &[Entrant],
    pools: &[RacePool],
) -> Result<()> {
    let mut tx = pool.begin().await.context("begin race snapshot upsert")?;
    upsert_race(&mut tx, race)
        .await
        .with_context(|| format!("upsert race {}", race.race_id))?;
    for e in entrants {
        upsert_entrant(&mut tx, e)
            .await
            .with_context(|| format!("upsert entrant {}", e.entrant_id))?;
    }
    for p in pools {
        upsert_pool(&mut tx, p)
            .await
            .with_context(|| format!("upsert pool {}/{}", p.race_id, p.pool_type.as_str()))?;
    }
    tx.commit().await.context("commit race snapshot upsert")?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Queries
// ---------------------------------------------------------------------------

/// The slice of a race the scheduler needs to drive polling.
#[derive(Debug, Clone)]
pub struct ActiveRace {
    pub race_id: String,
    pub start_time: DateTime<Utc>,
    pub status: RaceStatus,
}

/// Races worth polling: status upcoming/open with a start inside the
/// discovery window, soonest first. The window reaches an hour back so a
/// race that has started but is still open (late off, delayed dispatch)
/// is adopted rather than invisible.
pub async fn fetch_active_races(pool: &PgPool, now: DateTime<Utc>) -> Result<Vec<ActiveRace>> {
    let rows = sqlx::query(
        r#"
        select race_id, start_time, status
        from races
        where status in ('upcoming', 'open')
          and start_time >= $1 - interval '1 hour'
          and start_time < $1 + interval '24 hours'
        order by start_time asc
        "#,
    )
    .bind(now)
    .fetch_all(pool)
    .await
    .context("fetch_active_races failed")?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(ActiveRace {
            race_id: row.try_get("race_id")?,
            start_time: row.try_get("start_time")?,
            status: RaceStatus::parse(&row.try_get::<String, _>("status")?)?,
        });
    }
    Ok(out)
}

/// Current stored status for one race, or `None` if unknown.
pub async fn fetch_race_status(pool: &PgPool, race_id: &str) -> Result<Option<RaceStatus>> {
    let row: Option<(String,)> = sqlx::query_as(
        r#"
        select status from races where race_id = $1
        "#,
    )
    .bind(race_id)
    .fetch_optional(pool)
    .await
    .context("fetch_race_status failed")?;

    row.map(|(s,)| RaceStatus::parse(&s)).transpose()
}

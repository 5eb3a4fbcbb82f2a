//! raceday-daemon entry point.
//!
//! This file is intentionally thin: it validates the environment, builds
//! the pool and the component graph, starts the scheduler and the
//! scheduled tasks, serves the health endpoints, and tears everything
//! down on SIGTERM/SIGINT. Route handlers live in `routes.rs`.

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};
use tracing::{info, warn, Level};

use raceday_clock::{Clock, SystemClock};
use raceday_config::{AppConfig, LogLevel};
use raceday_daemon::{routes, state::AppState};
use raceday_ingest::{
    create_startup_partitions, run_daily_schedule, run_partition_maintainer, DailyInitializer,
};
use raceday_pipeline::RaceProcessor;
use raceday_scheduler::{ActiveRaceSource, RaceScheduler, SchedulerConfig};
use raceday_upstream::{NzTabClient, RacingApi};

fn main() {
    // Dev convenience; production injects env vars directly.
    let _ = dotenvy::from_filename(".env.local");

    // Config before tracing: LOG_LEVEL drives the subscriber.
    let cfg = match AppConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            eprintln!("environment validation failed: {err:#}");
            std::process::exit(1);
        }
    };
    init_tracing(cfg.log_level);

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(cfg.max_worker_threads)
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to build runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run(cfg)) {
        tracing::error!("fatal init error: {err:#}");
        std::process::exit(1);
    }
}

async fn run(cfg: AppConfig) -> Result<()> {
    let pool = raceday_db::connect(&cfg.db).await?;
    raceday_db::health_check(&pool)
        .await
        .context("initial store connectivity check")?;
    info!(
        host = %cfg.db.host,
        pool_max = cfg.db.pool_max,
        "store connected"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Partition shortfalls are recovered at append time, so a failure here
    // is loud but not fatal.
    if let Err(err) = create_startup_partitions(&pool, clock.as_ref()).await {
        warn!("startup partition creation failed: {err:#}");
    }

    let api: Arc<dyn RacingApi> = Arc::new(NzTabClient::new(cfg.upstream.clone())?);

    let initializer = Arc::new(DailyInitializer::new(
        Arc::clone(&api),
        pool.clone(),
        Arc::clone(&clock),
    ));
    match initializer.run().await.as_ref() {
        Ok(stats) => info!(
            races = stats.races_fetched,
            failed = stats.failed_races.len(),
            duration_ms = stats.duration_ms,
            "startup daily init complete"
        ),
        // The reconciliation loop will adopt whatever the store already has.
        Err(err) => warn!("startup daily init failed: {err:#}"),
    }

    let processor = Arc::new(RaceProcessor::new(
        Arc::clone(&api),
        pool.clone(),
        Arc::clone(&clock),
    ));
    let scheduler = Arc::new(RaceScheduler::new(
        SchedulerConfig::default(),
        Arc::new(pool.clone()) as Arc<dyn ActiveRaceSource>,
        processor,
        Arc::clone(&clock),
    ));
    scheduler.start().await;

    let maintainer = tokio::spawn(run_partition_maintainer(pool.clone(), Arc::clone(&clock)));
    let daily = tokio::spawn(run_daily_schedule(
        Arc::clone(&initializer),
        Arc::clone(&clock),
    ));

    let shared = Arc::new(AppState::new(pool.clone(), Arc::clone(&scheduler)));
    let app = routes::build_router(shared).layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.http_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!("raceday-daemon listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    // Shutdown order matters: stop producing polls, then drop the pool.
    maintainer.abort();
    daily.abort();
    scheduler.stop().await;
    pool.close().await;
    info!("shutdown complete");
    Ok(())
}

fn init_tracing(level: LogLevel) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| level.as_str().into()),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("termination signal received, shutting down");
}

//! The race-polling scheduler.
//!
//! A single coordinator task owns the active-race map. Nothing else
//! touches it: one-shot timers and finished polls post messages back to
//! the coordinator, which serializes every mutation. Per-race ordering
//! falls out of the structure — a race's timer is only rearmed after its
//! poll result has been applied, and the `in_flight` flag drops any tick
//! that sneaks in between.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use raceday_clock::Clock;
use raceday_db::ActiveRace;
use raceday_pipeline::{ProcessOutcome, ProcessRace};
use raceday_schemas::RaceStatus;

use crate::policy::{next_interval, FAST_POLL};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct SchedulerConfig {
    /// How often the active-race cohort is re-read from the store.
    pub reevaluation_interval: Duration,
    /// Global cap on concurrently executing polls.
    pub max_concurrent_polls: usize,
    /// Hard deadline for one tick; a poll past it is abandoned and counted
    /// as a failure.
    pub tick_deadline: Duration,
    /// How long `stop()` waits for in-flight polls before abandoning them.
    pub shutdown_grace: Duration,
    /// Consecutive failures before the penalty kicks in.
    pub failure_penalty_threshold: u32,
    /// Penalized intervals never exceed this.
    pub penalty_cap: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            reevaluation_interval: Duration::from_secs(60),
            max_concurrent_polls: 8,
            tick_deadline: Duration::from_secs(45),
            shutdown_grace: Duration::from_secs(10),
            failure_penalty_threshold: 3,
            penalty_cap: Duration::from_secs(300),
        }
    }
}

// ---------------------------------------------------------------------------
// Store seam
// ---------------------------------------------------------------------------

/// Where the scheduler learns which races deserve polling. The production
/// implementation is the Postgres pool; tests swap in fakes.
#[async_trait]
pub trait ActiveRaceSource: Send + Sync {
    async fn active_races(&self, now: DateTime<Utc>) -> Result<Vec<ActiveRace>>;

    /// Stored status for one race, `None` when the store no longer knows
    /// it. Reconciliation consults this before retiring a race that left
    /// the discovery window: leaving the window is not the same as being
    /// finished. Fakes whose races never depart can rely on the default.
    async fn race_status(&self, race_id: &str) -> Result<Option<RaceStatus>> {
        let _ = race_id;
        Ok(None)
    }
}

#[async_trait]
impl ActiveRaceSource for sqlx::PgPool {
    async fn active_races(&self, now: DateTime<Utc>) -> Result<Vec<ActiveRace>> {
        raceday_db::fetch_active_races(self, now).await
    }

    async fn race_status(&self, race_id: &str) -> Result<Option<RaceStatus>> {
        raceday_db::fetch_race_status(self, race_id).await
    }
}

// ---------------------------------------------------------------------------
// Public handle
// ---------------------------------------------------------------------------

/// Point-in-time view of the scheduler for the /status endpoint.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SchedulerSnapshot {
    pub running: bool,
    pub active_races: usize,
    pub in_flight_polls: usize,
    pub polls_executed: u64,
}

pub struct RaceScheduler {
    cfg: SchedulerConfig,
    source: Arc<dyn ActiveRaceSource>,
    processor: Arc<dyn ProcessRace>,
    clock: Arc<dyn Clock>,
    running: Mutex<Option<Running>>,
}

struct Running {
    msg_tx: mpsc::Sender<Msg>,
    join: JoinHandle<()>,
}

impl RaceScheduler {
    pub fn new(
        cfg: SchedulerConfig,
        source: Arc<dyn ActiveRaceSource>,
        processor: Arc<dyn ProcessRace>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cfg,
            source,
            processor,
            clock,
            running: Mutex::new(None),
        }
    }

    /// Start the coordinator. Idempotent; the first reconciliation runs
    /// immediately.
    pub async fn start(&self) {
        let mut guard = self.running.lock().await;
        if guard.is_some() {
            return;
        }

        let (msg_tx, msg_rx) = mpsc::channel(256);
        let coordinator = Coordinator {
            cfg: self.cfg,
            source: Arc::clone(&self.source),
            processor: Arc::clone(&self.processor),
            clock: Arc::clone(&self.clock),
            msg_tx: msg_tx.clone(),
            semaphore: Arc::new(Semaphore::new(self.cfg.max_concurrent_polls)),
            active: HashMap::new(),
            in_flight: 0,
            polls_executed: 0,
            shutting_down: false,
        };
        let join = tokio::spawn(coordinator.run(msg_rx));
        *guard = Some(Running { msg_tx, join });
        tracing::info!("race scheduler started");
    }

    /// Stop the coordinator: cancel pending timers, wait for in-flight
    /// polls up to the shutdown grace, then abandon whatever remains.
    pub async fn stop(&self) {
        let Some(running) = self.running.lock().await.take() else {
            return;
        };
        let _ = running.msg_tx.send(Msg::Stop).await;
        match tokio::time::timeout(self.cfg.shutdown_grace, running.join).await {
            Ok(_) => tracing::info!("race scheduler stopped"),
            Err(_) => {
                tracing::warn!(
                    grace_secs = self.cfg.shutdown_grace.as_secs(),
                    "shutdown grace elapsed, abandoning in-flight polls"
                );
            }
        }
    }

    pub async fn snapshot(&self) -> SchedulerSnapshot {
        let guard = self.running.lock().await;
        let Some(running) = guard.as_ref() else {
            return SchedulerSnapshot::default();
        };
        let (tx, rx) = oneshot::channel();
        if running.msg_tx.send(Msg::Snapshot(tx)).await.is_err() {
            return SchedulerSnapshot::default();
        }
        rx.await.unwrap_or_default()
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

enum Msg {
    /// A race's one-shot timer fired.
    Tick(String),
    /// A spawned poll finished (errors arrive stringified; the coordinator
    /// only logs them).
    PollDone {
        race_id: String,
        result: Result<ProcessOutcome, String>,
    },
    Snapshot(oneshot::Sender<SchedulerSnapshot>),
    Stop,
}

struct RaceEntry {
    start_time: DateTime<Utc>,
    status: RaceStatus,
    interval: Duration,
    polls_executed: u64,
    consecutive_failures: u32,
    in_flight: bool,
    timer: Option<JoinHandle<()>>,
}

struct Coordinator {
    cfg: SchedulerConfig,
    source: Arc<dyn ActiveRaceSource>,
    processor: Arc<dyn ProcessRace>,
    clock: Arc<dyn Clock>,
    msg_tx: mpsc::Sender<Msg>,
    semaphore: Arc<Semaphore>,
    active: HashMap<String, RaceEntry>,
    in_flight: usize,
    polls_executed: u64,
    shutting_down: bool,
}

impl Coordinator {
    async fn run(mut self, mut msg_rx: mpsc::Receiver<Msg>) {
        let mut reeval = tokio::time::interval(self.cfg.reevaluation_interval);
        reeval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = reeval.tick(), if !self.shutting_down => {
                    self.reconcile().await;
                }
                Some(msg) = msg_rx.recv() => match msg {
                    Msg::Tick(race_id) => self.on_tick(race_id),
                    Msg::PollDone { race_id, result } => self.on_poll_done(race_id, result),
                    Msg::Snapshot(reply) => {
                        let _ = reply.send(SchedulerSnapshot {
                            running: true,
                            active_races: self.active.len(),
                            in_flight_polls: self.in_flight,
                            polls_executed: self.polls_executed,
                        });
                    }
                    Msg::Stop => {
                        self.shutting_down = true;
                        for entry in self.active.values_mut() {
                            if let Some(timer) = entry.timer.take() {
                                timer.abort();
                            }
                        }
                    }
                },
            }

            if self.shutting_down && self.in_flight == 0 {
                break;
            }
        }
    }

    /// Diff the store's active cohort against ours: adopt new races,
    /// retire store-confirmed finished ones, leave survivors (and
    /// anything mid-poll) untouched.
    async fn reconcile(&mut self) {
        let now = self.clock.now();
        let fetched = match self.source.active_races(now).await {
            Ok(races) => races,
            Err(err) => {
                tracing::warn!(error = %err, "reconciliation fetch failed, keeping current cohort");
                return;
            }
        };

        let fetched_ids: std::collections::HashSet<&str> =
            fetched.iter().map(|r| r.race_id.as_str()).collect();

        // Leaving the discovery window is not retirement: a started race,
        // or one sitting in closed/interim, must keep polling until a
        // terminal status is stored. Only a store-confirmed terminal (or
        // vanished) race is dropped here; the usual exit is the terminal
        // tick in on_poll_done.
        let departed: Vec<String> = self
            .active
            .iter()
            .filter(|(id, entry)| !fetched_ids.contains(id.as_str()) && !entry.in_flight)
            .map(|(id, _)| id.clone())
            .collect();
        for race_id in departed {
            let retire = match self.source.race_status(&race_id).await {
                Ok(Some(status)) if status.is_terminal() => true,
                Ok(Some(status)) => {
                    tracing::debug!(
                        race_id = %race_id,
                        status = status.as_str(),
                        "race outside discovery window but not terminal, keeping"
                    );
                    false
                }
                Ok(None) => true,
                Err(err) => {
                    tracing::warn!(
                        race_id = %race_id,
                        error = %err,
                        "race status lookup failed, keeping race"
                    );
                    false
                }
            };
            if !retire {
                continue;
            }
            if let Some(mut entry) = self.active.remove(&race_id) {
                if let Some(timer) = entry.timer.take() {
                    timer.abort();
                }
                tracing::info!(race_id = %race_id, "race finished per the store, retired");
            }
        }

        for race in fetched {
            if self.active.contains_key(&race.race_id) {
                continue; // survivor: its own poll loop recomputes cadence
            }
            let time_to_start = (race.start_time - now).num_milliseconds() as f64 / 1000.0;
            let interval = match next_interval(time_to_start) {
                Ok(d) => d,
                Err(err) => {
                    tracing::error!(race_id = %race.race_id, error = %err, "skipping race");
                    continue;
                }
            };
            tracing::info!(
                race_id = %race.race_id,
                status = race.status.as_str(),
                interval_ms = interval.as_millis() as u64,
                "adopting race"
            );
            let entry = RaceEntry {
                start_time: race.start_time,
                status: race.status,
                interval,
                polls_executed: 0,
                consecutive_failures: 0,
                in_flight: false,
                timer: Some(spawn_timer(&self.msg_tx, race.race_id.clone(), interval)),
            };
            self.active.insert(race.race_id, entry);
        }
    }

    fn on_tick(&mut self, race_id: String) {
        if self.shutting_down {
            return;
        }
        let Some(entry) = self.active.get_mut(&race_id) else {
            return; // retired between timer fire and delivery
        };
        if entry.in_flight {
            return; // per-race polls are strictly serial
        }
        tracing::debug!(
            race_id = %race_id,
            status = entry.status.as_str(),
            interval_ms = entry.interval.as_millis() as u64,
            poll = entry.polls_executed + 1,
            "tick"
        );
        entry.in_flight = true;
        entry.timer = None;
        self.in_flight += 1;

        let processor = Arc::clone(&self.processor);
        let semaphore = Arc::clone(&self.semaphore);
        let msg_tx = self.msg_tx.clone();
        let deadline = self.cfg.tick_deadline;
        tokio::spawn(async move {
            // FIFO queue behind the global concurrency cap.
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return, // scheduler torn down
            };
            let result = match tokio::time::timeout(deadline, processor.process_race(&race_id)).await
            {
                Ok(Ok(outcome)) => Ok(outcome),
                Ok(Err(err)) => Err(format!("{err:#}")),
                Err(_) => Err(format!("tick exceeded {deadline:?} deadline, abandoned")),
            };
            let _ = msg_tx.send(Msg::PollDone { race_id, result }).await;
        });
    }

    fn on_poll_done(&mut self, race_id: String, result: Result<ProcessOutcome, String>) {
        self.in_flight = self.in_flight.saturating_sub(1);
        let now = self.clock.now();
        let shutting_down = self.shutting_down;
        let threshold = self.cfg.failure_penalty_threshold;
        let penalty_cap = self.cfg.penalty_cap;

        let Some(entry) = self.active.get_mut(&race_id) else {
            return;
        };
        entry.in_flight = false;

        let mut terminal = false;
        match result {
            Ok(outcome) => {
                entry.polls_executed += 1;
                entry.consecutive_failures = 0;
                entry.status = outcome.status;
                terminal = outcome.terminal;
                self.polls_executed += 1;
                if terminal {
                    tracing::info!(
                        race_id = %race_id,
                        status = outcome.status.as_str(),
                        polls = entry.polls_executed,
                        "race reached terminal status, retired"
                    );
                }
            }
            Err(err) => {
                entry.consecutive_failures += 1;
                tracing::warn!(
                    race_id = %race_id,
                    consecutive_failures = entry.consecutive_failures,
                    error = %err,
                    "race poll failed, race stays active"
                );
            }
        }

        if terminal {
            self.active.remove(&race_id);
            return;
        }
        if shutting_down {
            return;
        }

        // Cadence always tracks the live time-to-start; repeated failures
        // stretch it so a sick race cannot monopolize the worker pool.
        let time_to_start = (entry.start_time - now).num_milliseconds() as f64 / 1000.0;
        let mut interval = next_interval(time_to_start).unwrap_or(FAST_POLL);
        if entry.consecutive_failures >= threshold {
            let doublings = entry.consecutive_failures - threshold + 1;
            interval = interval
                .saturating_mul(2u32.saturating_pow(doublings))
                .min(penalty_cap);
        }
        entry.interval = interval;
        entry.timer = Some(spawn_timer(&self.msg_tx, race_id, interval));
    }
}

/// Arm a one-shot timer that posts `Tick(race_id)` back to the
/// coordinator after `delay`. The handle is aborted on retirement and
/// shutdown.
fn spawn_timer(msg_tx: &mpsc::Sender<Msg>, race_id: String, delay: Duration) -> JoinHandle<()> {
    let msg_tx = msg_tx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        let _ = msg_tx.send(Msg::Tick(race_id)).await;
    })
}

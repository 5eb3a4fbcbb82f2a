//! Race-polling scheduler: interval policy plus the coordinator that
//! drives per-race ticks against the pipeline.

pub mod policy;
pub mod scheduler;

pub use policy::{next_interval, NonFiniteTimeToStart, FAST_POLL, MID_POLL, SLOW_POLL};
pub use scheduler::{
    ActiveRaceSource, RaceScheduler, SchedulerConfig, SchedulerSnapshot,
};

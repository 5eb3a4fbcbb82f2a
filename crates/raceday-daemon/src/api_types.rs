//! JSON response bodies for the daemon's HTTP endpoints.

use serde::Serialize;

use raceday_scheduler::SchedulerSnapshot;

#[derive(Debug, Serialize)]
pub struct HealthyResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub database: &'static str,
    pub workers: &'static str,
}

#[derive(Debug, Serialize)]
pub struct UnhealthyResponse {
    pub status: &'static str,
    pub timestamp: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub scheduler: SchedulerSnapshot,
}

//! Outbound client boundary for the racing API.
//!
//! [`RacingApi`] is the seam the pipeline and daily initializer program
//! against; [`NzTabClient`] is the production implementation. Tests supply
//! in-process fakes.

use async_trait::async_trait;
use chrono::NaiveDate;

pub mod client;
pub mod error;
pub mod payloads;
pub mod retry;

pub use client::NzTabClient;
pub use error::UpstreamError;
pub use payloads::{
    EntrantMoneyPayload, EntrantOddsPayload, EntrantPayload, MeetingPayload, MeetingsResponse,
    MoneyTrackerPayload, PoolTotalPayload, RaceHeaderPayload, RacePayload, RaceSummaryPayload,
};
pub use retry::RetryPolicy;

/// Upstream racing-data contract.
///
/// Object-safe and `Send + Sync` so callers can hold an
/// `Arc<dyn RacingApi>` across task boundaries.
#[async_trait]
pub trait RacingApi: Send + Sync {
    /// Meetings (with race summaries) for one NZ racing date.
    async fn fetch_meetings(&self, date: NaiveDate) -> Result<Vec<MeetingPayload>, UpstreamError>;

    /// Detail snapshot for one race.
    async fn fetch_race(&self, race_id: &str) -> Result<RacePayload, UpstreamError>;

    /// Transient retries performed since construction, across all calls.
    /// Callers sample this before and after a batch to report retry
    /// totals. Fakes that never retry can rely on the default.
    fn retries_total(&self) -> u64 {
        0
    }
}

#[async_trait]
impl RacingApi for NzTabClient {
    async fn fetch_meetings(&self, date: NaiveDate) -> Result<Vec<MeetingPayload>, UpstreamError> {
        NzTabClient::fetch_meetings(self, date).await
    }

    async fn fetch_race(&self, race_id: &str) -> Result<RacePayload, UpstreamError> {
        NzTabClient::fetch_race(self, race_id).await
    }

    fn retries_total(&self) -> u64 {
        NzTabClient::retries_total(self)
    }
}

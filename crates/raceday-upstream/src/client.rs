//! HTTP client for the NZ TAB racing API.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::NaiveDate;
use serde::de::DeserializeOwned;

use raceday_config::UpstreamConfig;

use crate::error::UpstreamError;
use crate::payloads::{MeetingPayload, MeetingsResponse, RacePayload};
use crate::retry::{run_with_retry, RetryPolicy};

/// Per-attempt request deadline.
const ATTEMPT_DEADLINE: Duration = Duration::from_secs(10);
/// Reject response bodies larger than this.
const MAX_BODY_BYTES: usize = 5 * 1024 * 1024;

/// Only these disciplines are ingested; the meetings query carries the
/// filter so the API does not ship greyhound cards we would drop anyway.
const RACE_TYPE_FILTER: &str = "thoroughbred,harness";

pub struct NzTabClient {
    http: reqwest::Client,
    cfg: UpstreamConfig,
    policy: RetryPolicy,
    retries: AtomicU64,
}

impl NzTabClient {
    pub fn new(cfg: UpstreamConfig) -> anyhow::Result<Self> {
        Self::with_policy(cfg, RetryPolicy::default())
    }

    /// Constructor with an explicit retry policy; tests shrink the backoff.
    pub fn with_policy(cfg: UpstreamConfig, policy: RetryPolicy) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(ATTEMPT_DEADLINE)
            .connect_timeout(Duration::from_secs(5))
            .build()?;
        Ok(Self {
            http,
            cfg,
            policy,
            retries: AtomicU64::new(0),
        })
    }

    /// Transient retries performed since construction, across all calls.
    pub fn retries_total(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }

    /// All meetings for one NZ racing date, restricted to supported race
    /// types. Transient failures are retried under the policy.
    pub async fn fetch_meetings(&self, date: NaiveDate) -> Result<Vec<MeetingPayload>, UpstreamError> {
        let url = format!("{}/racing/meetings", self.cfg.base_url.trim_end_matches('/'));
        let query = [
            ("date", date.format("%Y-%m-%d").to_string()),
            ("race_types", RACE_TYPE_FILTER.to_string()),
        ];
        let resp: MeetingsResponse =
            run_with_retry(&self.policy, "fetch_meetings", &self.retries, || {
                self.attempt(&url, &query)
            })
            .await?;
        Ok(resp.meetings)
    }

    /// Full snapshot for one race: header, entrants, money tracker, pools.
    pub async fn fetch_race(&self, race_id: &str) -> Result<RacePayload, UpstreamError> {
        const NO_QUERY: &[(&str, String)] = &[];
        let url = format!(
            "{}/racing/races/{race_id}",
            self.cfg.base_url.trim_end_matches('/')
        );
        run_with_retry(&self.policy, "fetch_race", &self.retries, || {
            self.attempt(&url, NO_QUERY)
        })
        .await
    }

    async fn attempt<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, UpstreamError> {
        let resp = self
            .http
            .get(url)
            .query(query)
            .header("From", &self.cfg.from_email)
            .header("X-Partner", &self.cfg.partner_name)
            .header("X-Partner-ID", &self.cfg.partner_id)
            .send()
            .await
            .map_err(|e| UpstreamError::transient(format!("request failed: {e}")))?;

        let status = resp.status();
        if status.is_success() {
            let body = read_bounded(resp).await?;
            return serde_json::from_slice(&body)
                .map_err(|e| UpstreamError::Decode(format!("invalid JSON from {url}: {e}")));
        }

        if status.as_u16() == 429 {
            let retry_after = resp
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(UpstreamError::Transient {
                message: format!("rate limited by {url}"),
                retry_after,
            });
        }

        if status.is_server_error() {
            return Err(UpstreamError::transient(format!(
                "upstream {url} returned {status}"
            )));
        }

        Err(UpstreamError::Fatal {
            status: status.as_u16(),
            message: format!("upstream {url} returned {status}"),
        })
    }
}

/// Read a response body, rejecting anything over [`MAX_BODY_BYTES`].
/// Content-Length is checked first when the server sends one; chunked
/// bodies are bounded while streaming.
async fn read_bounded(mut resp: reqwest::Response) -> Result<Vec<u8>, UpstreamError> {
    if let Some(len) = resp.content_length() {
        if len as usize > MAX_BODY_BYTES {
            return Err(UpstreamError::Decode(format!(
                "response body of {len} bytes exceeds {MAX_BODY_BYTES} byte cap"
            )));
        }
    }

    let mut buf: Vec<u8> = Vec::new();
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| UpstreamError::transient(format!("reading body: {e}")))?
    {
        if buf.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(UpstreamError::Decode(format!(
                "response body exceeds {MAX_BODY_BYTES} byte cap"
            )));
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}

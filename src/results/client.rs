//! HTTP client for the external sports-data provider.
//!
//! Self-throttled: a global rate limiter plus a 250 ms sleep between pages.
//! Transient failures retry up to three times with backoff; 4xx responses
//! and parse failures are permanent for this tick and bubble up to be
//! logged and retried on the next cron pass.

use std::num::NonZeroU32;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::ResultsConfig;
use crate::retry::RetryPolicy;

/// Pause between pagination requests.
const PAGE_THROTTLE: Duration = Duration::from_millis(250);
/// Global request ceiling; providers rate limit aggressively.
const REQUESTS_PER_SEC: u32 = 4;
/// Pages per listing call before bailing out; a runaway pagination loop is a
/// provider bug, not a bigger catalogue.
const MAX_PAGES: usize = 50;

// === Provider wire types ===

#[derive(Debug, Deserialize)]
struct FixturePage {
    data: Vec<ApiFixture>,
    #[serde(default)]
    pagination: Option<Pagination>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(default)]
    has_more: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiFixture {
    pub id: i64,
    #[serde(default)]
    pub league: Option<String>,
    #[serde(default)]
    pub home_team: Option<String>,
    #[serde(default)]
    pub away_team: Option<String>,
    /// Kick-off as Unix seconds.
    pub starting_at: i64,
    pub status: String,
    #[serde(default)]
    pub scores: Option<ApiScores>,
    #[serde(default)]
    pub odds: Option<ApiOdds>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiScores {
    pub home: i32,
    pub away: i32,
    #[serde(default)]
    pub ht_home: Option<i32>,
    #[serde(default)]
    pub ht_away: Option<i32>,
}

/// Decimal odds from the provider; scaled to integers at the boundary.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiOdds {
    #[serde(default)]
    pub home: Option<f64>,
    #[serde(default)]
    pub draw: Option<f64>,
    #[serde(default)]
    pub away: Option<f64>,
    #[serde(default)]
    pub over_25: Option<f64>,
    #[serde(default)]
    pub under_25: Option<f64>,
}

impl ApiFixture {
    /// Provider status strings collapsed to the relay's vocabulary.
    pub fn normalized_status(&self) -> &'static str {
        match self.status.as_str() {
            "NS" | "TBA" => "scheduled",
            "1H" | "2H" | "HT" | "ET" | "PEN_LIVE" | "BREAK" | "INPLAY" => "in_play",
            "FT" | "AET" | "FT_PEN" => "finished",
            "CANC" | "ABAN" | "WO" => "cancelled",
            "POSTP" | "DELAYED" | "SUSP" | "INT" => "postponed",
            _ => "scheduled",
        }
    }

    pub fn is_finished(&self) -> bool {
        self.normalized_status() == "finished"
    }
}

/// Scale a decimal odd by 1000 into the on-chain integer representation.
pub fn scale_odd(odd: f64) -> Option<i64> {
    if !odd.is_finite() || odd < 1.0 {
        return None;
    }
    Some((odd * 1000.0).round() as i64)
}

pub struct SportsApiClient {
    http: reqwest::Client,
    base: String,
    token: String,
    limiter: DefaultDirectRateLimiter,
}

impl SportsApiClient {
    pub fn new(cfg: &ResultsConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build sports API client")?;
        let quota = Quota::per_second(NonZeroU32::new(REQUESTS_PER_SEC).unwrap());
        Ok(Self {
            http,
            base: cfg.api_base.trim_end_matches('/').to_string(),
            token: cfg.api_token.clone(),
            limiter: RateLimiter::direct(quota),
        })
    }

    /// Upcoming fixtures between two dates (inclusive), following pagination
    /// to exhaustion.
    pub async fn fixtures_between(&self, from: &str, to: &str) -> Result<Vec<ApiFixture>> {
        let mut all = Vec::new();
        for page in 1..=MAX_PAGES {
            let url = format!(
                "{}/fixtures/between/{}/{}?page={}&include=odds",
                self.base, from, to, page
            );
            let body: FixturePage = self.get_json(&url).await?;
            let fetched = body.data.len();
            debug!("[RESULTS] fixtures page {}: {} rows", page, fetched);
            all.extend(body.data);

            let has_more = body.pagination.map(|p| p.has_more).unwrap_or(false);
            if !has_more || fetched == 0 {
                return Ok(all);
            }
            tokio::time::sleep(PAGE_THROTTLE).await;
        }
        warn!("[RESULTS] pagination cap hit at {} pages for {}..{}", MAX_PAGES, from, to);
        Ok(all)
    }

    /// Current state of a single fixture.
    pub async fn fixture(&self, fixture_id: i64) -> Result<ApiFixture> {
        #[derive(Deserialize)]
        struct One {
            data: ApiFixture,
        }
        let url = format!("{}/fixtures/{}?include=scores", self.base, fixture_id);
        let body: One = self.get_json(&url).await?;
        Ok(body.data)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let policy = RetryPolicy::http();
        let mut attempt = 0u32;
        loop {
            self.limiter.until_ready().await;
            match self.get_once(url).await {
                Ok(parsed) => return Ok(parsed),
                Err(e) if is_transient(&e) && policy.should_retry(attempt) => {
                    let delay = policy.delay(attempt);
                    warn!("[RESULTS] transient error ({}), retrying in {:?}", e, delay);
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn get_once<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let response = self
            .http
            .get(url)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| anyhow::anyhow!("transient: {e}"))?;

        let status = response.status();
        if status.as_u16() == 429 {
            // Provider throttle: treat as transient but let the limiter
            // absorb most of the pressure.
            tokio::time::sleep(PAGE_THROTTLE).await;
            bail!("transient: HTTP 429");
        }
        if status.is_server_error() {
            bail!("transient: HTTP {status}");
        }
        if !status.is_success() {
            bail!("provider rejected request: HTTP {status} for {url}");
        }

        response
            .json::<T>()
            .await
            .with_context(|| format!("unparseable provider response from {url}"))
    }
}

fn is_transient(e: &anyhow::Error) -> bool {
    e.to_string().starts_with("transient:")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture_with_status(status: &str) -> ApiFixture {
        ApiFixture {
            id: 1,
            league: None,
            home_team: None,
            away_team: None,
            starting_at: 0,
            status: status.to_string(),
            scores: None,
            odds: None,
        }
    }

    #[test]
    fn test_status_normalization() {
        assert_eq!(fixture_with_status("NS").normalized_status(), "scheduled");
        assert_eq!(fixture_with_status("1H").normalized_status(), "in_play");
        assert_eq!(fixture_with_status("FT").normalized_status(), "finished");
        assert_eq!(fixture_with_status("AET").normalized_status(), "finished");
        assert_eq!(fixture_with_status("FT_PEN").normalized_status(), "finished");
        assert_eq!(fixture_with_status("CANC").normalized_status(), "cancelled");
        assert_eq!(fixture_with_status("POSTP").normalized_status(), "postponed");
        assert_eq!(fixture_with_status("???").normalized_status(), "scheduled");
    }

    #[test]
    fn test_scale_odd() {
        assert_eq!(scale_odd(2.5), Some(2500));
        assert_eq!(scale_odd(1.01), Some(1010));
        assert_eq!(scale_odd(1.855), Some(1855));
        // Below-evens and garbage odds are dropped.
        assert_eq!(scale_odd(0.99), None);
        assert_eq!(scale_odd(f64::NAN), None);
        assert_eq!(scale_odd(f64::INFINITY), None);
    }
}

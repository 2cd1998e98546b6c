//! Rate limit response headers

use crate::transport::RestResponse;
use serde::Deserialize;
use std::time::Duration;

pub const LIMIT: &str = "x-ratelimit-limit";
pub const REMAINING: &str = "x-ratelimit-remaining";
pub const RESET: &str = "x-ratelimit-reset";
pub const RESET_AFTER: &str = "x-ratelimit-reset-after";
pub const BUCKET: &str = "x-ratelimit-bucket";
pub const GLOBAL: &str = "x-ratelimit-global";
pub const RETRY_AFTER: &str = "retry-after";

/// Rate limit information carried by one response
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RateLimitHeaders {
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    /// Time until the bucket window resets
    pub reset_after: Option<Duration>,
    /// Wait demanded by a 429
    pub retry_after: Option<Duration>,
    /// The 429 applies to every route
    pub global: bool,
    /// Server-side bucket hash
    pub bucket: Option<String>,
}

#[derive(Deserialize)]
struct RateLimitedBody {
    retry_after: Option<f64>,
    #[serde(default)]
    global: bool,
}

impl RateLimitHeaders {
    pub fn from_response(response: &RestResponse) -> Self {
        Self::parse(response, chrono::Utc::now().timestamp_millis())
    }

    /// Parse headers; `now_ms` is wall-clock Unix time used to turn an
    /// absolute `X-RateLimit-Reset` into a relative delay
    pub fn parse(response: &RestResponse, now_ms: i64) -> Self {
        let reset_after = response
            .header(RESET_AFTER)
            .and_then(parse_seconds)
            .or_else(|| {
                let reset_ms = response.header(RESET)?.trim().parse::<f64>().ok()? * 1000.0;
                let delta = (reset_ms.round() as i64).saturating_sub(now_ms).max(0);
                Some(Duration::from_millis(delta as u64))
            });

        let mut headers = Self {
            limit: response.header(LIMIT).and_then(|v| v.trim().parse().ok()),
            remaining: response.header(REMAINING).and_then(|v| v.trim().parse().ok()),
            reset_after,
            retry_after: response.header(RETRY_AFTER).and_then(parse_seconds),
            global: response
                .header(GLOBAL)
                .is_some_and(|v| v.trim().eq_ignore_ascii_case("true")),
            bucket: response.header(BUCKET).map(str::to_string),
        };

        // 429 bodies repeat the limit as JSON; trust them when headers are missing
        if response.status == 429 {
            if let Ok(body) = serde_json::from_slice::<RateLimitedBody>(&response.body) {
                if headers.retry_after.is_none() {
                    headers.retry_after = body.retry_after.and_then(seconds);
                }
                headers.global |= body.global;
            }
        }

        headers
    }

    /// Response reports the bucket exhausted
    pub fn is_exhausted(&self) -> bool {
        self.remaining == Some(0)
    }
}

fn parse_seconds(value: &str) -> Option<Duration> {
    value.trim().parse::<f64>().ok().and_then(seconds)
}

fn seconds(value: f64) -> Option<Duration> {
    (value.is_finite() && value >= 0.0).then(|| Duration::from_secs_f64(value))
}

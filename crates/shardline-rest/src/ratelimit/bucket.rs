//! Per-bucket window

use super::headers::RateLimitHeaders;
use serde::Serialize;
use tokio::time::Instant;

/// Limit window of one bucket, as last reported by the server
///
/// Unknown fields (a new bucket, or a route without limit headers) never
/// block a request.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct BucketState {
    limit: Option<u32>,
    remaining: Option<u32>,
    reset_at: Option<Instant>,
}

impl BucketState {
    /// When the next request may go out, if it has to wait
    pub fn ready_at(&self, now: Instant) -> Option<Instant> {
        match (self.remaining, self.reset_at) {
            (Some(0), Some(reset_at)) if reset_at > now => Some(reset_at),
            _ => None,
        }
    }

    /// No window left to honour; forgetting this state loses nothing
    pub fn is_idle(&self, now: Instant) -> bool {
        self.reset_at.map_or(true, |reset_at| reset_at <= now)
    }

    /// Account for a request about to be sent
    pub fn reserve(&mut self, now: Instant) {
        if self.reset_at.is_some_and(|reset_at| reset_at <= now) {
            self.remaining = self.limit;
            self.reset_at = None;
        }
        self.remaining = self.remaining.map(|r| r.saturating_sub(1));
    }

    /// Refresh from a response
    pub fn update(&mut self, headers: &RateLimitHeaders, now: Instant) {
        if headers.limit.is_some() {
            self.limit = headers.limit;
        }
        if headers.remaining.is_some() {
            self.remaining = headers.remaining;
        }
        if let Some(reset_after) = headers.reset_after {
            self.reset_at = Some(now + reset_after);
        }
    }

    /// Block the bucket until `until` (route-level 429)
    pub fn hold(&mut self, until: Instant) {
        self.remaining = Some(0);
        self.reset_at = Some(self.reset_at.map_or(until, |at| at.max(until)));
    }

    pub fn snapshot(&self, key: &str, pending: usize) -> BucketSnapshot {
        BucketSnapshot {
            key: key.to_string(),
            limit: self.limit,
            remaining: self.remaining,
            reset_at: self.reset_at,
            pending,
        }
    }
}

/// Point-in-time view of a bucket
#[derive(Debug, Clone, Serialize)]
pub struct BucketSnapshot {
    pub key: String,
    pub limit: Option<u32>,
    pub remaining: Option<u32>,
    #[serde(skip)]
    pub reset_at: Option<Instant>,
    /// Requests queued or in flight
    pub pending: usize,
}

//! Connect pacing
//!
//! The gateway limits how often a new session may be identified across all
//! shards of a bot. The manager funnels every connection attempt through a
//! single FIFO queue with at most one attempt in flight, gated on the time
//! of the last Identify.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

/// Time of the last Identify sent by any shard
#[derive(Debug, Default)]
pub(crate) struct IdentifyClock {
    last: Mutex<Option<Instant>>,
}

impl IdentifyClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, now: Instant) {
        *self.last.lock() = Some(now);
    }

    pub fn last(&self) -> Option<Instant> {
        *self.last.lock()
    }

    /// At least `interval` has passed since the last Identify
    pub fn is_ready(&self, now: Instant, interval: Duration) -> bool {
        self.last()
            .map_or(true, |last| now.saturating_duration_since(last) >= interval)
    }
}

/// Exponential delay between failed connect attempts
#[derive(Debug, Clone, Copy)]
pub(crate) struct Backoff {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
        }
    }
}

impl Backoff {
    /// Delay before the next attempt after `failures` consecutive failures
    pub fn delay_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let exponent = (failures - 1).min(16) as i32;
        let millis = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }
}

/// The attempt currently in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Connecting {
    pub shard_id: u32,
    pub deadline: Instant,
}

/// FIFO of shards waiting to connect, plus the one connecting now
#[derive(Debug, Default)]
pub(crate) struct ConnectQueue {
    queue: VecDeque<u32>,
    connecting: Option<Connecting>,
    failures: u32,
    hold_until: Option<Instant>,
    backoff: Backoff,
}

impl ConnectQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a shard; ignored if already queued or connecting
    pub fn push(&mut self, shard_id: u32) -> bool {
        if self.is_connecting(shard_id) || self.queue.contains(&shard_id) {
            return false;
        }
        self.queue.push_back(shard_id);
        true
    }

    pub fn remove(&mut self, shard_id: u32) {
        self.queue.retain(|id| *id != shard_id);
        if self.is_connecting(shard_id) {
            self.connecting = None;
        }
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn queued(&self) -> Vec<u32> {
        self.queue.iter().copied().collect()
    }

    pub fn connecting(&self) -> Option<Connecting> {
        self.connecting
    }

    fn is_connecting(&self, shard_id: u32) -> bool {
        self.connecting.is_some_and(|c| c.shard_id == shard_id)
    }

    /// Pop the next shard to connect, if nothing is in flight, the identify
    /// gate is open, and no failure backoff is pending
    pub fn next_ready(&mut self, now: Instant, identify_ready: bool) -> Option<u32> {
        if self.connecting.is_some() || !identify_ready {
            return None;
        }
        if self.hold_until.is_some_and(|until| now < until) {
            return None;
        }
        self.queue.pop_front()
    }

    /// Mark `shard_id` as the attempt in flight
    pub fn begin(&mut self, shard_id: u32, deadline: Instant) {
        self.queue.retain(|id| *id != shard_id);
        self.connecting = Some(Connecting { shard_id, deadline });
    }

    /// Clear the in-flight marker if it belongs to `shard_id`
    pub fn finish(&mut self, shard_id: u32) -> bool {
        if self.is_connecting(shard_id) {
            self.connecting = None;
            true
        } else {
            false
        }
    }

    /// Take the in-flight attempt if its deadline has passed
    pub fn expired(&mut self, now: Instant) -> Option<u32> {
        match self.connecting {
            Some(c) if now >= c.deadline => {
                self.connecting = None;
                Some(c.shard_id)
            }
            _ => None,
        }
    }

    /// A connect attempt failed; hold the queue for the backoff delay
    pub fn record_failure(&mut self, now: Instant) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let delay = self.backoff.delay_for(self.failures);
        self.hold_until = Some(now + delay);
        delay
    }

    /// A shard came online; attempts proceed at the identify pace again
    pub fn record_success(&mut self) {
        self.failures = 0;
        self.hold_until = None;
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.connecting = None;
    }
}

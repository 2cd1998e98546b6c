//! Shard manager
//!
//! Owns every shard, the connect queue and the sweep task. All lifecycle
//! decisions (start a connect, requeue, give up) happen on the sweep task,
//! one at a time; everything else only reads shard state or posts events.

use super::runner::{self, ShardContext};
use super::scheduler::{ConnectQueue, IdentifyClock};
use super::{CloseReason, ConnectionState, GatewayError, GatewayResult, Shard, ShardStats};
use crate::events::EventRouter;
use parking_lot::Mutex;
use serde::Serialize;
use shardline_common::{GatewayConfig, ShardingConfig, Snowflake};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};

/// How long shutdown waits for each socket to close cleanly
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Close code sent on shutdown; ends the session server-side
const WS_NORMAL_CLOSURE: u16 = 1000;

/// Messages posted to the sweep task
#[derive(Debug)]
pub(crate) enum ManagerEvent {
    /// A connection task ended
    Closed {
        shard_id: u32,
        attempt: u64,
        reason: CloseReason,
    },
    /// Caller asked for a shard to reconnect
    Reconnect { shard_id: u32 },
}

/// Point-in-time view of the manager
#[derive(Debug, Clone, Serialize)]
pub struct ManagerStats {
    pub shard_count: u32,
    pub online: usize,
    pub queued: Vec<u32>,
    pub connecting: Option<u32>,
    pub shards: Vec<ShardStats>,
}

/// Owns and drives a fixed set of shards
pub struct ShardManager {
    inner: Arc<ManagerInner>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

struct ManagerInner {
    ctx: ShardContext,
    shards: Vec<Arc<Shard>>,
    queue: Mutex<ConnectQueue>,
    shutting_down: AtomicBool,
    shutdown: Notify,
    events: Mutex<Option<mpsc::UnboundedReceiver<ManagerEvent>>>,
}

impl ShardManager {
    /// Create a manager for `gateway.shard_count` shards (at least one)
    pub fn new(
        gateway: GatewayConfig,
        sharding: ShardingConfig,
        router: Arc<dyn EventRouter>,
    ) -> Self {
        let total = gateway.shard_count.max(1);
        let shards = (0..total).map(|id| Arc::new(Shard::new(id, total))).collect();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let ctx = ShardContext {
            gateway: Arc::new(GatewayConfig {
                shard_count: total,
                ..gateway
            }),
            sharding: Arc::new(sharding),
            router,
            identify_clock: Arc::new(IdentifyClock::new()),
            events: events_tx,
        };

        Self {
            inner: Arc::new(ManagerInner {
                ctx,
                shards,
                queue: Mutex::new(ConnectQueue::new()),
                shutting_down: AtomicBool::new(false),
                shutdown: Notify::new(),
                events: Mutex::new(Some(events_rx)),
            }),
            sweeper: Mutex::new(None),
        }
    }

    /// Queue every shard and start the sweep task
    pub fn start(&self) -> GatewayResult<()> {
        if self.is_shutting_down() {
            return Err(GatewayError::ShuttingDown);
        }
        let events = self
            .inner
            .events
            .lock()
            .take()
            .ok_or(GatewayError::AlreadyStarted)?;

        {
            let mut queue = self.inner.queue.lock();
            for shard in &self.inner.shards {
                queue.push(shard.id());
            }
        }

        tracing::info!(
            shard_count = self.inner.shards.len(),
            identify_interval_ms = self.inner.ctx.sharding.identify_interval.as_millis() as u64,
            "Starting shard manager"
        );

        let inner = Arc::clone(&self.inner);
        *self.sweeper.lock() = Some(tokio::spawn(run_sweeper(inner, events)));
        Ok(())
    }

    /// Stop the sweep task and close every shard
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Shutting down shard manager");

        self.inner.shutdown.notify_one();
        let sweeper = self.sweeper.lock().take();
        if let Some(sweeper) = sweeper {
            if let Err(e) = sweeper.await {
                tracing::warn!(error = %e, "Sweep task ended abnormally");
            }
        }

        self.inner.queue.lock().clear();

        let closes = self.inner.shards.iter().map(|shard| {
            shard.close(
                WS_NORMAL_CLOSURE,
                SHUTDOWN_GRACE,
                ConnectionState::Shutdown,
            )
        });
        futures::future::join_all(closes).await;

        tracing::info!("Shard manager stopped");
    }

    /// Force a shard to drop its socket and go back through the connect queue
    pub fn reconnect(&self, shard_id: u32) -> GatewayResult<()> {
        if self.is_shutting_down() {
            return Err(GatewayError::ShuttingDown);
        }
        if self.shard(shard_id).is_none() {
            return Err(GatewayError::UnknownShard(shard_id));
        }
        self.inner
            .ctx
            .events
            .send(ManagerEvent::Reconnect { shard_id })
            .map_err(|_| GatewayError::ShuttingDown)
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.is_shutting_down()
    }

    pub fn shard_count(&self) -> u32 {
        self.inner.shards.len() as u32
    }

    pub fn shard(&self, shard_id: u32) -> Option<Arc<Shard>> {
        self.inner.shard(shard_id).cloned()
    }

    pub fn shards(&self) -> &[Arc<Shard>] {
        &self.inner.shards
    }

    /// Shard that receives events for `guild_id`
    pub fn shard_for_guild(&self, guild_id: Snowflake) -> Option<Arc<Shard>> {
        self.shard(shard_id_for_guild(guild_id, self.shard_count()))
    }

    pub fn stats(&self) -> ManagerStats {
        let shards: Vec<ShardStats> = self.inner.shards.iter().map(|s| s.stats()).collect();
        let queue = self.inner.queue.lock();

        ManagerStats {
            shard_count: self.shard_count(),
            online: shards
                .iter()
                .filter(|s| s.state == ConnectionState::Online)
                .count(),
            queued: queue.queued(),
            connecting: queue.connecting().map(|c| c.shard_id),
            shards,
        }
    }
}

/// `(guild_id >> 22) % shard_count`
#[must_use]
pub fn shard_id_for_guild(guild_id: Snowflake, shard_count: u32) -> u32 {
    ((guild_id.get() >> 22) % u64::from(shard_count.max(1))) as u32
}

impl ManagerInner {
    fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn shard(&self, shard_id: u32) -> Option<&Arc<Shard>> {
        self.shards.get(shard_id as usize)
    }

    /// One sweep tick: liveness, connect pacing, connect timeout
    fn sweep(&self, now: Instant) {
        if self.is_shutting_down() {
            return;
        }
        let sharding = &self.ctx.sharding;

        for shard in &self.shards {
            if !shard.state().is_open() {
                continue;
            }
            let silent = shard
                .last_event_at()
                .map_or(Duration::ZERO, |at| now.saturating_duration_since(at));
            if silent > sharding.liveness_timeout {
                tracing::warn!(
                    shard_id = shard.id(),
                    silent_ms = silent.as_millis() as u64,
                    "No traffic on open socket, forcing reconnect"
                );
                self.requeue(shard);
            }
        }

        let mut queue = self.queue.lock();

        if let Some(connecting) = queue.connecting() {
            let online = self
                .shard(connecting.shard_id)
                .is_some_and(|s| s.is_online());
            if online {
                queue.finish(connecting.shard_id);
                queue.record_success();
            }
        }

        let identify_ready = self
            .ctx
            .identify_clock
            .is_ready(now, sharding.identify_interval);
        if let Some(shard_id) = queue.next_ready(now, identify_ready) {
            if let Some(shard) = self.shard(shard_id) {
                queue.begin(shard_id, now + sharding.connect_timeout);
                tracing::debug!(shard_id, queued = queue.len(), "Starting connect attempt");
                runner::spawn(shard, self.ctx.clone());
            }
        }

        if let Some(shard_id) = queue.expired(now) {
            if let Some(shard) = self.shard(shard_id).filter(|s| s.state().is_open()) {
                // Handshake under way (slow READY or a long resume replay);
                // free the slot and leave the socket to the liveness check
                tracing::debug!(
                    shard_id,
                    state = %shard.state(),
                    "Connect deadline passed with socket open, releasing slot"
                );
            } else if let Some(shard) = self.shard(shard_id) {
                tracing::warn!(
                    shard_id,
                    timeout_ms = sharding.connect_timeout.as_millis() as u64,
                    "Connect attempt timed out"
                );
                shard.reset(ConnectionState::Reconnecting);
                shard.increment_reconnects();
                queue.push(shard_id);
                queue.record_failure(now);
            }
        }
    }

    fn handle_event(&self, event: ManagerEvent, now: Instant) {
        match event {
            ManagerEvent::Closed {
                shard_id,
                attempt,
                reason,
            } => self.on_closed(shard_id, attempt, &reason, now),
            ManagerEvent::Reconnect { shard_id } => {
                if let Some(shard) = self.shard(shard_id) {
                    tracing::info!(shard_id, "Reconnect requested");
                    self.requeue(shard);
                }
            }
        }
    }

    fn on_closed(&self, shard_id: u32, attempt: u64, reason: &CloseReason, now: Instant) {
        let Some(shard) = self.shard(shard_id) else {
            return;
        };
        if shard.attempt() != attempt {
            tracing::trace!(shard_id, attempt, "Ignoring close of a superseded attempt");
            return;
        }

        let was_connecting = self.queue.lock().finish(shard_id);

        if self.is_shutting_down() {
            shard.reset(ConnectionState::Shutdown);
            return;
        }

        if reason.is_fatal() {
            tracing::error!(
                shard_id,
                reason = %reason,
                "Fatal close, shard will not reconnect until configuration is fixed"
            );
            shard.clear_session();
            shard.reset(ConnectionState::Closed);
            return;
        }

        if reason.invalidates_session() {
            tracing::info!(shard_id, reason = %reason, "Session invalidated");
            shard.clear_session();
        }

        shard.reset(ConnectionState::Reconnecting);
        let reconnects = shard.increment_reconnects();

        let mut queue = self.queue.lock();
        if was_connecting && matches!(reason, CloseReason::ConnectFailed(_)) {
            let delay = queue.record_failure(now);
            tracing::warn!(
                shard_id,
                reason = %reason,
                retry_in_ms = delay.as_millis() as u64,
                "Connect failed, backing off"
            );
        } else {
            tracing::info!(shard_id, reason = %reason, reconnects, "Shard disconnected, requeued");
        }
        queue.push(shard_id);
    }

    /// Drop the socket and put the shard at the back of the queue
    fn requeue(&self, shard: &Arc<Shard>) {
        shard.reset(ConnectionState::Reconnecting);
        shard.increment_reconnects();

        let mut queue = self.queue.lock();
        queue.finish(shard.id());
        queue.push(shard.id());
    }
}

async fn run_sweeper(inner: Arc<ManagerInner>, mut events: mpsc::UnboundedReceiver<ManagerEvent>) {
    let mut ticker = interval(inner.ctx.sharding.sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = inner.shutdown.notified() => break,
            Some(event) = events.recv() => inner.handle_event(event, Instant::now()),
            _ = ticker.tick() => inner.sweep(Instant::now()),
        }
    }

    tracing::debug!("Sweep task stopped");
}

//! Shared shard handle
//!
//! A [`Shard`] outlives its connections. The connection task and the
//! manager write to it; anyone may read it. Per-connection state (inflate
//! context, write queue, heartbeat timer) lives in the connection task and
//! dies with it.

use super::{ConnectionState, GatewayError, GatewayResult};
use crate::protocol::{GatewayMessage, PresenceUpdatePayload};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Commands accepted by a live connection task
#[derive(Debug)]
pub(crate) enum ShardCommand {
    /// Queue on the paced write queue
    Send(GatewayMessage),
    /// Write on the next loop iteration, bypassing the queue
    SendNow(GatewayMessage),
    /// Close the socket with this code
    Close(u16),
}

/// Handle to the running connection task
#[derive(Debug)]
pub(crate) struct ShardLink {
    pub commands: mpsc::UnboundedSender<ShardCommand>,
    pub task: JoinHandle<()>,
}

#[derive(Debug, Default)]
struct SessionInfo {
    session_id: Option<String>,
    resume_url: Option<String>,
}

#[derive(Debug, Default, Clone, Copy)]
struct Timings {
    heartbeat_interval: Option<Duration>,
    last_heartbeat_sent_at: Option<Instant>,
    last_heartbeat_ack_at: Option<Instant>,
    last_event_at: Option<Instant>,
    connected_at: Option<Instant>,
}

/// One gateway shard
pub struct Shard {
    id: u32,
    total: u32,
    state: RwLock<ConnectionState>,
    sequence: AtomicU64,
    session: RwLock<SessionInfo>,
    timings: RwLock<Timings>,
    presence: RwLock<Option<PresenceUpdatePayload>>,
    reconnect_count: AtomicU64,
    attempt: AtomicU64,
    link: Mutex<Option<ShardLink>>,
}

/// Point-in-time view of a shard
#[derive(Debug, Clone, Serialize)]
pub struct ShardStats {
    pub id: u32,
    pub state: ConnectionState,
    pub sequence: u64,
    pub has_session: bool,
    pub reconnect_count: u64,
    pub latency_ms: Option<u64>,
}

impl Shard {
    #[must_use]
    pub fn new(id: u32, total: u32) -> Self {
        Self {
            id,
            total,
            state: RwLock::new(ConnectionState::Uninitialized),
            sequence: AtomicU64::new(0),
            session: RwLock::new(SessionInfo::default()),
            timings: RwLock::new(Timings::default()),
            presence: RwLock::new(None),
            reconnect_count: AtomicU64::new(0),
            attempt: AtomicU64::new(0),
            link: Mutex::new(None),
        }
    }

    /// Shard ordinal
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Total shard count
    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    pub fn is_online(&self) -> bool {
        self.state() == ConnectionState::Online
    }

    /// Last sequence received
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    /// Session to resume, if any
    pub fn session_id(&self) -> Option<String> {
        self.session.read().session_id.clone()
    }

    /// Resume URL handed out with READY
    pub fn resume_url(&self) -> Option<String> {
        self.session.read().resume_url.clone()
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.timings.read().heartbeat_interval
    }

    pub fn last_heartbeat_sent_at(&self) -> Option<Instant> {
        self.timings.read().last_heartbeat_sent_at
    }

    pub fn last_heartbeat_ack_at(&self) -> Option<Instant> {
        self.timings.read().last_heartbeat_ack_at
    }

    /// Last time any frame arrived on the current socket
    pub fn last_event_at(&self) -> Option<Instant> {
        self.timings.read().last_event_at
    }

    /// When the current socket opened
    pub fn connected_at(&self) -> Option<Instant> {
        self.timings.read().connected_at
    }

    /// Round-trip time of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        let timings = self.timings.read();
        match (timings.last_heartbeat_sent_at, timings.last_heartbeat_ack_at) {
            (Some(sent), Some(ack)) if ack >= sent => Some(ack - sent),
            _ => None,
        }
    }

    pub fn reconnect_count(&self) -> u64 {
        self.reconnect_count.load(Ordering::Relaxed)
    }

    /// Queue a frame on the paced write queue
    pub fn send(&self, message: GatewayMessage) -> GatewayResult<()> {
        self.command(ShardCommand::Send(message))
    }

    /// Write a frame immediately, bypassing the write queue
    pub fn send_now(&self, message: GatewayMessage) -> GatewayResult<()> {
        self.command(ShardCommand::SendNow(message))
    }

    /// Change presence
    ///
    /// The presence is remembered and sent with every later Identify. It is
    /// also sent right away (op 3) when the shard is online.
    pub fn update_presence(&self, presence: PresenceUpdatePayload) -> GatewayResult<()> {
        if !presence.is_valid_status() {
            return Err(GatewayError::InvalidPresence(presence.status));
        }

        let message = GatewayMessage::presence_update(&presence);
        *self.presence.write() = Some(presence);

        if self.is_online() {
            self.send(message)?;
        }
        Ok(())
    }

    /// Presence to send with Identify
    pub fn presence(&self) -> Option<PresenceUpdatePayload> {
        self.presence.read().clone()
    }

    pub fn stats(&self) -> ShardStats {
        ShardStats {
            id: self.id,
            state: self.state(),
            sequence: self.sequence(),
            has_session: self.session.read().session_id.is_some(),
            reconnect_count: self.reconnect_count(),
            latency_ms: self.latency().map(|d| d.as_millis() as u64),
        }
    }

    fn command(&self, command: ShardCommand) -> GatewayResult<()> {
        let link = self.link.lock();
        match link.as_ref() {
            Some(link) if self.state().is_open() => link
                .commands
                .send(command)
                .map_err(|_| GatewayError::NotConnected(self.id)),
            _ => Err(GatewayError::NotConnected(self.id)),
        }
    }

    // === Connection task / manager ===

    pub(crate) fn set_state(&self, state: ConnectionState) {
        let mut current = self.state.write();
        if *current != state {
            tracing::debug!(shard_id = self.id, from = current.as_str(), to = state.as_str(), "State change");
            *current = state;
        }
    }

    /// Record a dispatch sequence; returns false if it did not advance
    pub(crate) fn record_sequence(&self, sequence: u64) -> bool {
        self.sequence.fetch_max(sequence, Ordering::SeqCst) < sequence
    }

    pub(crate) fn set_session(&self, session_id: String, resume_url: Option<String>) {
        let mut session = self.session.write();
        session.session_id = Some(session_id);
        if resume_url.is_some() {
            session.resume_url = resume_url;
        }
    }

    /// Forget the session; the next handshake identifies
    pub(crate) fn clear_session(&self) {
        let mut session = self.session.write();
        session.session_id = None;
        session.resume_url = None;
        self.sequence.store(0, Ordering::SeqCst);
    }

    pub(crate) fn mark_connected(&self, now: Instant) {
        {
            let mut timings = self.timings.write();
            *timings = Timings {
                connected_at: Some(now),
                last_event_at: Some(now),
                ..Timings::default()
            };
        }
        self.set_state(ConnectionState::Preready);
    }

    pub(crate) fn set_heartbeat_interval(&self, interval: Duration) {
        self.timings.write().heartbeat_interval = Some(interval);
    }

    pub(crate) fn record_heartbeat_sent(&self, now: Instant) {
        self.timings.write().last_heartbeat_sent_at = Some(now);
    }

    pub(crate) fn record_heartbeat_ack(&self, now: Instant) {
        self.timings.write().last_heartbeat_ack_at = Some(now);
    }

    pub(crate) fn touch(&self, now: Instant) {
        self.timings.write().last_event_at = Some(now);
    }

    pub(crate) fn increment_reconnects(&self) -> u64 {
        self.reconnect_count.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Start a new connection attempt and return its number
    pub(crate) fn begin_attempt(&self) -> u64 {
        self.attempt.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub(crate) fn attempt(&self) -> u64 {
        self.attempt.load(Ordering::SeqCst)
    }

    pub(crate) fn attach(&self, link: ShardLink) {
        if let Some(previous) = self.link.lock().replace(link) {
            previous.task.abort();
        }
    }

    pub(crate) fn detach(&self) -> Option<ShardLink> {
        self.link.lock().take()
    }

    /// Tear down the connection and move to `target`
    ///
    /// Aborting the task drops the socket, the inflate context, the write
    /// queue and the heartbeat timer. The session survives unless the shard
    /// is shutting down.
    pub(crate) fn reset(&self, target: ConnectionState) {
        if let Some(link) = self.detach() {
            link.task.abort();
        }

        {
            let mut timings = self.timings.write();
            *timings = Timings::default();
        }

        if target == ConnectionState::Shutdown {
            self.clear_session();
        }
        self.set_state(target);
    }

    /// Ask the connection task to close with `code`, wait up to `grace`, then reset
    pub(crate) async fn close(&self, code: u16, grace: Duration, target: ConnectionState) {
        if let Some(mut link) = self.detach() {
            let _ = link.commands.send(ShardCommand::Close(code));
            if tokio::time::timeout(grace, &mut link.task).await.is_err() {
                tracing::debug!(shard_id = self.id, "Close grace period elapsed, aborting");
                link.task.abort();
            }
        }
        self.reset(target);
    }
}

impl std::fmt::Debug for Shard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shard")
            .field("id", &self.id)
            .field("total", &self.total)
            .field("state", &self.state())
            .field("sequence", &self.sequence())
            .field("reconnect_count", &self.reconnect_count())
            .finish()
    }
}

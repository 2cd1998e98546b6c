//! Per-connection protocol driver
//!
//! [`ShardSession`] runs the opcode state machine for one socket without
//! touching the socket itself. The connection task feeds it decoded frames
//! and timer wake-ups, and writes whatever it leaves in the outbox.

use super::runner::ShardContext;
use super::{CloseReason, ConnectionState, Shard};
use crate::codec::{encode_heartbeat, encode_identify, encode_resume};
use crate::events::{DispatchEvent, GatewayEventType};
use crate::protocol::{GatewayMessage, OpCode};
use rand::Rng;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// What the connection task should do after a session step
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Control {
    Continue,
    Close(CloseReason),
}

pub(crate) struct ShardSession {
    shard: Arc<Shard>,
    ctx: ShardContext,
    heartbeat_interval: Option<Duration>,
    next_heartbeat_at: Option<Instant>,
    /// Send time of the heartbeat still waiting for its ACK
    awaiting_ack_since: Option<Instant>,
    /// Re-identify scheduled after a non-resumable Invalid Session
    pending_identify_at: Option<Instant>,
    write_queue: VecDeque<GatewayMessage>,
    outbox: Vec<GatewayMessage>,
}

impl ShardSession {
    pub fn new(shard: Arc<Shard>, ctx: ShardContext) -> Self {
        Self {
            shard,
            ctx,
            heartbeat_interval: None,
            next_heartbeat_at: None,
            awaiting_ack_since: None,
            pending_identify_at: None,
            write_queue: VecDeque::new(),
            outbox: Vec::new(),
        }
    }

    /// Handle one decoded frame
    pub fn on_message(&mut self, message: GatewayMessage, now: Instant) -> Control {
        self.shard.touch(now);

        tracing::trace!(shard_id = self.shard.id(), op = %message.op, "Received");

        match message.op {
            OpCode::Hello => self.on_hello(&message, now),
            OpCode::Dispatch => self.on_dispatch(message),
            OpCode::Heartbeat => {
                // Server asked for one right now
                self.heartbeat(now);
                Control::Continue
            }
            OpCode::Reconnect => {
                tracing::info!(shard_id = self.shard.id(), "Server requested reconnect");
                Control::Close(CloseReason::ReconnectRequested)
            }
            OpCode::InvalidSession => {
                let resumable = message.as_invalid_session().unwrap_or(false);
                self.on_invalid_session(resumable, now)
            }
            OpCode::HeartbeatAck => {
                self.shard.record_heartbeat_ack(now);
                self.awaiting_ack_since = None;
                if self.shard.state() == ConnectionState::Preready {
                    self.go_online("heartbeat_ack");
                }
                Control::Continue
            }
            OpCode::Identify | OpCode::Resume | OpCode::PresenceUpdate => {
                tracing::debug!(shard_id = self.shard.id(), op = %message.op, "Ignoring client-only op code");
                Control::Continue
            }
        }
    }

    /// Handle a timer wake-up
    pub fn on_timer(&mut self, now: Instant) -> Control {
        if self.pending_identify_at.is_some_and(|at| now >= at) {
            self.pending_identify_at = None;
            self.identify(now);
        }

        if let Some(deadline) = self.ack_deadline() {
            if now >= deadline {
                tracing::warn!(
                    shard_id = self.shard.id(),
                    interval_ms = self.heartbeat_interval.map(|i| i.as_millis() as u64),
                    "Heartbeat not acknowledged, connection is a zombie"
                );
                return Control::Close(CloseReason::HeartbeatTimeout);
            }
        } else if self.next_heartbeat_at.is_some_and(|at| now >= at) {
            self.heartbeat(now);
        }

        Control::Continue
    }

    /// Earliest instant `on_timer` has work to do
    pub fn next_deadline(&self) -> Option<Instant> {
        // While an ACK is outstanding the next heartbeat waits for it
        let heartbeat = match self.ack_deadline() {
            Some(deadline) => Some(deadline),
            None => self.next_heartbeat_at,
        };

        [heartbeat, self.pending_identify_at].into_iter().flatten().min()
    }

    /// Queue a frame for the paced flush
    pub fn enqueue(&mut self, message: GatewayMessage) {
        self.write_queue.push_back(message);
    }

    /// Write a frame on the next loop iteration
    pub fn send_now(&mut self, message: GatewayMessage) {
        self.outbox.push(message);
    }

    /// Frames that must be written right away
    pub fn take_outbox(&mut self) -> Vec<GatewayMessage> {
        std::mem::take(&mut self.outbox)
    }

    /// Up to `batch` queued frames; nothing until the handshake completes
    pub fn drain_batch(&mut self, batch: usize) -> Vec<GatewayMessage> {
        if !self.shard.is_online() {
            return Vec::new();
        }
        let n = batch.min(self.write_queue.len());
        self.write_queue.drain(..n).collect()
    }

    pub fn queued(&self) -> usize {
        self.write_queue.len()
    }

    fn ack_deadline(&self) -> Option<Instant> {
        let sent = self.awaiting_ack_since?;
        let interval = self.heartbeat_interval?;
        Some(sent + interval.mul_f64(self.ctx.sharding.ack_timeout_factor))
    }

    fn on_hello(&mut self, message: &GatewayMessage, now: Instant) -> Control {
        let Some(hello) = message.as_hello() else {
            tracing::warn!(shard_id = self.shard.id(), "Hello without a heartbeat interval");
            return Control::Continue;
        };

        let interval = Duration::from_millis(hello.heartbeat_interval.max(1));
        self.heartbeat_interval = Some(interval);
        self.next_heartbeat_at = Some(now + interval);
        self.awaiting_ack_since = None;
        self.shard.set_heartbeat_interval(interval);

        tracing::debug!(
            shard_id = self.shard.id(),
            heartbeat_interval_ms = hello.heartbeat_interval,
            "Hello received"
        );

        if !self.resume() {
            self.identify(now);
        }
        Control::Continue
    }

    fn on_dispatch(&mut self, message: GatewayMessage) -> Control {
        if let Some(sequence) = message.s {
            if !self.shard.record_sequence(sequence) {
                tracing::debug!(
                    shard_id = self.shard.id(),
                    sequence,
                    current = self.shard.sequence(),
                    "Stale sequence ignored"
                );
            }
        }

        let kind = GatewayEventType::from_name(message.event_name().unwrap_or_default());

        match kind {
            GatewayEventType::Ready => {
                if let Some(ready) = message.as_ready() {
                    tracing::info!(
                        shard_id = self.shard.id(),
                        session_id = %ready.session_id,
                        "Session established"
                    );
                    self.shard.set_session(ready.session_id, ready.resume_gateway_url);
                }
                self.go_online("ready");
            }
            GatewayEventType::Resumed => {
                tracing::info!(
                    shard_id = self.shard.id(),
                    sequence = self.shard.sequence(),
                    "Session resumed"
                );
                self.go_online("resumed");
            }
            _ => {}
        }

        let event = DispatchEvent {
            shard_id: self.shard.id(),
            kind,
            sequence: message.s,
            data: message.d,
        };
        let router = Arc::clone(&self.ctx.router);
        tokio::spawn(async move {
            router.dispatch(event).await;
        });

        Control::Continue
    }

    fn on_invalid_session(&mut self, resumable: bool, now: Instant) -> Control {
        if resumable && self.resume() {
            tracing::info!(shard_id = self.shard.id(), "Invalid session (resumable), resuming");
            return Control::Continue;
        }

        self.shard.clear_session();
        self.shard.set_state(ConnectionState::Preready);

        let delay = self.identify_jitter();
        self.pending_identify_at = Some(now + delay);

        tracing::warn!(
            shard_id = self.shard.id(),
            delay_ms = delay.as_millis() as u64,
            "Invalid session, re-identifying after delay"
        );
        Control::Continue
    }

    /// Send Resume if a session survives; false if there is none
    fn resume(&mut self) -> bool {
        let Some(session_id) = self.shard.session_id() else {
            return false;
        };

        let sequence = self.shard.sequence();
        tracing::info!(shard_id = self.shard.id(), sequence, "Resuming session");
        self.outbox
            .push(encode_resume(&self.ctx.gateway.token, &session_id, sequence));
        true
    }

    fn identify(&mut self, now: Instant) {
        tracing::info!(
            shard_id = self.shard.id(),
            shard_count = self.shard.total(),
            "Identifying"
        );

        let presence = self.shard.presence();
        self.outbox.push(encode_identify(
            &self.ctx.gateway,
            self.shard.id(),
            self.shard.total(),
            presence.as_ref(),
        ));
        self.ctx.identify_clock.record(now);
    }

    fn heartbeat(&mut self, now: Instant) {
        self.outbox.push(encode_heartbeat(self.shard.sequence()));
        self.shard.record_heartbeat_sent(now);
        self.awaiting_ack_since.get_or_insert(now);
        if let Some(interval) = self.heartbeat_interval {
            self.next_heartbeat_at = Some(now + interval);
        }
    }

    fn go_online(&self, via: &'static str) {
        if self.shard.state() != ConnectionState::Online {
            tracing::info!(shard_id = self.shard.id(), via, "Shard online");
            self.shard.set_state(ConnectionState::Online);
        }
    }

    fn identify_jitter(&self) -> Duration {
        let min = self.ctx.sharding.invalid_session_delay_min;
        let max = self.ctx.sharding.invalid_session_delay_max;
        if max <= min {
            return min;
        }
        rand::thread_rng().gen_range(min..=max)
    }
}

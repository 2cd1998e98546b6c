//! Connection task
//!
//! One task per live socket. It owns the socket halves, the frame decoder,
//! the [`ShardSession`] and the write-flush timer, and reports back to the
//! manager when the connection ends.

use super::manager::ManagerEvent;
use super::scheduler::IdentifyClock;
use super::session::{Control, ShardSession};
use super::shard::{ShardCommand, ShardLink};
use super::{CloseReason, ConnectionState, Shard};
use crate::codec::{CodecError, FrameDecoder};
use crate::events::EventRouter;
use crate::protocol::GatewayMessage;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use shardline_common::{GatewayConfig, ShardingConfig};
use std::borrow::Cow;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::{interval_at, sleep_until, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode as WsCloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::Instrument;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, WsMessage>;

/// Wake-up used when the session has no timer armed
const IDLE_WAKE: Duration = Duration::from_secs(60);

/// Everything a connection task needs besides its shard
#[derive(Clone)]
pub(crate) struct ShardContext {
    pub gateway: Arc<GatewayConfig>,
    pub sharding: Arc<ShardingConfig>,
    pub router: Arc<dyn EventRouter>,
    pub identify_clock: Arc<IdentifyClock>,
    pub events: mpsc::UnboundedSender<ManagerEvent>,
}

/// Start a connection attempt for `shard`
pub(crate) fn spawn(shard: &Arc<Shard>, ctx: ShardContext) {
    let attempt = shard.begin_attempt();
    let (commands_tx, commands_rx) = mpsc::unbounded_channel();
    shard.set_state(ConnectionState::Connecting);

    let shard_id = shard.id();
    let task_shard = Arc::clone(shard);
    let events = ctx.events.clone();

    let task = tokio::spawn(
        async move {
            let reason = run(&task_shard, ctx, commands_rx).await;
            tracing::info!(reason = %reason, "Connection ended");
            let _ = events.send(ManagerEvent::Closed {
                shard_id,
                attempt,
                reason,
            });
        }
        .instrument(tracing::info_span!("shard", shard_id, attempt)),
    );

    shard.attach(ShardLink {
        commands: commands_tx,
        task,
    });
}

async fn run(
    shard: &Arc<Shard>,
    ctx: ShardContext,
    mut commands: mpsc::UnboundedReceiver<ShardCommand>,
) -> CloseReason {
    let base = match (shard.session_id(), shard.resume_url()) {
        (Some(_), Some(resume_url)) => resume_url,
        _ => ctx.gateway.url.clone(),
    };
    let url = ctx.gateway.connect_url(&base);

    tracing::debug!(url = %url, "Connecting");

    let socket = match connect_async(url.as_str()).await {
        Ok((socket, _response)) => socket,
        Err(e) => {
            tracing::warn!(error = %e, "Connect failed");
            return CloseReason::ConnectFailed(e.to_string());
        }
    };

    let opened_at = Instant::now();
    shard.mark_connected(opened_at);
    tracing::debug!("Socket open");

    let (mut sink, mut stream) = socket.split();
    let mut decoder = FrameDecoder::new(ctx.gateway.compress);
    let flush_every = ctx.sharding.flush_interval;
    let flush_batch = ctx.sharding.flush_batch;
    let mut session = ShardSession::new(Arc::clone(shard), ctx);

    let mut flush = interval_at(opened_at + flush_every, flush_every);
    flush.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let wake_at = session
            .next_deadline()
            .unwrap_or_else(|| Instant::now() + IDLE_WAKE);

        let control = tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(WsMessage::Binary(bytes))) => {
                    on_decoded(&mut session, decoder.decode_binary(&bytes))
                }
                Some(Ok(WsMessage::Text(text))) => {
                    on_decoded(&mut session, decoder.decode_text(&text).map(Some))
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let code = frame.map(|f| u16::from(f.code));
                    tracing::info!(code = ?code, "Server closed connection");
                    return CloseReason::ServerClosed(code);
                }
                // Ping/pong are answered by tungstenite
                Some(Ok(_)) => Control::Continue,
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "WebSocket error");
                    return CloseReason::Transport(e.to_string());
                }
                None => return CloseReason::StreamEnded,
            },
            () = sleep_until(wake_at) => session.on_timer(Instant::now()),
            _ = flush.tick() => {
                for message in session.drain_batch(flush_batch) {
                    if let Err(reason) = write(&mut sink, &message).await {
                        return reason;
                    }
                }
                Control::Continue
            }
            command = commands.recv() => match command {
                Some(ShardCommand::Send(message)) => {
                    session.enqueue(message);
                    Control::Continue
                }
                Some(ShardCommand::SendNow(message)) => {
                    session.send_now(message);
                    Control::Continue
                }
                Some(ShardCommand::Close(code)) => Control::Close(CloseReason::Requested(code)),
                // Handle dropped by the manager
                None => Control::Close(CloseReason::Requested(WsCloseCode::Away.into())),
            },
        };

        for message in session.take_outbox() {
            if let Err(reason) = write(&mut sink, &message).await {
                return reason;
            }
        }

        if let Control::Close(reason) = control {
            shard.set_state(ConnectionState::Closing);
            close(&mut sink, reason.outbound_code()).await;
            return reason;
        }
    }
}

fn on_decoded(
    session: &mut ShardSession,
    decoded: Result<Option<GatewayMessage>, CodecError>,
) -> Control {
    match decoded {
        Ok(Some(message)) => session.on_message(message, Instant::now()),
        Ok(None) => Control::Continue,
        Err(e) => {
            tracing::warn!(error = %e, "Dropping undecodable frame");
            Control::Continue
        }
    }
}

async fn write(sink: &mut WsSink, message: &GatewayMessage) -> Result<(), CloseReason> {
    let json = match message.to_json() {
        Ok(json) => json,
        Err(e) => {
            tracing::error!(op = %message.op, error = %e, "Failed to encode frame");
            return Ok(());
        }
    };

    tracing::trace!(op = %message.op, "Sending");

    sink.send(WsMessage::Text(json)).await.map_err(|e| {
        tracing::warn!(error = %e, "Write failed");
        CloseReason::Transport(e.to_string())
    })
}

async fn close(sink: &mut WsSink, code: u16) {
    let frame = CloseFrame {
        code: WsCloseCode::from(code),
        reason: Cow::Borrowed(""),
    };
    if let Err(e) = sink.send(WsMessage::Close(Some(frame))).await {
        tracing::debug!(error = %e, "Close frame not delivered");
    }
}

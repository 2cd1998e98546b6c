//! Gateway error types

use crate::protocol::CloseCode;
use std::fmt;
use thiserror::Error;

/// Errors returned to code calling into the gateway
///
/// Connection faults never surface here; they only move shards through
/// their lifecycle.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Shard {0} is not connected")]
    NotConnected(u32),

    #[error("Unknown shard {0}")]
    UnknownShard(u32),

    #[error("Shard manager already started")]
    AlreadyStarted,

    #[error("Shard manager is shutting down")]
    ShuttingDown,

    #[error("Invalid presence status: {0}")]
    InvalidPresence(String),
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;

/// Why a shard's connection ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Websocket/TLS connect failed
    ConnectFailed(String),
    /// Read or write error on an open socket
    Transport(String),
    /// Stream ended without a close frame
    StreamEnded,
    /// Server sent a close frame
    ServerClosed(Option<u16>),
    /// Server sent op 7
    ReconnectRequested,
    /// No heartbeat ACK in time
    HeartbeatTimeout,
    /// Closed locally with the given code
    Requested(u16),
}

impl CloseReason {
    /// Gateway close code, when the server supplied a known one
    #[must_use]
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::ServerClosed(Some(code)) => CloseCode::try_from(*code).ok(),
            _ => None,
        }
    }

    /// Reconnecting cannot succeed without operator action
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.close_code().is_some_and(CloseCode::is_fatal)
    }

    /// The session can no longer be resumed
    #[must_use]
    pub fn invalidates_session(&self) -> bool {
        match self {
            // A normal close from our side ends the session server-side
            Self::Requested(1000 | 1001) => true,
            _ => self.close_code().is_some_and(CloseCode::invalidates_session),
        }
    }

    /// Code to send when this side closes the socket
    #[must_use]
    pub(crate) fn outbound_code(&self) -> u16 {
        match self {
            Self::Requested(code) => *code,
            _ => CloseCode::UnknownError.as_u16(),
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            Self::Transport(e) => write!(f, "transport error: {e}"),
            Self::StreamEnded => f.write_str("stream ended"),
            Self::ServerClosed(Some(code)) => match CloseCode::try_from(*code).ok() {
                Some(known) => write!(f, "server closed: {known}"),
                None => write!(f, "server closed: {code}"),
            },
            Self::ServerClosed(None) => f.write_str("server closed"),
            Self::ReconnectRequested => f.write_str("reconnect requested"),
            Self::HeartbeatTimeout => f.write_str("heartbeat ack timeout"),
            Self::Requested(code) => write!(f, "closed locally ({code})"),
        }
    }
}

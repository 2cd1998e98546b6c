//! Shard connection state

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle of one shard's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// Constructed, never connected
    #[default]
    Uninitialized,
    /// Socket connect in progress
    Connecting,
    /// Socket open, handshake not yet acknowledged
    Preready,
    /// Handshake acknowledged, events flowing
    Online,
    /// Socket lost, waiting in the connect queue
    Reconnecting,
    /// Close initiated by this side
    Closing,
    /// Closed and not queued for reconnection
    Closed,
    /// Terminal; the manager is shutting down
    Shutdown,
}

impl ConnectionState {
    /// Socket is open (handshaking or online)
    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Preready | Self::Online)
    }

    /// No further transitions will happen
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Shutdown)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Uninitialized => "uninitialized",
            Self::Connecting => "connecting",
            Self::Preready => "preready",
            Self::Online => "online",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Closed => "closed",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

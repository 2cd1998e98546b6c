//! Handshake and command payloads
//!
//! The `d` field of Hello, Identify, Resume, Presence Update and READY.

use super::Intents;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Payload for op 10 (Hello)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds
    pub heartbeat_interval: u64,
}

/// Payload for op 2 (Identify)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdentifyPayload {
    /// Bot token
    pub token: String,

    /// Client connection properties
    pub properties: IdentifyProperties,

    /// `[shard_id, shard_count]`
    pub shard: [u32; 2],

    /// Per-payload compression; transport compression is negotiated in the URL
    pub compress: bool,

    /// Member count above which offline members are not sent
    pub large_threshold: u32,

    /// Initial presence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence: Option<PresenceUpdatePayload>,

    /// Requested event groups
    pub intents: Intents,
}

/// Client connection properties
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IdentifyProperties {
    #[serde(rename = "$os")]
    pub os: String,

    #[serde(rename = "$browser")]
    pub browser: String,

    #[serde(rename = "$device")]
    pub device: String,
}

impl IdentifyProperties {
    #[must_use]
    pub fn new(
        os: impl Into<String>,
        browser: impl Into<String>,
        device: impl Into<String>,
    ) -> Self {
        Self {
            os: os.into(),
            browser: browser.into(),
            device: device.into(),
        }
    }
}

/// Payload for op 3 (Presence Update), also embedded in Identify
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceUpdatePayload {
    /// Unix time (ms) the client went idle, if idle
    pub since: Option<u64>,

    /// Activities, passed through untouched
    #[serde(default)]
    pub activities: Vec<Value>,

    /// online, idle, dnd, invisible or offline
    pub status: String,

    pub afk: bool,
}

impl PresenceUpdatePayload {
    /// Valid status values
    pub const VALID_STATUSES: &'static [&'static str] =
        &["online", "idle", "dnd", "invisible", "offline"];

    /// Plain presence with the given status and no activities
    #[must_use]
    pub fn with_status(status: impl Into<String>) -> Self {
        Self {
            since: None,
            activities: Vec::new(),
            status: status.into(),
            afk: false,
        }
    }

    /// Check if the status is valid
    #[must_use]
    pub fn is_valid_status(&self) -> bool {
        Self::VALID_STATUSES.contains(&self.status.as_str())
    }
}

/// Payload for op 6 (Resume)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumePayload {
    /// Bot token
    pub token: String,

    /// Session ID to resume
    pub session_id: String,

    /// Last received sequence number
    pub seq: u64,
}

/// The fields of the READY dispatch the shard itself needs
///
/// Everything else in READY is left to the event router.
#[derive(Debug, Clone, Deserialize)]
pub struct ReadyPayload {
    /// Gateway version
    #[serde(default)]
    pub v: u8,

    /// Session to resume after a disconnect
    pub session_id: String,

    /// URL to use when resuming this session
    #[serde(default)]
    pub resume_gateway_url: Option<String>,

    /// `[shard_id, shard_count]` echoed back
    #[serde(default)]
    pub shard: Option<[u32; 2]>,
}

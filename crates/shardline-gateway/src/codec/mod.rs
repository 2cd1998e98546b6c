//! Gateway codec
//!
//! Inbound: websocket frames, optionally zlib-stream compressed, into
//! [`GatewayMessage`] envelopes. Outbound: the handshake and heartbeat
//! envelopes a shard sends.
//!
//! Decode failures are recoverable: the caller drops the frame and keeps
//! reading.

mod inflate;

pub use inflate::{ZlibStreamDecoder, MAX_BUFFERED_BYTES, SYNC_MARKER};

use crate::protocol::{
    GatewayMessage, IdentifyPayload, IdentifyProperties, Intents, PresenceUpdatePayload,
    ResumePayload,
};
use shardline_common::GatewayConfig;

/// Frame decoding errors
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("Inflate failed: {0}")]
    Inflate(#[from] flate2::DecompressError),

    #[error("Invalid JSON envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Compressed message exceeded {0} bytes without a sync marker")]
    Overflow(usize),
}

/// Per-connection frame decoder
///
/// Owns the inflate context when the connection negotiated zlib-stream, so a
/// fresh decoder must be created for every socket.
#[derive(Debug)]
pub struct FrameDecoder {
    inflater: Option<ZlibStreamDecoder>,
}

impl FrameDecoder {
    #[must_use]
    pub fn new(compressed: bool) -> Self {
        Self {
            inflater: compressed.then(ZlibStreamDecoder::new),
        }
    }

    /// Decode a binary frame
    ///
    /// Returns `Ok(None)` while a compressed message is still incomplete.
    pub fn decode_binary(&mut self, frame: &[u8]) -> Result<Option<GatewayMessage>, CodecError> {
        match &mut self.inflater {
            Some(inflater) => match inflater.push(frame)? {
                Some(payload) => Ok(Some(GatewayMessage::from_slice(&payload)?)),
                None => Ok(None),
            },
            None => Ok(Some(GatewayMessage::from_slice(frame)?)),
        }
    }

    /// Decode a text frame (never compressed)
    pub fn decode_text(&self, text: &str) -> Result<GatewayMessage, CodecError> {
        Ok(GatewayMessage::from_json(text)?)
    }
}

/// Build an Identify envelope for `[shard_id, shard_count]`
#[must_use]
pub fn encode_identify(
    config: &GatewayConfig,
    shard_id: u32,
    shard_count: u32,
    presence: Option<&PresenceUpdatePayload>,
) -> GatewayMessage {
    GatewayMessage::identify(&IdentifyPayload {
        token: config.token.clone(),
        properties: IdentifyProperties::new(&config.os, &config.browser, &config.device),
        shard: [shard_id, shard_count],
        compress: false,
        large_threshold: config.large_threshold,
        presence: presence.cloned(),
        intents: Intents::from_bits_truncate(config.intents),
    })
}

/// Build a Resume envelope
#[must_use]
pub fn encode_resume(token: &str, session_id: &str, sequence: u64) -> GatewayMessage {
    GatewayMessage::resume(&ResumePayload {
        token: token.to_string(),
        session_id: session_id.to_string(),
        seq: sequence,
    })
}

/// Build a Heartbeat envelope
#[must_use]
pub fn encode_heartbeat(sequence: u64) -> GatewayMessage {
    GatewayMessage::heartbeat(sequence)
}

//! Dispatch events
//!
//! Event names resolved once at decode time, and the router seam that
//! receives every dispatch a shard decodes.

mod event_types;
mod router;

pub use event_types::GatewayEventType;
pub use router::{ChannelRouter, DispatchEvent, EventRouter, LoggingRouter};

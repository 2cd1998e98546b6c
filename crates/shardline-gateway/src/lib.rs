//! # shardline-gateway
//!
//! Sharded gateway client: zlib-stream codec, per-shard protocol state
//! machine, and a shard manager that paces identifies across shards.

pub mod app;
pub mod codec;
pub mod events;
pub mod protocol;
pub mod shard;

pub use app::run;
pub use events::{ChannelRouter, DispatchEvent, EventRouter, GatewayEventType, LoggingRouter};
pub use shard::{
    shard_id_for_guild, CloseReason, ConnectionState, GatewayError, GatewayResult, ManagerStats,
    Shard, ShardManager, ShardStats,
};

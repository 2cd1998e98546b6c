//! Shards and the shard manager
//!
//! A [`Shard`] is the long-lived handle for one slice of the bot's guilds.
//! The [`ShardManager`] owns all of them and decides when each one may
//! connect; a short-lived connection task drives the protocol for each
//! socket.

mod error;
mod manager;
mod runner;
mod scheduler;
mod session;
mod shard;
mod state;

pub use error::{CloseReason, GatewayError, GatewayResult};
pub use manager::{shard_id_for_guild, ManagerStats, ShardManager};
pub use shard::{Shard, ShardStats};
pub use state::ConnectionState;

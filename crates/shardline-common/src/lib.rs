//! # shardline-common
//!
//! Shared utilities including configuration, error handling, telemetry, and ids.

pub mod config;
pub mod error;
pub mod snowflake;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use config::{
    AppConfig, AppSettings, ConfigError, Environment, GatewayConfig, RestConfig, ShardingConfig,
};
pub use error::{AppError, AppResult};
pub use snowflake::{Snowflake, SnowflakeParseError};
pub use telemetry::{
    try_init_tracing, try_init_tracing_with_config, TracingConfig, TracingError,
};

//! Shardline entry point
//!
//! Run with:
//! ```bash
//! SHARDLINE_TOKEN=... cargo run -p shardline-gateway --bin shardline
//! ```
//!
//! Configuration is loaded from environment variables (and `.env`).

use shardline_common::{try_init_tracing_with_config, AppConfig, TracingConfig};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Load configuration first; it selects the log format
    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = try_init_tracing_with_config(TracingConfig::for_environment(config.app.env)) {
        eprintln!("Warning: Failed to initialize tracing: {e}");
    }

    info!(
        env = ?config.app.env,
        shard_count = config.gateway.shard_count,
        intents = config.gateway.intents,
        "Configuration loaded"
    );

    if let Err(e) = shardline_gateway::run(config).await {
        error!(error = %e, code = e.error_code(), "Shardline stopped with an error");
        std::process::exit(1);
    }
}

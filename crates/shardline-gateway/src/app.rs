//! Process wiring for the `shardline` binary

use crate::events::{EventRouter, LoggingRouter};
use crate::shard::ShardManager;
use shardline_common::{AppConfig, AppError, AppResult};
use shardline_rest::RestClient;
use std::sync::Arc;

/// Fill in the shard count from `GET /gateway/bot` when configured as 0
pub async fn resolve_shard_count(config: &mut AppConfig, rest: &RestClient) -> AppResult<()> {
    if config.gateway.shard_count != 0 {
        return Ok(());
    }

    let bot = rest.get_gateway_bot().await.map_err(|e| {
        if e.is_fatal() {
            AppError::InvalidToken
        } else {
            AppError::rest(e)
        }
    })?;

    config.gateway.shard_count = bot.shards.max(1);
    tracing::info!(shard_count = config.gateway.shard_count, "Using recommended shard count");
    Ok(())
}

/// Start every shard and run until Ctrl-C
pub async fn run(mut config: AppConfig) -> AppResult<()> {
    let rest = RestClient::new(&config.rest).map_err(AppError::rest)?;
    resolve_shard_count(&mut config, &rest).await?;

    let router: Arc<dyn EventRouter> = Arc::new(LoggingRouter);
    let manager = ShardManager::new(config.gateway, config.sharding, router);
    manager.start().map_err(AppError::gateway)?;

    tokio::signal::ctrl_c()
        .await
        .map_err(AppError::internal)?;

    tracing::info!("Shutdown signal received");
    manager.shutdown().await;
    rest.shutdown();

    Ok(())
}

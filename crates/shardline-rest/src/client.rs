//! REST client
//!
//! Thin typed layer over the [`RateLimiter`]: builds requests, waits for
//! them and decodes the body.

use crate::error::RestResult;
use crate::ratelimit::RateLimiter;
use crate::transport::{Method, ReqwestTransport, RestRequest, RestResponse, Transport};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use shardline_common::{RestConfig, Snowflake};
use std::sync::Arc;

/// `GET /gateway/bot`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayBot {
    pub url: String,
    /// Recommended shard count
    pub shards: u32,
    pub session_start_limit: SessionStartLimit,
}

/// Identify budget for the bot
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SessionStartLimit {
    pub total: u32,
    pub remaining: u32,
    /// Milliseconds until `remaining` refills
    pub reset_after: u64,
    /// Shards allowed to identify in the same pacing slot
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: u32,
}

fn default_max_concurrency() -> u32 {
    1
}

/// Rate-limited REST client
#[derive(Debug, Clone)]
pub struct RestClient {
    limiter: Arc<RateLimiter>,
}

impl RestClient {
    /// Client over HTTPS with the configured token
    pub fn new(config: &RestConfig) -> RestResult<Self> {
        let transport = ReqwestTransport::new(config)?;
        Ok(Self::with_transport(
            Arc::new(transport),
            config.max_rate_limit_retries,
        ))
    }

    pub fn with_transport(transport: Arc<dyn Transport>, max_rate_limit_retries: u32) -> Self {
        Self {
            limiter: Arc::new(RateLimiter::new(transport, max_rate_limit_retries)),
        }
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Send a request through its bucket and return the raw response
    pub async fn request(&self, request: RestRequest) -> RestResult<RestResponse> {
        self.limiter.submit(request).await
    }

    /// Send a request and decode the JSON body
    pub async fn request_json<T: DeserializeOwned>(&self, request: RestRequest) -> RestResult<T> {
        self.request(request).await?.json()
    }

    /// Gateway URL and recommended shard count
    pub async fn get_gateway_bot(&self) -> RestResult<GatewayBot> {
        let bot: GatewayBot = self.request_json(RestRequest::get("/gateway/bot")).await?;
        tracing::info!(
            url = %bot.url,
            shards = bot.shards,
            remaining = bot.session_start_limit.remaining,
            "Fetched gateway info"
        );
        Ok(bot)
    }

    pub async fn create_message(&self, channel_id: Snowflake, content: &str) -> RestResult<Value> {
        let request = RestRequest::new(Method::POST, format!("/channels/{channel_id}/messages"))
            .with_body(json!({ "content": content }));
        self.request_json(request).await
    }

    pub async fn edit_message(
        &self,
        channel_id: Snowflake,
        message_id: Snowflake,
        content: &str,
    ) -> RestResult<Value> {
        let request = RestRequest::new(
            Method::PATCH,
            format!("/channels/{channel_id}/messages/{message_id}"),
        )
        .with_body(json!({ "content": content }));
        self.request_json(request).await
    }

    pub async fn delete_message(&self, channel_id: Snowflake, message_id: Snowflake) -> RestResult<()> {
        let request = RestRequest::new(
            Method::DELETE,
            format!("/channels/{channel_id}/messages/{message_id}"),
        );
        self.request(request).await.map(|_| ())
    }

    /// Drop queued requests; see [`RateLimiter::shutdown`]
    pub fn shutdown(&self) {
        self.limiter.shutdown();
    }
}

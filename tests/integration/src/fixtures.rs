//! Test fixtures
//!
//! Configuration tuned for fast tests and canned gateway payloads.

use serde_json::{json, Value};
use shardline_common::{GatewayConfig, RestConfig, ShardingConfig};
use std::time::Duration;

pub const TEST_TOKEN: &str = "test-token";

/// Session id handed out by the mock gateway's READY
pub const MOCK_SESSION_ID: &str = "mock-session";

/// Gateway config pointing at `url`
pub fn gateway_config(url: &str, shard_count: u32) -> GatewayConfig {
    GatewayConfig {
        token: TEST_TOKEN.to_string(),
        url: url.to_string(),
        shard_count,
        intents: 513,
        ..GatewayConfig::default()
    }
}

/// Same pacing rules as production, on a much shorter clock
pub fn fast_sharding() -> ShardingConfig {
    ShardingConfig {
        identify_interval: Duration::from_millis(100),
        connect_timeout: Duration::from_secs(3),
        sweep_interval: Duration::from_millis(10),
        liveness_timeout: Duration::from_secs(10),
        flush_interval: Duration::from_millis(20),
        flush_batch: 1,
        ack_timeout_factor: 1.5,
        invalid_session_delay_min: Duration::from_millis(10),
        invalid_session_delay_max: Duration::from_millis(30),
    }
}

/// REST config pointing at `base_url`
pub fn rest_config(base_url: &str) -> RestConfig {
    RestConfig {
        token: TEST_TOKEN.to_string(),
        base_url: base_url.to_string(),
        max_rate_limit_retries: 3,
        request_timeout: Duration::from_secs(5),
        ..RestConfig::default()
    }
}

pub fn hello(heartbeat_interval: u64) -> Value {
    json!({"op": 10, "d": {"heartbeat_interval": heartbeat_interval}})
}

pub fn dispatch(event: &str, sequence: u64, data: Value) -> Value {
    json!({"op": 0, "t": event, "s": sequence, "d": data})
}

pub fn ready(resume_url: &str, shard: &Value) -> Value {
    json!({
        "v": 10,
        "session_id": MOCK_SESSION_ID,
        "resume_gateway_url": resume_url,
        "shard": shard,
        "user": {"id": "1", "username": "shardline-test"},
        "guilds": []
    })
}

pub fn heartbeat_ack() -> Value {
    json!({"op": 11})
}

pub fn reconnect_request() -> Value {
    json!({"op": 7, "d": null})
}

pub fn invalid_session(resumable: bool) -> Value {
    json!({"op": 9, "d": resumable})
}

pub fn gateway_bot(shards: u32) -> Value {
    json!({
        "url": "wss://gateway.example",
        "shards": shards,
        "session_start_limit": {
            "total": 1000,
            "remaining": 999,
            "reset_after": 14_400_000,
            "max_concurrency": 1
        }
    })
}

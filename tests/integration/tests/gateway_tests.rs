//! Gateway integration tests
//!
//! Drive a real `ShardManager` against the in-process mock gateway.
//!
//! Run with: `cargo test -p integration-tests --test gateway_tests`

use integration_tests::*;
use serde_json::json;
use shardline_gateway::protocol::{OpCode, PresenceUpdatePayload};
use shardline_gateway::{
    ChannelRouter, ConnectionState, EventRouter, GatewayEventType, LoggingRouter, ShardManager,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

fn manager(gateway: &MockGateway, shard_count: u32) -> ShardManager {
    manager_with_router(gateway, shard_count, Arc::new(LoggingRouter))
}

fn manager_with_router(
    gateway: &MockGateway,
    shard_count: u32,
    router: Arc<dyn EventRouter>,
) -> ShardManager {
    ShardManager::new(
        gateway_config(&gateway.url(), shard_count),
        fast_sharding(),
        router,
    )
}

async fn wait_online(manager: &ShardManager, shard_id: u32) -> bool {
    let Some(shard) = manager.shard(shard_id) else {
        return false;
    };
    wait_until(WAIT, || shard.is_online()).await
}

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn test_shard_identifies_over_compressed_stream() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway, 1);
    manager.start().unwrap();

    let (_, compressed) = gateway.expect_connection(WAIT).await.unwrap();
    assert!(compressed);

    let (_, identify, _) = gateway.expect_op(OpCode::Identify, WAIT).await.unwrap();
    assert_eq!(identify.d["token"], TEST_TOKEN);
    assert_eq!(identify.d["shard"], json!([0, 1]));
    assert_eq!(identify.d["intents"], 513);
    assert_eq!(identify.d["compress"], false);
    assert_eq!(identify.d["properties"]["$browser"], "shardline");

    assert!(wait_online(&manager, 0).await);
    let shard = manager.shard(0).unwrap();
    assert_eq!(shard.session_id().as_deref(), Some(MOCK_SESSION_ID));
    assert_eq!(shard.sequence(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_shard_identifies_over_plain_text() {
    let mut gateway = MockGateway::start().await.unwrap();
    let mut config = gateway_config(&gateway.url(), 1);
    config.compress = false;
    let manager = ShardManager::new(config, fast_sharding(), Arc::new(LoggingRouter));
    manager.start().unwrap();

    let (_, compressed) = gateway.expect_connection(WAIT).await.unwrap();
    assert!(!compressed);
    assert!(wait_online(&manager, 0).await);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_messages_split_across_frames() {
    let gateway = MockGateway::start_with(MockGatewayOptions {
        split_frames: true,
        ..MockGatewayOptions::default()
    })
    .await
    .unwrap();
    let manager = manager(&gateway, 1);
    manager.start().unwrap();

    assert!(wait_online(&manager, 0).await);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_ready_reaches_router() {
    let gateway = MockGateway::start().await.unwrap();
    let (router, mut events) = ChannelRouter::new();
    let manager = manager_with_router(&gateway, 1, Arc::new(router));
    manager.start().unwrap();

    let event = timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.shard_id, 0);
    assert_eq!(event.kind, GatewayEventType::Ready);
    assert_eq!(event.sequence, Some(1));
    assert_eq!(event.data["session_id"], MOCK_SESSION_ID);

    manager.shutdown().await;
}

// =============================================================================
// Connect pacing
// =============================================================================

#[tokio::test]
async fn test_shards_identify_one_at_a_time() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = Arc::new(manager(&gateway, 3));
    manager.start().unwrap();

    // Sample the shard states while the manager works through the queue
    let sampler = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move {
            let mut max_connecting = 0;
            for _ in 0..200 {
                let connecting = manager
                    .shards()
                    .iter()
                    .filter(|s| s.state() == ConnectionState::Connecting)
                    .count();
                max_connecting = max_connecting.max(connecting);
                if manager.shards().iter().all(|s| s.is_online()) {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            max_connecting
        })
    };

    let mut identifies = Vec::new();
    for _ in 0..3 {
        let (_, identify, at) = gateway.expect_op(OpCode::Identify, WAIT).await.unwrap();
        identifies.push((identify.d["shard"][0].as_u64().unwrap(), at));
    }

    let order: Vec<u64> = identifies.iter().map(|(id, _)| *id).collect();
    assert_eq!(order, vec![0, 1, 2]);
    for pair in identifies.windows(2) {
        assert!(pair[1].1 - pair[0].1 >= Duration::from_millis(90));
    }

    assert!(sampler.await.unwrap() <= 1);
    for id in 0..3 {
        assert!(wait_online(&manager, id).await);
    }

    let stats = manager.stats();
    assert_eq!(stats.online, 3);
    assert!(stats.queued.is_empty());

    manager.shutdown().await;
}

// =============================================================================
// Heartbeats
// =============================================================================

#[tokio::test]
async fn test_heartbeats_are_acknowledged() {
    let mut gateway = MockGateway::start_with(MockGatewayOptions {
        heartbeat_interval: 100,
        ..MockGatewayOptions::default()
    })
    .await
    .unwrap();
    let manager = manager(&gateway, 1);
    manager.start().unwrap();

    let (_, heartbeat, _) = gateway.expect_op(OpCode::Heartbeat, WAIT).await.unwrap();
    assert_eq!(heartbeat.d, json!(1));

    let shard = manager.shard(0).unwrap();
    assert!(wait_until(WAIT, || shard.latency().is_some()).await);
    assert!(shard.is_online());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_missing_ack_forces_resume() {
    let mut gateway = MockGateway::start_with(MockGatewayOptions {
        heartbeat_interval: 100,
        ack_heartbeats: false,
        ..MockGatewayOptions::default()
    })
    .await
    .unwrap();
    let manager = manager(&gateway, 1);
    manager.start().unwrap();

    gateway.expect_op(OpCode::Identify, WAIT).await.unwrap();
    gateway.expect_disconnect(WAIT).await.unwrap();

    let (connection, resume, _) = gateway.expect_op(OpCode::Resume, WAIT).await.unwrap();
    assert_eq!(connection, 1);
    assert_eq!(resume.d["session_id"], MOCK_SESSION_ID);
    assert!(manager.shard(0).unwrap().reconnect_count() >= 1);

    manager.shutdown().await;
}

// =============================================================================
// Server-driven lifecycle
// =============================================================================

#[tokio::test]
async fn test_reconnect_request_resumes_session() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway, 1);
    manager.start().unwrap();
    assert!(wait_online(&manager, 0).await);

    gateway.command(ServerCommand::Send(reconnect_request()));

    let (connection, resume, _) = gateway.expect_op(OpCode::Resume, WAIT).await.unwrap();
    assert_eq!(connection, 1);
    assert_eq!(resume.d["session_id"], MOCK_SESSION_ID);
    assert_eq!(resume.d["seq"], 1);
    assert_eq!(resume.d["token"], TEST_TOKEN);

    // RESUMED brings the shard back and carries seq 2
    let shard = manager.shard(0).unwrap();
    assert!(wait_until(WAIT, || shard.is_online() && shard.sequence() == 2).await);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_invalid_session_reidentifies_on_same_socket() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway, 1);
    manager.start().unwrap();

    let (first, _, _) = gateway.expect_op(OpCode::Identify, WAIT).await.unwrap();
    assert!(wait_online(&manager, 0).await);

    gateway.command(ServerCommand::Send(invalid_session(false)));

    let (second, _, _) = gateway.expect_op(OpCode::Identify, WAIT).await.unwrap();
    assert_eq!(first, second);

    let shard = manager.shard(0).unwrap();
    assert!(wait_until(WAIT, || shard.is_online() && shard.session_id().is_some()).await);
    assert_eq!(shard.session_id().as_deref(), Some(MOCK_SESSION_ID));
    assert_eq!(gateway.connections(), 1);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_authentication_failure_is_fatal() {
    let gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway, 1);
    manager.start().unwrap();
    assert!(wait_online(&manager, 0).await);

    gateway.command(ServerCommand::Close(4004));

    let shard = manager.shard(0).unwrap();
    assert!(wait_until(WAIT, || shard.state() == ConnectionState::Closed).await);
    assert!(shard.session_id().is_none());

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(gateway.connections(), 1);
    assert!(manager.stats().queued.is_empty());

    manager.shutdown().await;
}

#[tokio::test]
async fn test_session_timeout_close_reidentifies() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway, 1);
    manager.start().unwrap();
    gateway.expect_op(OpCode::Identify, WAIT).await.unwrap();
    assert!(wait_online(&manager, 0).await);

    gateway.command(ServerCommand::Close(4009));

    let (connection, _, _) = gateway.expect_op(OpCode::Identify, WAIT).await.unwrap();
    assert_eq!(connection, 1);
    assert!(wait_online(&manager, 0).await);

    manager.shutdown().await;
}

// =============================================================================
// Outbound traffic and control
// =============================================================================

#[tokio::test]
async fn test_presence_update_goes_through_write_queue() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway, 1);
    manager.start().unwrap();
    assert!(wait_online(&manager, 0).await);

    manager
        .shard(0)
        .unwrap()
        .update_presence(PresenceUpdatePayload::with_status("idle"))
        .unwrap();

    let (_, presence, _) = gateway
        .expect_op(OpCode::PresenceUpdate, WAIT)
        .await
        .unwrap();
    assert_eq!(presence.d["status"], "idle");

    manager.shutdown().await;
}

#[tokio::test]
async fn test_manual_reconnect_keeps_session() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway, 1);
    manager.start().unwrap();
    assert!(wait_online(&manager, 0).await);

    manager.reconnect(0).unwrap();

    let (connection, resume, _) = gateway.expect_op(OpCode::Resume, WAIT).await.unwrap();
    assert_eq!(connection, 1);
    assert_eq!(resume.d["session_id"], MOCK_SESSION_ID);
    assert!(wait_online(&manager, 0).await);

    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_closes_every_socket() {
    let mut gateway = MockGateway::start().await.unwrap();
    let manager = manager(&gateway, 2);
    manager.start().unwrap();
    assert!(wait_online(&manager, 0).await);
    assert!(wait_online(&manager, 1).await);

    manager.shutdown().await;

    gateway.expect_disconnect(WAIT).await.unwrap();
    gateway.expect_disconnect(WAIT).await.unwrap();
    for shard in manager.shards() {
        assert_eq!(shard.state(), ConnectionState::Shutdown);
        assert!(shard.session_id().is_none());
    }

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(gateway.connections(), 2);
}

use crate::common::mocks::{MockPositionProvider, MockTransport};
use crate::common::{WAIT, wait_for_async};
use reel_signage::config::{LocationConfig, ServerConfig};
use reel_signage::location::LocationTracker;
use reel_signage::models::{DeviceId, Position};
use reel_signage::protocol::{
    ConnectionState, InboundCommand, LocationAck, OutboundMessage, ProtocolHandle,
    ProtocolHandler, RegistrationState,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

struct ProtocolContext {
    handle: ProtocolHandle,
    transport: Arc<MockTransport>,
    commands: mpsc::UnboundedReceiver<InboundCommand>,
    task: JoinHandle<()>,
}

impl ProtocolContext {
    async fn start(config: ServerConfig) -> Self {
        let transport = Arc::new(MockTransport::new());
        let (handle, handler) =
            ProtocolHandler::new(transport.clone(), DeviceId::new("bus-42"), config);
        let commands = handle.take_command_receiver().await.unwrap();
        let task = tokio::spawn(handler.run());

        let ctx = Self {
            handle,
            transport,
            commands,
            task,
        };
        let transport = &ctx.transport;
        assert!(wait_for_async(WAIT, || async move { transport.count_sent("register") == 1 }).await);
        ctx
    }

    async fn next_command(&mut self) -> InboundCommand {
        tokio::time::timeout(WAIT, self.commands.recv())
            .await
            .expect("no command routed")
            .expect("command stream closed")
    }

    async fn stop(self) {
        self.handle.shutdown();
        tokio::time::timeout(WAIT, self.task)
            .await
            .expect("handler did not stop")
            .unwrap();
    }
}

fn server_config() -> ServerConfig {
    ServerConfig {
        heartbeat_interval_secs: 1,
        reconnect_delay_secs: 0,
        ..ServerConfig::default()
    }
}

#[tokio::test]
async fn test_registers_on_connect_and_tracks_outcome() {
    let ctx = ProtocolContext::start(server_config()).await;

    let register = &ctx.transport.sent_payloads("register")[0];
    assert_eq!(register["deviceId"], "bus-42");
    assert_eq!(ctx.handle.connection_state(), ConnectionState::Connected);
    assert_eq!(ctx.handle.registration_state(), RegistrationState::Pending);

    ctx.transport.inject("registrationSuccess", json!({})).await;
    let mut registration = ctx.handle.watch_registration();
    tokio::time::timeout(
        WAIT,
        registration.wait_for(|state| *state == RegistrationState::Registered),
    )
    .await
    .expect("never registered")
    .unwrap();

    ctx.stop().await;
}

#[tokio::test]
async fn test_registration_error_is_recorded() {
    let ctx = ProtocolContext::start(server_config()).await;

    ctx.transport
        .inject("registrationError", json!({ "message": "unknown device" }))
        .await;
    let mut registration = ctx.handle.watch_registration();
    let state = tokio::time::timeout(
        WAIT,
        registration.wait_for(|state| matches!(state, RegistrationState::Failed(_))),
    )
    .await
    .expect("registration never failed")
    .unwrap()
    .clone();
    assert_eq!(state, RegistrationState::Failed("unknown device".to_string()));

    ctx.stop().await;
}

#[tokio::test]
async fn test_heartbeat_while_connected() {
    let ctx = ProtocolContext::start(server_config()).await;

    let transport = &ctx.transport;
    let beat = wait_for_async(Duration::from_millis(2500), || async move {
        transport.count_sent("heartbeat") >= 1
    })
    .await;
    assert!(beat);
    assert_eq!(ctx.transport.sent_payloads("heartbeat")[0]["deviceId"], "bus-42");

    ctx.stop().await;
}

#[tokio::test]
async fn test_commands_are_routed_and_malformed_ones_dropped() {
    let mut ctx = ProtocolContext::start(server_config()).await;

    // totalChunks missing
    ctx.transport
        .inject(
            "download",
            json!({
                "adId": "ad-1", "filename": "a.mp4", "size": 10, "chunkSize": 5,
                "url": "http://cdn/a.mp4", "priority": "normal", "trigger": "backend_push"
            }),
        )
        .await;
    ctx.transport.inject("somethingNew", json!({})).await;
    ctx.transport
        .inject("play", json!({ "filename": "promo.mp4", "adId": "ad-2" }))
        .await;

    match ctx.next_command().await {
        InboundCommand::Play(play) => assert_eq!(play.filename, "promo.mp4"),
        other => panic!("unexpected command {:?}", other),
    }

    ctx.transport.inject("revertToLocal", json!(null)).await;
    assert_eq!(ctx.next_command().await, InboundCommand::RevertToLocal);

    ctx.stop().await;
}

#[tokio::test]
async fn test_force_disconnect_reconnects_after_delay() {
    let ctx = ProtocolContext::start(server_config()).await;
    assert_eq!(ctx.transport.connect_count(), 1);

    ctx.transport
        .inject("forceDisconnect", json!({ "reason": "maintenance" }))
        .await;

    let transport = &ctx.transport;
    assert!(wait_for_async(WAIT, || async move { transport.connect_count() == 2 }).await);
    assert!(wait_for_async(WAIT, || async move { transport.count_sent("register") == 2 }).await);

    ctx.stop().await;
}

#[tokio::test]
async fn test_connection_loss_reconnects() {
    let ctx = ProtocolContext::start(server_config()).await;

    ctx.transport.drop_connection().await;

    let transport = &ctx.transport;
    assert!(wait_for_async(WAIT, || async move { transport.connect_count() >= 2 }).await);
    let handle = &ctx.handle;
    assert!(
        wait_for_async(WAIT, || async move {
            handle.connection_state() == ConnectionState::Connected
        })
        .await
    );

    ctx.stop().await;
}

#[tokio::test]
async fn test_sends_are_dropped_while_offline() {
    let ctx = ProtocolContext::start(server_config()).await;
    ctx.handle.shutdown();
    let handle = &ctx.handle;
    assert!(wait_for_async(WAIT, || async move { !handle.is_connected() }).await);

    let sent = ctx
        .handle
        .send(OutboundMessage::Register {
            device_id: DeviceId::new("bus-42"),
        })
        .await;
    assert!(!sent);
    assert_eq!(ctx.transport.count_sent("register"), 1);

    ctx.stop().await;
}

fn location_config() -> LocationConfig {
    LocationConfig {
        sample_interval_secs: 3600.0,
        distance_threshold_m: 50.0,
        ..LocationConfig::default()
    }
}

#[tokio::test]
async fn test_tracker_reports_initial_position_and_movement() {
    let ctx = ProtocolContext::start(server_config()).await;
    let provider = Arc::new(MockPositionProvider::new(-122.4194, 37.7749));
    let tracker = LocationTracker::new(provider.clone(), ctx.handle.clone(), location_config());

    tracker.start().await;
    let updates = ctx.transport.sent_payloads("locationUpdate");
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0]["longitude"], -122.4194);
    assert_eq!(updates[0]["latitude"], 37.7749);

    // A few meters is below the movement threshold
    provider.move_to(-122.41941, 37.77491);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(ctx.transport.count_sent("locationUpdate"), 1);

    // Roughly a kilometre
    provider.move_to(-122.4094, 37.7749);
    let transport = &ctx.transport;
    assert!(wait_for_async(WAIT, || async move { transport.count_sent("locationUpdate") == 2 }).await);

    let stats = tracker.stats().await;
    assert_eq!(stats.sent, 2);

    tracker.stop().await;
    ctx.stop().await;
}

#[tokio::test]
async fn test_tracker_rejects_invalid_positions_and_records_acks() {
    let ctx = ProtocolContext::start(server_config()).await;
    let provider = Arc::new(MockPositionProvider::new(10.0, 10.0));
    let tracker = LocationTracker::new(provider, ctx.handle.clone(), location_config());

    assert!(!tracker.report(Position::new(200.0, 10.0)).await);
    assert!(!tracker.report(Position::new(10.0, f64::NAN)).await);
    assert!(tracker.report(Position::new(10.0, 10.0)).await);

    let pushed = LocationAck {
        filename: Some("geo.mp4".to_string()),
        message: None,
    };
    assert!(!tracker.on_ack(&pushed).await);
    assert!(tracker.on_ack(&LocationAck::default()).await);

    let stats = tracker.stats().await;
    assert_eq!(stats.sent, 1);
    assert_eq!(stats.acknowledged, 2);
    assert!(stats.last_ack.is_some());

    ctx.stop().await;
}

#[tokio::test]
async fn test_tracker_respects_denied_permission() {
    let ctx = ProtocolContext::start(server_config()).await;
    let tracker = LocationTracker::new(
        Arc::new(MockPositionProvider::denied()),
        ctx.handle.clone(),
        location_config(),
    );

    tracker.start().await;
    assert_eq!(ctx.transport.count_sent("locationUpdate"), 0);

    ctx.stop().await;
}

//! Full-duplex adapter over an in-memory channel

use crate::common::create_session;
use crate::common::recording::{MockChannel, RecordingInbound};
use polysock::messages::{Frame, FrameKind};
use polysock::session::{ConnectionState, DisconnectReason, Session, SessionRegistry};
use polysock::transport::{
    DuplexChannel, DuplexConfig, FullDuplexAdapter, TransportKind, OPEN_HANDSHAKE,
};
use std::sync::Arc;
use std::time::Duration;

struct Fixture {
    registry: SessionRegistry,
    inbound: Arc<RecordingInbound>,
    session: Arc<Session>,
    channel: Arc<MockChannel>,
    adapter: Arc<FullDuplexAdapter>,
}

fn fixture(config: DuplexConfig) -> Fixture {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::echoing();
    let session = create_session(&registry, &inbound);
    let channel = MockChannel::new();
    let duplex: Arc<dyn DuplexChannel> = Arc::clone(&channel) as Arc<dyn DuplexChannel>;
    let adapter = FullDuplexAdapter::new(TransportKind::WebSocket, &session, duplex, config);
    Fixture {
        registry,
        inbound,
        session,
        channel,
        adapter,
    }
}

fn quiet_config() -> DuplexConfig {
    DuplexConfig {
        heartbeat_interval: Duration::from_secs(60),
        timeout: Duration::from_secs(60),
    }
}

async fn opened(config: DuplexConfig) -> Fixture {
    let f = fixture(config);
    f.adapter.on_channel_message(OPEN_HANDSHAKE.to_string()).await;
    f
}

#[tokio::test]
async fn test_open_handshake_connects_session() {
    let f = opened(quiet_config()).await;

    assert!(f.adapter.is_open());
    assert!(f.inbound.is_connected());
    assert_eq!(f.session.state(), ConnectionState::Connected);
    assert!(f.session.has_heartbeat_timer());

    // Handshake frames go out together as one channel message
    assert_eq!(f.channel.sent().len(), 1);
    assert_eq!(
        f.channel.sent_frames(),
        vec![
            Frame::session_id(f.session.id()),
            Frame::heartbeat_interval(60_000),
        ]
    );
}

#[tokio::test]
async fn test_wrong_first_message_is_rejected() {
    let f = fixture(quiet_config());

    f.adapter.on_channel_message("~6~0~2~hi".to_string()).await;

    assert!(f.adapter.is_closed());
    assert!(f.channel.is_closed());
    assert!(f.channel.sent().is_empty());
    assert!(f.inbound.messages().is_empty());
    assert_eq!(f.inbound.disconnect_reasons(), vec![DisconnectReason::ConnectFailed]);
    assert!(f.registry.is_empty());
}

#[tokio::test]
async fn test_handshake_write_failure() {
    let f = fixture(quiet_config());
    f.channel.fail_writes(true);

    f.adapter.on_channel_message(OPEN_HANDSHAKE.to_string()).await;

    assert!(f.adapter.is_closed());
    assert!(f.channel.is_closed());
    assert_eq!(f.inbound.disconnect_reasons(), vec![DisconnectReason::ConnectFailed]);
    assert!(f.registry.is_empty());
}

#[tokio::test]
async fn test_data_is_dispatched_and_echoed() {
    let f = opened(quiet_config()).await;

    f.adapter
        .on_channel_message("~6~0~2~hi~6~0~3~you".to_string())
        .await;

    assert_eq!(
        f.inbound.messages(),
        vec![(0, "hi".to_string()), (0, "you".to_string())]
    );
    // One channel message per echoed frame
    assert_eq!(&f.channel.sent()[1..], ["~6~0~2~hi", "~6~0~3~you"]);
}

#[tokio::test]
async fn test_message_without_frames_is_ignored() {
    let f = opened(quiet_config()).await;

    f.adapter.on_channel_message("garbage".to_string()).await;

    assert!(f.inbound.messages().is_empty());
    assert!(f.adapter.is_open());
}

#[tokio::test]
async fn test_heartbeat_round_trip() {
    let config = DuplexConfig {
        heartbeat_interval: Duration::from_millis(20),
        timeout: Duration::from_secs(60),
    };
    let f = opened(config).await;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    let ping = loop {
        let ping = f
            .channel
            .sent_frames()
            .into_iter()
            .find(|frame| frame.kind() == FrameKind::Ping);
        if let Some(ping) = ping {
            break ping;
        }
        assert!(tokio::time::Instant::now() < deadline, "no ping sent");
        tokio::time::sleep(Duration::from_millis(5)).await;
    };
    assert!(f.session.has_timeout_timer());

    let pong = format!("~5~{}~{}", ping.payload().len(), ping.payload());
    f.adapter.on_channel_message(pong).await;

    assert!(!f.session.has_timeout_timer());
    assert_eq!(f.session.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_unanswered_ping_times_out() {
    let config = DuplexConfig {
        heartbeat_interval: Duration::from_millis(20),
        timeout: Duration::from_millis(20),
    };
    let f = opened(config).await;

    let reason = f.inbound.wait_for_disconnect(Duration::from_secs(2)).await;

    assert_eq!(reason, Some(DisconnectReason::Timeout));
    assert!(f.channel.is_closed());
    assert!(f.registry.is_empty());
}

#[tokio::test]
async fn test_channel_closed_by_peer() {
    let f = opened(quiet_config()).await;

    f.adapter.on_channel_closed().await;
    f.adapter.on_channel_closed().await;

    assert!(f.adapter.is_closed());
    assert_eq!(f.inbound.disconnect_reasons(), vec![DisconnectReason::Error]);
    assert!(f.registry.is_empty());
    assert!(!f.session.has_heartbeat_timer());
}

#[tokio::test]
async fn test_write_failure_closes_channel() {
    let f = opened(quiet_config()).await;
    f.channel.fail_writes(true);

    let result = f.inbound.outbound().send_text("lost").await;

    assert!(result.is_err());
    assert!(f.channel.is_closed());
    assert_eq!(f.inbound.disconnect_reasons(), vec![DisconnectReason::Error]);
    assert!(f.registry.is_empty());
}

#[tokio::test]
async fn test_peer_close_is_echoed_then_channel_closes() {
    let f = opened(quiet_config()).await;

    f.adapter.on_channel_message("~3~6~client".to_string()).await;

    assert_eq!(f.channel.sent().last().map(String::as_str), Some("~3~6~client"));
    assert!(f.channel.is_closed());
    assert_eq!(f.inbound.disconnect_reasons(), vec![DisconnectReason::ClosedRemotely]);
    assert_eq!(f.session.state(), ConnectionState::Closed);
    assert!(f.registry.is_empty());
}

#[tokio::test]
async fn test_local_close_completes_on_echo() {
    let f = opened(quiet_config()).await;

    f.inbound.outbound().close().await;
    let close_id = f.session.close_id().expect("close started");
    assert_eq!(f.channel.sent_frames().last(), Some(&Frame::close(close_id.clone())));

    let echo = format!("~3~{}~{}", close_id.len(), close_id);
    f.adapter.on_channel_message(echo).await;

    assert_eq!(f.inbound.disconnect_reasons(), vec![DisconnectReason::Closed]);
    assert!(f.channel.is_closed());
    assert!(f.registry.is_empty());
}

#[tokio::test]
async fn test_silent_peer_after_local_close_times_out() {
    let config = DuplexConfig {
        heartbeat_interval: Duration::from_millis(20),
        timeout: Duration::from_millis(100),
    };
    let f = opened(config).await;

    f.inbound.outbound().close().await;
    assert_eq!(f.session.state(), ConnectionState::Closing);

    let reason = f.inbound.wait_for_disconnect(Duration::from_secs(2)).await;

    assert_eq!(reason, Some(DisconnectReason::Timeout));
    let kinds: Vec<FrameKind> = f.channel.sent_frames().iter().map(Frame::kind).collect();
    let close_at = kinds
        .iter()
        .position(|kind| *kind == FrameKind::Close)
        .expect("close frame sent");
    assert!(kinds[close_at..].contains(&FrameKind::Ping));
    assert_eq!(f.session.state(), ConnectionState::Closed);
    assert!(f.channel.is_closed());
    assert!(f.registry.is_empty());
}

//! Session state machine scenarios driven through a mock transport

use crate::common::create_session;
use crate::common::recording::{FailMode, InboundEvent, MockHandler, RecordingInbound};
use polysock::messages::{Frame, FrameKind};
use polysock::session::{
    ConnectionState, DisconnectReason, SessionError, SessionRegistry, TransportHandler,
    REMOTE_CLOSE_TOKEN,
};
use std::time::Duration;
use tokio_test::{assert_err, assert_ok};

#[tokio::test]
async fn test_connect_and_echo() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::echoing();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);

    assert!(session.on_connect(Some(handler.as_handler())).await);
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(inbound.is_connected());

    session.on_message(Frame::text("hi")).await;

    assert_eq!(inbound.messages(), vec![(0, "hi".to_string())]);
    assert_eq!(handler.sent(), vec![Frame::data(0, "hi")]);
}

#[tokio::test]
async fn test_second_handler_is_rejected() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let first = MockHandler::attached(&session);
    let second = MockHandler::attached(&session);

    assert!(session.on_connect(Some(first.as_handler())).await);
    assert!(!session.on_connect(Some(second.as_handler())).await);

    assert_eq!(second.abort_count(), 1);
    assert_eq!(first.abort_count(), 0);
    assert!(session.is_bound_to(&*first));
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(inbound.disconnect_reasons().is_empty());
    assert_eq!(registry.len(), 1);
}

#[tokio::test]
async fn test_connect_failure_notifies_application() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);

    assert!(!session.on_connect(None).await);

    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(inbound.disconnect_reasons(), vec![DisconnectReason::ConnectFailed]);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_session_without_application_is_aborted() {
    let registry = SessionRegistry::new();
    let session = registry.create_session(None);
    let handler = MockHandler::attached(&session);

    assert!(!session.on_connect(Some(handler.as_handler())).await);

    assert_eq!(handler.abort_count(), 1);
    assert_eq!(session.state(), ConnectionState::Closed);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_failing_application_connect_closes_session() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::failing_connect();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);

    assert!(!session.on_connect(Some(handler.as_handler())).await);

    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(handler.abort_count(), 1);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_disconnect_notifies_once() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    session.on_disconnect(DisconnectReason::Error, None).await;
    session.on_disconnect(DisconnectReason::Timeout, None).await;

    assert_eq!(inbound.disconnect_reasons(), vec![DisconnectReason::Error]);
    assert!(!session.has_inbound());
}

#[tokio::test]
async fn test_close_handshake_started_locally() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    session.start_close().await;
    assert_eq!(session.state(), ConnectionState::Closing);

    let close_id = session.close_id().expect("close id assigned");
    assert!(close_id.starts_with("server-"));
    assert_eq!(handler.sent(), vec![Frame::close(close_id.clone())]);

    session.on_message(Frame::close(close_id)).await;

    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(handler.abort_count(), 1);
    assert_eq!(inbound.disconnect_reasons(), vec![DisconnectReason::Closed]);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_start_close_only_once() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    session.start_close().await;
    session.start_close().await;

    assert_eq!(handler.sent().len(), 1);
}

#[tokio::test]
async fn test_peer_initiated_close() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    session.on_message(Frame::close(REMOTE_CLOSE_TOKEN)).await;

    assert_eq!(session.state(), ConnectionState::Closing);
    assert_eq!(handler.sent(), vec![Frame::close(REMOTE_CLOSE_TOKEN)]);
    assert_eq!(inbound.disconnect_reasons(), vec![DisconnectReason::ClosedRemotely]);
    assert_eq!(handler.drain_request_count(), 1);
}

#[tokio::test]
async fn test_peer_close_with_other_token_waits_for_shutdown() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    session.on_message(Frame::close("bye")).await;
    assert!(inbound.disconnect_reasons().is_empty());

    // The transport finishes draining and goes away
    handler.abort().await;
    assert_eq!(inbound.disconnect_reasons(), vec![DisconnectReason::ClosedRemotely]);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_simultaneous_close_echoes_peer_token() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    session.start_close().await;
    session.on_message(Frame::close("peer-token")).await;

    assert_eq!(session.state(), ConnectionState::Closing);
    assert_eq!(handler.sent().last(), Some(&Frame::close("peer-token")));
    assert_eq!(handler.abort_count(), 0);
}

#[tokio::test]
async fn test_close_failed_when_transport_dies_mid_close() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    session.start_close().await;
    handler.abort().await;

    assert_eq!(inbound.disconnect_reasons(), vec![DisconnectReason::CloseFailed]);
}

#[tokio::test]
async fn test_ping_is_answered_with_pong() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    session.on_message(Frame::ping("42")).await;

    assert_eq!(handler.sent(), vec![Frame::pong("42")]);
}

#[tokio::test]
async fn test_server_only_frames_from_client_are_ignored() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    session
        .on_messages(vec![Frame::session_id("spoofed"), Frame::heartbeat_interval(1)])
        .await;

    assert!(handler.sent().is_empty());
    assert_eq!(inbound.events(), vec![InboundEvent::Connected]);
    assert_eq!(session.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_pong_cancels_timeout() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    session.set_heartbeat_delay(Duration::from_secs(60));
    session.set_timeout_delay(Duration::from_millis(50));
    session.start_heartbeat_timer();
    session.start_timeout_timer();
    assert!(session.has_timeout_timer());

    session.on_message(Frame::pong("1")).await;
    assert!(!session.has_timeout_timer());

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(session.state(), ConnectionState::Connected);
    assert!(inbound.disconnect_reasons().is_empty());
    assert!(session.has_heartbeat_timer());
}

#[tokio::test]
async fn test_pong_without_heartbeat_leaves_timers_alone() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    session.set_heartbeat_delay(Duration::from_millis(20));
    session.set_timeout_delay(Duration::from_secs(60));
    session.start_timeout_timer();

    session.on_message(Frame::pong("1")).await;

    assert!(session.has_timeout_timer());
    assert!(!session.has_heartbeat_timer());
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert!(handler.sent().is_empty());
}

#[tokio::test]
async fn test_unanswered_close_times_out() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    session.set_timeout_delay(Duration::from_millis(30));
    session.start_close().await;
    assert!(session.has_timeout_timer());

    let reason = inbound.wait_for_disconnect(Duration::from_secs(2)).await;
    assert_eq!(reason, Some(DisconnectReason::Timeout));
    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(handler.abort_count(), 1);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_heartbeat_continues_while_closing() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    session.set_heartbeat_delay(Duration::from_millis(20));
    session.set_timeout_delay(Duration::from_secs(60));
    session.start_close().await;
    session.start_heartbeat_timer();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while handler.sent().len() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let sent = handler.sent();
    assert_eq!(sent[0].kind(), FrameKind::Close);
    assert_eq!(sent.get(1).map(Frame::kind), Some(FrameKind::Ping));
    assert_eq!(session.state(), ConnectionState::Closing);
}

#[tokio::test]
async fn test_missing_pong_times_out() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    session.set_timeout_delay(Duration::from_millis(30));
    session.start_timeout_timer();

    let reason = inbound.wait_for_disconnect(Duration::from_secs(2)).await;
    assert_eq!(reason, Some(DisconnectReason::Timeout));
    assert_eq!(session.state(), ConnectionState::Closed);
    assert_eq!(handler.abort_count(), 1);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_heartbeat_sends_ping_and_arms_timeout() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    session.set_heartbeat_delay(Duration::from_millis(20));
    session.set_timeout_delay(Duration::from_secs(60));
    session.start_heartbeat_timer();

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while handler.sent().is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    let sent = handler.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind(), FrameKind::Ping);
    assert!(sent[0].payload().parse::<u64>().is_ok());
    assert!(session.has_timeout_timer());
}

#[tokio::test]
async fn test_zero_heartbeat_delay_disables_heartbeat() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);

    session.set_heartbeat_delay(Duration::ZERO);
    session.start_heartbeat_timer();
    assert!(!session.has_heartbeat_timer());
}

#[tokio::test]
async fn test_buffer_timeout_from_transport_times_out_session() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    handler.fail_sends(FailMode::BufferTimeout);
    let result = inbound.outbound().send_text("payload").await;

    assert!(matches!(result, Err(SessionError::BufferTimeout { .. })));
    assert_eq!(inbound.disconnect_reasons(), vec![DisconnectReason::Timeout]);
    assert_eq!(handler.abort_count(), 1);
    assert_eq!(session.state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_write_failure_aborts_transport() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    handler.fail_sends(FailMode::WriteError);
    let result = inbound.outbound().send_text("payload").await;

    assert!(matches!(result, Err(SessionError::TransportWrite(_))));
    assert_eq!(handler.abort_count(), 1);
    assert_eq!(inbound.disconnect_reasons(), vec![DisconnectReason::Error]);
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_outbound_after_disconnect() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);
    let outbound = inbound.outbound();

    assert_ok!(outbound.send_json(&serde_json::json!({"move": "e4"})).await);
    assert_eq!(handler.sent()[0], Frame::data(1, r#"{"move":"e4"}"#));

    outbound.disconnect().await;
    assert_eq!(inbound.disconnect_reasons(), vec![DisconnectReason::Disconnect]);
    assert_eq!(handler.abort_count(), 1);
    assert_eq!(outbound.connection_state(), ConnectionState::Closed);

    let err = assert_err!(outbound.send_text("late").await);
    assert!(matches!(err, SessionError::NotConnected { .. }));

    drop(session);
    assert!(registry.is_empty());
    assert_eq!(outbound.connection_state(), ConnectionState::Closed);
}

#[tokio::test]
async fn test_registry_shutdown_disconnects_sessions() {
    let registry = SessionRegistry::new();
    let inbound = RecordingInbound::new();
    let session = create_session(&registry, &inbound);
    let handler = MockHandler::attached(&session);
    assert!(session.on_connect(Some(handler.as_handler())).await);

    registry.shutdown().await;

    assert!(registry.is_empty());
    assert_eq!(inbound.disconnect_reasons(), vec![DisconnectReason::Disconnect]);
    assert_eq!(handler.abort_count(), 1);
}

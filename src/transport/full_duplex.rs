//! Full-duplex transports: one open bidirectional channel per session.

use crate::messages::{Frame, FrameCodec};
use crate::session::errors::{Result, SessionError};
use crate::session::{Session, TransportHandler, DEFAULT_HEARTBEAT_DELAY, DEFAULT_TIMEOUT_DELAY};
use crate::transport::kind::TransportKind;
use async_trait::async_trait;
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, info, instrument, trace, warn};

/// First message a client must send on a new channel
pub const OPEN_HANDSHAKE: &str = "OPEN";

/// Write side of a bidirectional message channel.
///
/// Reading is driven by the host, which feeds each received message to
/// [`FullDuplexAdapter::on_channel_message`].
#[async_trait]
pub trait DuplexChannel: Send + Sync {
    async fn send_text(&self, text: String) -> io::Result<()>;

    /// Close the channel. Must be safe to call more than once.
    async fn close(&self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DuplexConfig {
    pub heartbeat_interval: Duration,
    pub timeout: Duration,
}

impl Default for DuplexConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_DELAY,
            timeout: DEFAULT_TIMEOUT_DELAY,
        }
    }
}

#[derive(Debug, Default)]
struct DuplexState {
    opened: bool,
    closed: bool,
}

/// Adapter binding a session straight to an open channel.
///
/// No buffering: every frame is written as its own channel message.
pub struct FullDuplexAdapter {
    kind: TransportKind,
    config: DuplexConfig,
    codec: FrameCodec,
    session: Weak<Session>,
    channel: Arc<dyn DuplexChannel>,
    state: Mutex<DuplexState>,
    weak_self: Weak<FullDuplexAdapter>,
}

impl std::fmt::Debug for FullDuplexAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FullDuplexAdapter")
            .field("kind", &self.kind)
            .field("state", &*self.lock())
            .finish()
    }
}

impl FullDuplexAdapter {
    pub fn new(
        kind: TransportKind,
        session: &Arc<Session>,
        channel: Arc<dyn DuplexChannel>,
        config: DuplexConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            kind,
            config,
            codec: FrameCodec::default(),
            session: Arc::downgrade(session),
            channel,
            state: Mutex::new(DuplexState::default()),
            weak_self: weak_self.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, DuplexState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// True once the client's open handshake has been accepted
    pub fn is_open(&self) -> bool {
        let state = self.lock();
        state.opened && !state.closed
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Handle one message read from the channel
    #[instrument(level = "trace", skip(self, text), fields(transport = %self.kind, len = text.len()))]
    pub async fn on_channel_message(&self, text: String) {
        let opening = {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            let opening = !state.opened;
            state.opened = true;
            opening
        };

        if opening {
            self.open(&text).await;
            return;
        }

        let frames = self.codec.decode(&text);
        if frames.is_empty() {
            debug!(len = text.len(), "Ignoring message with no frames");
            return;
        }
        if let Some(session) = self.session.upgrade() {
            session.on_messages(frames).await;
        }
    }

    /// The channel is gone
    pub async fn on_channel_closed(&self) {
        debug!(transport = %self.kind, "Channel closed by peer");
        self.abort().await;
    }

    async fn open(&self, first_message: &str) {
        let Some(session) = self.session.upgrade() else {
            self.abort().await;
            return;
        };
        if first_message != OPEN_HANDSHAKE {
            warn!(transport = %self.kind, "Channel did not start with the open handshake");
            self.fail_open(&session).await;
            return;
        }

        session.set_heartbeat_delay(self.config.heartbeat_interval);
        session.set_timeout_delay(self.config.timeout);

        let interval =
            u64::try_from(self.config.heartbeat_interval.as_millis()).unwrap_or(u64::MAX);
        let handshake = FrameCodec::encode_batch([
            &Frame::session_id(session.id()),
            &Frame::heartbeat_interval(interval),
        ]);
        if let Err(e) = self.channel.send_text(handshake).await {
            warn!(error = %e, "Failed to write handshake");
            self.fail_open(&session).await;
            return;
        }

        let Some(adapter) = self.weak_self.upgrade() else {
            return;
        };
        let handler: Arc<dyn TransportHandler> = adapter;
        if session.on_connect(Some(handler)).await {
            info!(session_id = %session.id(), transport = %self.kind, "Full-duplex session connected");
            session.start_heartbeat_timer();
        }
    }

    /// Close the channel and report a failed connect to the session
    async fn fail_open(&self, session: &Session) {
        self.lock().closed = true;
        self.channel.close().await;
        session.on_connect(None).await;
    }
}

#[async_trait]
impl TransportHandler for FullDuplexAdapter {
    fn transport_name(&self) -> &'static str {
        self.kind.name()
    }

    async fn send_message(&self, frame: Frame) -> Result<()> {
        if self.lock().closed {
            return Err(SessionError::TransportClosed);
        }
        trace!(kind = %frame.kind(), "Writing frame");
        self.channel.send_text(FrameCodec::encode(&frame)).await?;
        if let Some(session) = self.session.upgrade() {
            session.start_heartbeat_timer();
        }
        Ok(())
    }

    /// Nothing is ever buffered here, so this closes right away
    async fn disconnect_when_empty(&self) {
        self.abort().await;
    }

    async fn abort(&self) {
        {
            let mut state = self.lock();
            if state.closed {
                return;
            }
            state.closed = true;
        }
        self.channel.close().await;
        debug!(transport = %self.kind, "Full-duplex adapter aborted");

        if let Some(session) = self.session.upgrade() {
            if session.is_bound_to(self) {
                session.clear_heartbeat_timer();
                session.clear_timeout_timer();
                session.on_shutdown().await;
            }
        }
    }
}

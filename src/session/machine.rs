use crate::messages::{Frame, FrameKind};
use crate::session::errors::{Result, SessionError};
use crate::session::handler::TransportHandler;
use crate::session::inbound::{SocketInbound, SocketOutbound};
use crate::session::registry::RegistryShared;
use crate::session::timer::{TimerHandle, TimerService};
use crate::session::{
    ConnectionState, DisconnectReason, DEFAULT_HEARTBEAT_DELAY, DEFAULT_TIMEOUT_DELAY,
    LOCAL_CLOSE_PREFIX, REMOTE_CLOSE_TOKEN,
};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tracing::{debug, error, info, instrument, trace, warn};

/// Mutable session state, guarded by a short-lived lock that is never held
/// across an await or an application callback.
struct SessionCore {
    state: ConnectionState,
    inbound: Option<Arc<dyn SocketInbound>>,
    handler: Option<Arc<dyn TransportHandler>>,
    heartbeat_delay: Duration,
    timeout_delay: Duration,
    heartbeat_timer: Option<TimerHandle>,
    timeout_timer: Option<TimerHandle>,
    /// Set once the transport has armed a heartbeat; only then is the
    /// timeout timer a ping deadline that a Pong may clear
    heartbeats: bool,
    close_id: Option<String>,
    attributes: HashMap<String, Value>,
}

/// Outcome of a connect attempt, decided under the state lock
enum ConnectDecision {
    Reject,
    NoInbound,
    Connect(Arc<dyn SocketInbound>),
}

/// Outcome of a Close frame, decided under the state lock
enum CloseStep {
    Ignore,
    Complete,
    SimultaneousClose,
    PeerInitiated,
}

/// Server-side state machine for one logical client connection.
///
/// Owned by the [`SessionRegistry`](crate::session::SessionRegistry); adapters
/// and timers only hold weak references.
pub struct Session {
    id: String,
    timers: TimerService,
    registry: Weak<RegistryShared>,
    core: Mutex<SessionCore>,
    /// Serializes frame writes to the bound transport
    send_lock: tokio::sync::Mutex<()>,
    /// Serializes dispatch of inbound frame batches
    dispatch_lock: tokio::sync::Mutex<()>,
    message_id: AtomicU64,
    timed_out: AtomicBool,
    weak_self: Weak<Session>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(
        id: String,
        inbound: Option<Arc<dyn SocketInbound>>,
        timers: TimerService,
        registry: Weak<RegistryShared>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|weak_self| Self {
            id,
            timers,
            registry,
            core: Mutex::new(SessionCore {
                state: ConnectionState::Connecting,
                inbound,
                handler: None,
                heartbeat_delay: DEFAULT_HEARTBEAT_DELAY,
                timeout_delay: DEFAULT_TIMEOUT_DELAY,
                heartbeat_timer: None,
                timeout_timer: None,
                heartbeats: false,
                close_id: None,
                attributes: HashMap::new(),
            }),
            send_lock: tokio::sync::Mutex::new(()),
            dispatch_lock: tokio::sync::Mutex::new(()),
            message_id: AtomicU64::new(0),
            timed_out: AtomicBool::new(false),
            weak_self: weak_self.clone(),
        })
    }

    fn core(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.core().state
    }

    /// Move to `state`. Closed is terminal and never left again.
    fn set_state(&self, state: ConnectionState) {
        let mut core = self.core();
        if core.state != ConnectionState::Closed {
            core.state = state;
        }
    }

    pub fn heartbeat_delay(&self) -> Duration {
        self.core().heartbeat_delay
    }

    /// Zero disables heartbeats
    pub fn set_heartbeat_delay(&self, delay: Duration) {
        self.core().heartbeat_delay = delay;
    }

    pub fn timeout_delay(&self) -> Duration {
        self.core().timeout_delay
    }

    pub fn set_timeout_delay(&self, delay: Duration) {
        self.core().timeout_delay = delay;
    }

    /// Token sent with our own Close frame, if we started the close
    pub fn close_id(&self) -> Option<String> {
        self.core().close_id.clone()
    }

    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.core().attributes.get(key).cloned()
    }

    pub fn set_attribute(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.core().attributes.insert(key.into(), value)
    }

    /// True until the application has been told about the disconnect
    pub fn has_inbound(&self) -> bool {
        self.core().inbound.is_some()
    }

    pub fn transport_handler(&self) -> Option<Arc<dyn TransportHandler>> {
        self.core().handler.clone()
    }

    /// True if `handler` is the adapter currently bound to this session
    pub fn is_bound_to<H: TransportHandler>(&self, handler: &H) -> bool {
        self.core()
            .handler
            .as_ref()
            .is_some_and(|bound| std::ptr::addr_eq(Arc::as_ptr(bound), handler as *const H))
    }

    pub fn outbound(&self) -> SocketOutbound {
        SocketOutbound::new(self.id.clone(), self.weak_self.clone())
    }

    /// Next value of the heartbeat correlation counter
    pub fn next_message_id(&self) -> u64 {
        self.message_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Bind a transport handler. `None` means the transport failed to connect.
    ///
    /// Returns `true` if the handler is now bound and the application was
    /// connected.
    #[instrument(level = "debug", skip(self, handler), fields(session_id = %self.id))]
    pub async fn on_connect(&self, handler: Option<Arc<dyn TransportHandler>>) -> bool {
        let Some(handler) = handler else {
            warn!("Transport failed to connect");
            self.set_state(ConnectionState::Closed);
            self.on_disconnect(DisconnectReason::ConnectFailed, None).await;
            self.remove_from_registry();
            return false;
        };

        let decision = {
            let mut core = self.core();
            if core.handler.is_some() {
                ConnectDecision::Reject
            } else {
                core.handler = Some(Arc::clone(&handler));
                let state = core.state;
                match core.inbound.clone() {
                    Some(inbound) if state == ConnectionState::Connecting => {
                        core.state = ConnectionState::Connected;
                        ConnectDecision::Connect(inbound)
                    }
                    _ => {
                        core.state = ConnectionState::Closed;
                        ConnectDecision::NoInbound
                    }
                }
            }
        };

        match decision {
            ConnectDecision::Reject => {
                warn!(
                    transport = handler.transport_name(),
                    "Session already has a transport, rejecting another"
                );
                handler.abort().await;
                false
            }
            ConnectDecision::NoInbound => {
                warn!(
                    transport = handler.transport_name(),
                    "No application attached to session"
                );
                handler.abort().await;
                false
            }
            ConnectDecision::Connect(inbound) => {
                info!(transport = handler.transport_name(), "Session connected");
                match inbound.on_connect(self.outbound()).await {
                    Ok(()) => true,
                    Err(e) => {
                        error!(error = %e, "Application failed in on_connect");
                        self.set_state(ConnectionState::Closed);
                        handler.abort().await;
                        false
                    }
                }
            }
        }
    }

    /// Dispatch a batch of frames in order, serialized against other batches
    pub async fn on_messages(&self, frames: Vec<Frame>) {
        let _dispatch = self.dispatch_lock.lock().await;
        for frame in frames {
            self.on_message(frame).await;
        }
    }

    /// Handle one frame received from the client
    pub async fn on_message(&self, frame: Frame) {
        trace!(session_id = %self.id, kind = %frame.kind(), "Received frame");
        match frame.kind() {
            FrameKind::SessionId | FrameKind::HeartbeatInterval => {
                debug!(session_id = %self.id, kind = %frame.kind(), "Ignoring server-only frame from client");
            }
            FrameKind::Close => self.on_close(frame.payload()).await,
            FrameKind::Ping => self.on_ping(frame.payload()).await,
            FrameKind::Pong => self.on_pong(frame.payload()),
            FrameKind::Data => {
                let message_type = frame.message_type();
                self.on_data(message_type, frame.into_payload()).await;
            }
        }
    }

    async fn on_ping(&self, data: &str) {
        if let Err(e) = self.send_message(Frame::pong(data)).await {
            debug!(session_id = %self.id, error = %e, "Failed to answer ping");
        }
    }

    fn on_pong(&self, data: &str) {
        let (heartbeats, state) = {
            let core = self.core();
            (core.heartbeats, core.state)
        };
        if !heartbeats {
            // The timeout timer is the transport's idle deadline here
            trace!(session_id = %self.id, data, "Pong without heartbeat, ignoring");
            return;
        }
        trace!(session_id = %self.id, data, "Heartbeat acknowledged");
        self.clear_timeout_timer();
        if state == ConnectionState::Connected {
            self.start_heartbeat_timer();
        }
    }

    async fn on_data(&self, message_type: i32, message: String) {
        let inbound = self.core().inbound.clone();
        let Some(inbound) = inbound else {
            debug!(session_id = %self.id, "Dropping message, application already disconnected");
            return;
        };
        if let Err(e) = inbound.on_message(message_type, message).await {
            error!(session_id = %self.id, error = %e, "Application failed in on_message");
        }
    }

    /// Send a frame through the bound transport.
    ///
    /// Fatal transport failures tear the session down before returning the
    /// error: a buffer timeout becomes a Timeout disconnect, a write failure
    /// aborts the transport.
    pub async fn send_message(&self, frame: Frame) -> Result<()> {
        let handler = {
            let core = self.core();
            if !matches!(
                core.state,
                ConnectionState::Connected | ConnectionState::Closing
            ) {
                return Err(SessionError::NotConnected {
                    session_id: self.id.clone(),
                    state: core.state,
                });
            }
            core.handler
                .clone()
                .ok_or_else(|| SessionError::NoTransport {
                    session_id: self.id.clone(),
                })?
        };

        let result = {
            let _send = self.send_lock.lock().await;
            handler.send_message(frame).await
        };

        if let Err(e) = &result {
            match e {
                SessionError::BufferTimeout { wait } => {
                    warn!(session_id = %self.id, wait = ?wait, "Transport buffer full, timing out session");
                    self.on_timeout().await;
                }
                e if e.is_fatal() => {
                    error!(session_id = %self.id, error = %e, "Transport write failed");
                    handler.abort().await;
                }
                _ => {}
            }
        }
        result
    }

    /// Begin an orderly close from this side
    #[instrument(level = "debug", skip(self), fields(session_id = %self.id))]
    pub async fn start_close(&self) {
        let close_id = {
            let mut core = self.core();
            if !matches!(
                core.state,
                ConnectionState::Connecting | ConnectionState::Connected
            ) {
                return;
            }
            core.state = ConnectionState::Closing;
            let close_id = format!("{}-{}", LOCAL_CLOSE_PREFIX, self.next_message_id());
            core.close_id = Some(close_id.clone());
            close_id
        };

        info!(close_id = %close_id, "Starting close handshake");
        if let Err(e) = self.send_message(Frame::close(close_id)).await {
            warn!(error = %e, "Failed to send close frame");
        }
        // A peer that never echoes the close is timed out
        if !self.has_timeout_timer() {
            self.start_timeout_timer();
        }
    }

    /// Handle a Close frame from the peer: either the echo of our own close,
    /// a simultaneous close, or a peer-initiated close.
    #[instrument(level = "debug", skip(self), fields(session_id = %self.id))]
    pub async fn on_close(&self, data: &str) {
        let step = {
            let mut core = self.core();
            let state = core.state;
            let is_our_close = core.close_id.as_deref() == Some(data);
            match state {
                ConnectionState::Closed => CloseStep::Ignore,
                ConnectionState::Closing if is_our_close => {
                    core.state = ConnectionState::Closed;
                    CloseStep::Complete
                }
                ConnectionState::Closing => CloseStep::SimultaneousClose,
                ConnectionState::Connecting | ConnectionState::Connected => {
                    core.state = ConnectionState::Closing;
                    CloseStep::PeerInitiated
                }
            }
        };

        match step {
            CloseStep::Ignore => {
                debug!("Ignoring close frame on closed session");
            }
            CloseStep::Complete => {
                info!("Close handshake complete");
                self.on_disconnect(DisconnectReason::Closed, None).await;
                if let Some(handler) = self.transport_handler() {
                    handler.abort().await;
                }
            }
            CloseStep::SimultaneousClose => {
                debug!(data, "Simultaneous close, echoing peer token");
                if let Err(e) = self.send_message(Frame::close(data)).await {
                    warn!(error = %e, "Failed to echo close frame");
                }
            }
            CloseStep::PeerInitiated => {
                info!(data, "Peer started close handshake");
                if let Err(e) = self.send_message(Frame::close(data)).await {
                    warn!(error = %e, "Failed to echo close frame");
                }
                if data == REMOTE_CLOSE_TOKEN {
                    self.on_disconnect(DisconnectReason::ClosedRemotely, None)
                        .await;
                }
                if let Some(handler) = self.transport_handler() {
                    handler.disconnect_when_empty().await;
                }
            }
        }
    }

    /// The peer stopped answering. Runs at most once.
    pub async fn on_timeout(&self) {
        if self.timed_out.swap(true, Ordering::SeqCst) {
            return;
        }
        warn!(session_id = %self.id, "Session timed out");
        self.set_state(ConnectionState::Closed);
        self.on_disconnect(DisconnectReason::Timeout, None).await;
        if let Some(handler) = self.transport_handler() {
            handler.abort().await;
        }
    }

    /// Drop the connection at the application's request, without a handshake
    pub async fn disconnect(&self) {
        if self.state() == ConnectionState::Closed {
            return;
        }
        self.set_state(ConnectionState::Closed);
        self.on_disconnect(DisconnectReason::Disconnect, None).await;
        match self.transport_handler() {
            Some(handler) => handler.abort().await,
            None => self.remove_from_registry(),
        }
    }

    /// (Re)arm the heartbeat timer. Any previous one is cancelled first.
    pub fn start_heartbeat_timer(&self) {
        let mut core = self.core();
        if let Some(previous) = core.heartbeat_timer.take() {
            previous.cancel();
        }
        if core.state == ConnectionState::Closed || core.heartbeat_delay.is_zero() {
            return;
        }
        core.heartbeats = true;

        let session = self.weak_self.clone();
        let timer = self.timers.schedule(core.heartbeat_delay, async move {
            if let Some(session) = session.upgrade() {
                session.on_heartbeat().await;
            }
        });
        core.heartbeat_timer = Some(timer);
    }

    pub fn clear_heartbeat_timer(&self) {
        if let Some(timer) = self.core().heartbeat_timer.take() {
            timer.cancel();
        }
    }

    /// (Re)arm the timeout timer. Any previous one is cancelled first.
    pub fn start_timeout_timer(&self) {
        let mut core = self.core();
        if let Some(previous) = core.timeout_timer.take() {
            previous.cancel();
        }
        if core.state == ConnectionState::Closed || core.timeout_delay.is_zero() {
            return;
        }

        let session = self.weak_self.clone();
        let timer = self.timers.schedule(core.timeout_delay, async move {
            if let Some(session) = session.upgrade() {
                session.on_timeout().await;
            }
        });
        core.timeout_timer = Some(timer);
    }

    pub fn clear_timeout_timer(&self) {
        if let Some(timer) = self.core().timeout_timer.take() {
            timer.cancel();
        }
    }

    /// True while a timeout timer is armed
    pub fn has_timeout_timer(&self) -> bool {
        self.core().timeout_timer.is_some()
    }

    /// True while a heartbeat timer is armed
    pub fn has_heartbeat_timer(&self) -> bool {
        self.core().heartbeat_timer.is_some()
    }

    async fn on_heartbeat(&self) {
        if !matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Closing
        ) {
            return;
        }
        let ping = self.next_message_id().to_string();
        trace!(session_id = %self.id, ping = %ping, "Sending heartbeat");
        match self.send_message(Frame::ping(ping)).await {
            // An unanswered earlier ping keeps its deadline
            Ok(()) if !self.has_timeout_timer() => self.start_timeout_timer(),
            Ok(()) => {}
            Err(e) => debug!(session_id = %self.id, error = %e, "Heartbeat not sent"),
        }
    }

    /// Tell the application the session is gone. Only the first call has an
    /// effect.
    pub async fn on_disconnect(&self, reason: DisconnectReason, message: Option<String>) {
        let inbound = {
            let mut core = self.core();
            if let Some(timer) = core.heartbeat_timer.take() {
                timer.cancel();
            }
            if let Some(timer) = core.timeout_timer.take() {
                timer.cancel();
            }
            core.inbound.take()
        };
        let Some(inbound) = inbound else {
            return;
        };

        info!(session_id = %self.id, reason = %reason, "Session disconnected");
        if let Err(e) = inbound.on_disconnect(reason, message).await {
            error!(session_id = %self.id, error = %e, "Application failed in on_disconnect");
        }
    }

    /// The physical connection is gone. Always unregisters the session.
    #[instrument(level = "debug", skip(self), fields(session_id = %self.id))]
    pub async fn on_shutdown(&self) {
        let reason = {
            let core = self.core();
            match core.state {
                ConnectionState::Closing if core.close_id.is_some() => {
                    DisconnectReason::CloseFailed
                }
                ConnectionState::Closing => DisconnectReason::ClosedRemotely,
                _ => DisconnectReason::Error,
            }
        };
        self.on_disconnect(reason, None).await;
        self.set_state(ConnectionState::Closed);
        self.remove_from_registry();
    }

    fn remove_from_registry(&self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.id);
        }
    }
}

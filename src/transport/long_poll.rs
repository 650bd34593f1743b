//! Long-poll transports: persistent streaming responses and short polls.

use crate::messages::{Frame, FrameCodec};
use crate::session::errors::{Result, SessionError};
use crate::session::{
    ConnectionState, Session, TransportHandler, DEFAULT_HEARTBEAT_DELAY, DEFAULT_TIMEOUT_DELAY,
};
use crate::transport::buffer::{Delivery, TransportBuffer};
use crate::transport::format::{ResponseFormat, JSONP_INDEX_PARAM};
use crate::transport::http::{HttpMethod, HttpRequest, HttpResponse};
use crate::transport::kind::TransportKind;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, instrument, trace, warn};

pub const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024; // 1MB
pub const DEFAULT_MAX_IDLE: Duration = Duration::from_secs(1);
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_secs(20);

/// Session attribute holding the last JSONP callback index a client used
pub const JSONP_INDEX_ATTRIBUTE: &str = "polysock.jsonp-index";

/// Tuning for a long-poll adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LongPollConfig {
    /// Outbound buffer capacity in bytes
    pub buffer_size: usize,
    /// How long a send may wait for buffer space before the session times out
    pub max_idle: Duration,
    /// How long a GET is held open when there is nothing to send
    pub poll_timeout: Duration,
    pub heartbeat_interval: Duration,
    pub timeout: Duration,
}

impl Default for LongPollConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            max_idle: DEFAULT_MAX_IDLE,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            heartbeat_interval: DEFAULT_HEARTBEAT_DELAY,
            timeout: DEFAULT_TIMEOUT_DELAY,
        }
    }
}

#[derive(Debug, Default)]
struct AdapterState {
    /// The handshake GET has been seen
    handshaken: bool,
    closed: bool,
    aborted: bool,
    /// Open persistent response, if any
    stream: Option<mpsc::UnboundedSender<String>>,
    /// A peer close was echoed; finish once the buffer is flushed
    disconnect_when_empty: bool,
}

/// Adapter serving one session over HTTP long-polling.
///
/// The host routes every GET and POST for the session to [`handle`]. For
/// persistent transports the first GET returns a streaming body that stays
/// open; for non-persistent ones each GET is answered as soon as data is
/// available or the poll timeout elapses.
///
/// [`handle`]: LongPollAdapter::handle
pub struct LongPollAdapter {
    kind: TransportKind,
    format: ResponseFormat,
    config: LongPollConfig,
    codec: FrameCodec,
    session: Weak<Session>,
    buffer: TransportBuffer,
    state: Mutex<AdapterState>,
    weak_self: Weak<LongPollAdapter>,
}

impl std::fmt::Debug for LongPollAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LongPollAdapter")
            .field("kind", &self.kind)
            .field("session", &self.session.upgrade().map(|s| s.id().to_string()))
            .finish()
    }
}

impl LongPollAdapter {
    pub fn new(kind: TransportKind, session: &Arc<Session>, config: LongPollConfig) -> Arc<Self> {
        if !kind.is_long_poll() {
            warn!(transport = %kind, "Serving a full-duplex transport by long-polling");
        }
        Arc::new_cyclic(|weak_self| Self {
            kind,
            format: ResponseFormat::new(kind),
            buffer: TransportBuffer::new(config.buffer_size),
            config,
            codec: FrameCodec::default(),
            session: Arc::downgrade(session),
            state: Mutex::new(AdapterState::default()),
            weak_self: weak_self.clone(),
        })
    }

    fn lock(&self) -> MutexGuard<'_, AdapterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn buffer(&self) -> &TransportBuffer {
        &self.buffer
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// True while a persistent response is open
    pub fn has_open_stream(&self) -> bool {
        self.lock()
            .stream
            .as_ref()
            .is_some_and(|stream| !stream.is_closed())
    }

    /// Serve one HTTP request for this session
    #[instrument(level = "debug", skip(self, request), fields(transport = %self.kind, method = %request.method))]
    pub async fn handle(&self, request: HttpRequest) -> HttpResponse {
        match request.method {
            HttpMethod::Get => self.handle_get(&request).await,
            HttpMethod::Post => self.handle_post(&request).await,
            HttpMethod::Other(_) => {
                debug!("Unsupported method");
                HttpResponse::bad_request()
            }
        }
    }

    /// The host lost the persistent response (client went away)
    pub async fn on_disconnected(&self) {
        debug!(transport = %self.kind, "Persistent response dropped by host");
        self.abort().await;
    }

    async fn handle_get(&self, request: &HttpRequest) -> HttpResponse {
        let Some(session) = self.session.upgrade() else {
            return HttpResponse::not_found();
        };

        let first_poll = {
            let mut state = self.lock();
            if state.closed && self.buffer.is_empty() {
                return HttpResponse::not_found();
            }
            let first = !state.handshaken;
            state.handshaken = true;
            first
        };

        let jsonp_index = self.jsonp_index(&session, request);

        if first_poll && !self.connect(&session).await {
            return HttpResponse::service_unavailable();
        }

        if self.kind.is_persistent() {
            self.open_stream(&session)
        } else {
            self.poll(&session, jsonp_index).await
        }
    }

    async fn handle_post(&self, request: &HttpRequest) -> HttpResponse {
        {
            let state = self.lock();
            if !state.handshaken || state.closed {
                debug!("POST before handshake or after close");
                return HttpResponse::bad_request();
            }
        }

        let Some(text) = request.frame_text() else {
            debug!("Empty or undecodable POST body");
            return HttpResponse::bad_request();
        };

        let frames = self.codec.decode(&text);
        if frames.is_empty() {
            debug!(len = text.len(), "POST body held no frames");
            return HttpResponse::bad_request();
        }

        let Some(session) = self.session.upgrade() else {
            return HttpResponse::not_found();
        };

        trace!(count = frames.len(), "Dispatching posted frames");
        session.on_messages(frames).await;
        self.finish_if_drained().await;
        HttpResponse::ok_empty()
    }

    /// Send the handshake frames and bind to the session
    async fn connect(&self, session: &Arc<Session>) -> bool {
        session.set_heartbeat_delay(self.config.heartbeat_interval);
        session.set_timeout_delay(self.config.timeout);

        let interval =
            u64::try_from(self.config.heartbeat_interval.as_millis()).unwrap_or(u64::MAX);
        let handshake = FrameCodec::encode_batch([
            &Frame::session_id(session.id()),
            &Frame::heartbeat_interval(interval),
        ]);

        if !self.buffer.put_message(handshake, Duration::ZERO).await {
            warn!(
                capacity = self.buffer.capacity(),
                "Handshake does not fit in transport buffer"
            );
            self.lock().closed = true;
            session.on_connect(None).await;
            return false;
        }

        let Some(adapter) = self.weak_self.upgrade() else {
            return false;
        };
        let handler: Arc<dyn TransportHandler> = adapter;
        let connected = session.on_connect(Some(handler)).await;
        if connected {
            info!(session_id = %session.id(), transport = %self.kind, "Long-poll session connected");
        }
        connected
    }

    /// Persistent GET: open a streaming response and flush the backlog to it
    fn open_stream(&self, session: &Arc<Session>) -> HttpResponse {
        let chunks = {
            let mut state = self.lock();
            if state.closed {
                return HttpResponse::not_found();
            }
            if state.stream.as_ref().is_some_and(|stream| !stream.is_closed()) {
                warn!("Second persistent GET while a response is open");
                return HttpResponse::bad_request();
            }

            let (tx, rx) = mpsc::unbounded_channel();
            if let Some(preamble) = self.format.preamble() {
                let _ = tx.send(preamble);
            }
            let backlog = self.buffer.drain_messages();
            if !backlog.is_empty() {
                let _ = tx.send(self.format.wrap(&backlog.concat(), 0));
            }
            state.stream = Some(tx);
            rx
        };

        session.start_heartbeat_timer();
        HttpResponse::stream(self.format.content_type(), chunks)
    }

    /// Non-persistent GET: answer now if there is a backlog, otherwise wait
    /// for the next send or the poll timeout.
    async fn poll(&self, session: &Arc<Session>, jsonp_index: u64) -> HttpResponse {
        // While closing, the deadline for the close echo keeps running
        if session.state() != ConnectionState::Closing {
            session.clear_timeout_timer();
        }

        let mut messages = self.buffer.drain_messages();
        if messages.is_empty() {
            let (tx, mut rx) = oneshot::channel();
            self.buffer.set_listener(tx);
            messages = match tokio::time::timeout(self.config.poll_timeout, &mut rx).await {
                Ok(Ok(delivery)) => delivery.into_messages(),
                Ok(Err(_)) => Vec::new(),
                Err(_) => {
                    drop(self.buffer.take_listener());
                    // A send may have raced the timeout
                    rx.try_recv()
                        .map(Delivery::into_messages)
                        .unwrap_or_default()
                }
            };
        }

        trace!(count = messages.len(), "Completing poll");
        let body = self.format.wrap(&messages.concat(), jsonp_index);
        self.finish_poll(session).await;
        HttpResponse::ok(self.format.content_type(), body)
    }

    async fn finish_poll(&self, session: &Arc<Session>) {
        let (closed, pending_disconnect) = {
            let state = self.lock();
            (state.closed, state.disconnect_when_empty)
        };
        if closed {
            return;
        }
        if pending_disconnect && self.buffer.is_empty() {
            self.abort().await;
            return;
        }
        // Clients that stop polling are timed out
        if !session.has_timeout_timer() {
            session.start_timeout_timer();
        }
    }

    async fn finish_if_drained(&self) {
        let pending_disconnect = {
            let state = self.lock();
            !state.closed && state.disconnect_when_empty
        };
        if pending_disconnect && self.buffer.is_empty() {
            self.abort().await;
        }
    }

    fn jsonp_index(&self, session: &Session, request: &HttpRequest) -> u64 {
        if self.kind != TransportKind::JsonpPolling {
            return 0;
        }
        if let Some(index) = request
            .query_param(JSONP_INDEX_PARAM)
            .and_then(|i| i.parse::<u64>().ok())
        {
            session.set_attribute(JSONP_INDEX_ATTRIBUTE, Value::from(index));
            return index;
        }
        session
            .attribute(JSONP_INDEX_ATTRIBUTE)
            .and_then(|value| value.as_u64())
            .unwrap_or(0)
    }

    /// Write `encoded` straight to the open stream, after anything still
    /// buffered. Returns `None` if no stream is open.
    fn write_to_stream(&self, encoded: &str) -> Option<Result<()>> {
        let state = self.lock();
        let stream = state.stream.as_ref()?;
        let mut chunk = self.buffer.drain_messages().concat();
        chunk.push_str(encoded);
        Some(
            stream
                .send(self.format.wrap(&chunk, 0))
                .map_err(|_| SessionError::TransportClosed),
        )
    }

    /// Move anything buffered onto the open stream
    fn flush_to_stream(&self) {
        let state = self.lock();
        let Some(stream) = state.stream.as_ref() else {
            return;
        };
        let backlog = self.buffer.drain_messages();
        if !backlog.is_empty() && stream.send(self.format.wrap(&backlog.concat(), 0)).is_err() {
            debug!(count = backlog.len(), "Stream closed while flushing backlog");
        }
    }
}

#[async_trait]
impl TransportHandler for LongPollAdapter {
    fn transport_name(&self) -> &'static str {
        self.kind.name()
    }

    async fn send_message(&self, frame: Frame) -> Result<()> {
        if self.lock().closed {
            return Err(SessionError::TransportClosed);
        }
        let encoded = FrameCodec::encode(&frame);

        if self.kind.is_persistent() {
            if let Some(result) = self.write_to_stream(&encoded) {
                result?;
                if let Some(session) = self.session.upgrade() {
                    session.start_heartbeat_timer();
                }
                return Ok(());
            }
        }

        if !self.buffer.put_message(encoded, self.config.max_idle).await {
            return Err(SessionError::BufferTimeout {
                wait: self.config.max_idle,
            });
        }

        if self.kind.is_persistent() {
            self.flush_to_stream();
        }
        Ok(())
    }

    async fn disconnect_when_empty(&self) {
        if self.buffer.is_empty() {
            self.abort().await;
        } else {
            debug!(pending = self.buffer.len(), "Deferring disconnect until buffer drains");
            self.lock().disconnect_when_empty = true;
        }
    }

    async fn abort(&self) {
        {
            let mut state = self.lock();
            if state.aborted {
                return;
            }
            state.aborted = true;
            state.closed = true;
            state.stream = None;
            state.disconnect_when_empty = false;
        }
        self.buffer.clear();
        debug!(transport = %self.kind, "Long-poll adapter aborted");

        if let Some(session) = self.session.upgrade() {
            if session.is_bound_to(self) {
                session.clear_heartbeat_timer();
                session.clear_timeout_timer();
                session.on_shutdown().await;
            }
        }
    }
}

use crate::messages::{Frame, TEXT_MESSAGE_TYPE};
use crate::session::errors::{Result, SessionError};
use crate::session::machine::Session;
use crate::session::{ConnectionState, DisconnectReason};
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Weak};

/// Application callbacks for one logical socket.
///
/// Errors returned from these are logged and swallowed; a failing
/// `on_connect` closes the session.
#[async_trait]
pub trait SocketInbound: Send + Sync {
    /// The session is connected. `outbound` stays valid for its lifetime.
    async fn on_connect(&self, outbound: SocketOutbound) -> anyhow::Result<()>;

    /// A Data frame arrived from the client
    async fn on_message(&self, message_type: i32, message: String) -> anyhow::Result<()>;

    /// The session is gone. Called at most once.
    async fn on_disconnect(
        &self,
        reason: DisconnectReason,
        message: Option<String>,
    ) -> anyhow::Result<()>;
}

/// The application's handle for talking back to a client.
///
/// Holds a non-owning reference; once the session has been dropped every
/// operation reports the socket as closed.
#[derive(Clone)]
pub struct SocketOutbound {
    session_id: String,
    session: Weak<Session>,
}

impl fmt::Debug for SocketOutbound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketOutbound")
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl SocketOutbound {
    pub(crate) fn new(session_id: String, session: Weak<Session>) -> Self {
        Self {
            session_id,
            session,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    fn session(&self) -> Result<Arc<Session>> {
        self.session.upgrade().ok_or_else(|| SessionError::NotConnected {
            session_id: self.session_id.clone(),
            state: ConnectionState::Closed,
        })
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session
            .upgrade()
            .map(|session| session.state())
            .unwrap_or(ConnectionState::Closed)
    }

    /// Send a Data frame with the given message type tag
    pub async fn send_message(&self, message_type: i32, message: impl Into<String>) -> Result<()> {
        self.session()?
            .send_message(Frame::data(message_type, message))
            .await
    }

    pub async fn send_text(&self, message: impl Into<String>) -> Result<()> {
        self.send_message(TEXT_MESSAGE_TYPE, message).await
    }

    /// Serialize `value` and send it as a JSON Data frame
    pub async fn send_json<T: Serialize + Sync>(&self, value: &T) -> Result<()> {
        let frame = Frame::json(value)?;
        self.session()?.send_message(frame).await
    }

    /// Start an orderly close handshake
    pub async fn close(&self) {
        if let Ok(session) = self.session() {
            session.start_close().await;
        }
    }

    /// Drop the connection immediately without a close handshake
    pub async fn disconnect(&self) {
        if let Ok(session) = self.session() {
            session.disconnect().await;
        }
    }
}

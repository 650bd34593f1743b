use crate::session::ConnectionState;
use std::time::Duration;
use thiserror::Error;

/// Failures sending a frame through a session
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session {session_id} is not connected (state: {state})")]
    NotConnected {
        session_id: String,
        state: ConnectionState,
    },

    #[error("No transport bound to session {session_id}")]
    NoTransport { session_id: String },

    #[error("Transport buffer stayed full for {wait:?}")]
    BufferTimeout { wait: Duration },

    #[error("Transport write failed: {0}")]
    TransportWrite(#[from] std::io::Error),

    #[error("Transport closed")]
    TransportClosed,

    #[error("JSON encoding error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SessionError {
    /// Errors after which the transport cannot be used again
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionError::BufferTimeout { .. }
                | SessionError::TransportWrite(_)
                | SessionError::TransportClosed
        )
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

use serde::{Deserialize, Serialize};
use std::fmt;

/// Message type tag for plain text Data frames
pub const TEXT_MESSAGE_TYPE: i32 = 0;
/// Message type tag for Data frames carrying a JSON document
pub const JSON_MESSAGE_TYPE: i32 = 1;

/// The kind of a wire frame, with its decimal wire code
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    SessionId,
    HeartbeatInterval,
    Close,
    Ping,
    Pong,
    Data,
}

impl FrameKind {
    /// All frame kinds in wire-code order
    pub const ALL: [FrameKind; 6] = [
        FrameKind::SessionId,
        FrameKind::HeartbeatInterval,
        FrameKind::Close,
        FrameKind::Ping,
        FrameKind::Pong,
        FrameKind::Data,
    ];

    /// Get the decimal code written on the wire
    pub fn code(self) -> u32 {
        match self {
            FrameKind::SessionId => 1,
            FrameKind::HeartbeatInterval => 2,
            FrameKind::Close => 3,
            FrameKind::Ping => 4,
            FrameKind::Pong => 5,
            FrameKind::Data => 6,
        }
    }

    /// Look up a frame kind by its wire code
    pub fn from_code(code: u32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Look up a frame kind by its lowercase name (as printed by `name`)
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    /// Get the frame kind as a string
    pub fn name(self) -> &'static str {
        match self {
            FrameKind::SessionId => "session-id",
            FrameKind::HeartbeatInterval => "heartbeat-interval",
            FrameKind::Close => "close",
            FrameKind::Ping => "ping",
            FrameKind::Pong => "pong",
            FrameKind::Data => "data",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One unit of the wire protocol. Frames are immutable once built.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    kind: FrameKind,
    message_type: i32,
    payload: String,
}

impl Frame {
    /// Create a frame of any kind. Non-data frames carry the text message type.
    pub fn new(kind: FrameKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            message_type: TEXT_MESSAGE_TYPE,
            payload: payload.into(),
        }
    }

    /// Create a Data frame with an application message type tag
    pub fn data(message_type: i32, payload: impl Into<String>) -> Self {
        Self {
            kind: FrameKind::Data,
            message_type,
            payload: payload.into(),
        }
    }

    /// Create a plain text Data frame
    pub fn text(payload: impl Into<String>) -> Self {
        Self::data(TEXT_MESSAGE_TYPE, payload)
    }

    /// Create a Data frame holding `value` serialized as JSON
    pub fn json<T: Serialize>(value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::data(JSON_MESSAGE_TYPE, serde_json::to_string(value)?))
    }

    pub fn session_id(id: impl Into<String>) -> Self {
        Self::new(FrameKind::SessionId, id)
    }

    /// Create a HeartbeatInterval frame announcing the interval in milliseconds
    pub fn heartbeat_interval(millis: u64) -> Self {
        Self::new(FrameKind::HeartbeatInterval, millis.to_string())
    }

    pub fn close(token: impl Into<String>) -> Self {
        Self::new(FrameKind::Close, token)
    }

    pub fn ping(payload: impl Into<String>) -> Self {
        Self::new(FrameKind::Ping, payload)
    }

    pub fn pong(payload: impl Into<String>) -> Self {
        Self::new(FrameKind::Pong, payload)
    }

    pub fn kind(&self) -> FrameKind {
        self.kind
    }

    /// Get the application message type tag (meaningful for Data frames only)
    pub fn message_type(&self) -> i32 {
        self.message_type
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    /// Consume the frame, returning its payload
    pub fn into_payload(self) -> String {
        self.payload
    }

    pub fn is_data(&self) -> bool {
        self.kind == FrameKind::Data
    }
}

pub mod types;
pub mod wire;

pub use types::{Frame, FrameKind, JSON_MESSAGE_TYPE, TEXT_MESSAGE_TYPE};
pub use wire::{
    DecodeOutcome,
    FrameCodec,
    WireProtocolError,

    // Wire protocol constants
    MAX_FRAME_PAYLOAD_SIZE,
    SEPARATOR,
    SUSPICIOUS_PAYLOAD_THRESHOLD,
};

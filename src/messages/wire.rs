use crate::messages::types::{Frame, FrameKind};
use thiserror::Error;
use tracing::{debug, trace, warn};

// Wire protocol constants
pub const SEPARATOR: char = '~';
pub const MAX_FRAME_PAYLOAD_SIZE: usize = 16 * 1024 * 1024; // 16MB
pub const SUSPICIOUS_PAYLOAD_THRESHOLD: usize = 8 * 1024 * 1024; // 8MB threshold for logging

/// Reasons a single frame could not be parsed.
///
/// The lenient decoder never returns these to callers; it stops at the first
/// one and keeps the frames decoded before it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireProtocolError {
    #[error("Expected separator at byte {position}")]
    MissingSeparator { position: usize },

    #[error("Input ended inside a frame")]
    Incomplete,

    #[error("Unknown frame kind code: {code}")]
    UnknownKind { code: String },

    #[error("Invalid {field} field: {value:?}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("Payload too large: {size} bytes exceeds maximum of {max_size} bytes")]
    PayloadTooLarge { size: usize, max_size: usize },

    #[error("Payload length {length} does not end on a character boundary")]
    InvalidBoundary { length: usize },
}

impl WireProtocolError {
    /// True when more input could turn this into a valid frame
    pub fn is_incomplete(&self) -> bool {
        matches!(self, WireProtocolError::Incomplete)
    }
}

/// Result of decoding the longest valid prefix of some input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeOutcome {
    /// Frames decoded, in wire order
    pub frames: Vec<Frame>,
    /// Bytes of input covered by `frames`
    pub consumed: usize,
    /// Why decoding stopped before the end of input, if it did
    pub stopped: Option<WireProtocolError>,
}

/// Encoder/decoder for the `~kind~length~payload` frame protocol.
///
/// Data frames carry one extra field, the message type tag:
/// `~6~<messageType>~<length>~<payload>`. Lengths count UTF-8 bytes of the
/// payload only. Frames are concatenated without delimiters.
#[derive(Debug, Clone)]
pub struct FrameCodec {
    max_payload_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self {
            max_payload_size: MAX_FRAME_PAYLOAD_SIZE,
        }
    }
}

impl FrameCodec {
    /// Create a codec that refuses payloads larger than `max_payload_size`
    pub fn with_max_payload_size(max_payload_size: usize) -> Self {
        Self { max_payload_size }
    }

    pub fn max_payload_size(&self) -> usize {
        self.max_payload_size
    }

    /// Encode a single frame
    pub fn encode(frame: &Frame) -> String {
        let mut out = String::with_capacity(frame.payload().len() + 16);
        Self::encode_into(frame, &mut out);
        out
    }

    /// Encode several frames back to back
    pub fn encode_batch<'a>(frames: impl IntoIterator<Item = &'a Frame>) -> String {
        let mut out = String::new();
        for frame in frames {
            Self::encode_into(frame, &mut out);
        }
        out
    }

    fn encode_into(frame: &Frame, out: &mut String) {
        out.push(SEPARATOR);
        out.push_str(&frame.kind().code().to_string());
        out.push(SEPARATOR);
        if frame.is_data() {
            out.push_str(&frame.message_type().to_string());
            out.push(SEPARATOR);
        }
        out.push_str(&frame.payload().len().to_string());
        out.push(SEPARATOR);
        out.push_str(frame.payload());
    }

    /// Decode every frame up to the first malformed or truncated one.
    ///
    /// Never fails: trailing garbage is dropped.
    pub fn decode(&self, input: &str) -> Vec<Frame> {
        self.decode_prefix(input).frames
    }

    /// Decode the longest valid prefix of `input`, reporting how far it got
    pub fn decode_prefix(&self, input: &str) -> DecodeOutcome {
        let mut frames = Vec::new();
        let mut position = 0;
        let mut stopped = None;

        while position < input.len() {
            match self.parse_frame(&input[position..]) {
                Ok((frame, used)) => {
                    trace!(kind = %frame.kind(), used, "decoded frame");
                    frames.push(frame);
                    position += used;
                }
                Err(e) => {
                    debug!(
                        error = %e,
                        position,
                        ignored = input.len() - position,
                        "Stopped decoding frames"
                    );
                    stopped = Some(e);
                    break;
                }
            }
        }

        DecodeOutcome {
            frames,
            consumed: position,
            stopped,
        }
    }

    /// Parse one frame from the start of `input`, returning it and the bytes it used
    pub fn parse_frame(&self, input: &str) -> Result<(Frame, usize), WireProtocolError> {
        if input.is_empty() {
            return Err(WireProtocolError::Incomplete);
        }
        if !input.starts_with(SEPARATOR) {
            return Err(WireProtocolError::MissingSeparator { position: 0 });
        }

        let (code, position) = read_field(input, 1)?;
        let kind = parse_unsigned(code, "kind")
            .ok()
            .and_then(|code| u32::try_from(code).ok())
            .and_then(FrameKind::from_code)
            .ok_or_else(|| WireProtocolError::UnknownKind {
                code: code.to_string(),
            })?;

        let (message_type, position) = if kind == FrameKind::Data {
            let (tag, position) = read_field(input, position)?;
            (Some(parse_message_type(tag)?), position)
        } else {
            (None, position)
        };

        let (length, position) = read_field(input, position)?;
        let length = parse_unsigned(length, "length")?;
        self.validate_payload_size(length)?;

        let end = position
            .checked_add(length)
            .ok_or(WireProtocolError::PayloadTooLarge {
                size: length,
                max_size: self.max_payload_size,
            })?;
        if end > input.len() {
            return Err(WireProtocolError::Incomplete);
        }
        let payload = input
            .get(position..end)
            .ok_or(WireProtocolError::InvalidBoundary { length })?;

        let frame = match message_type {
            Some(message_type) => Frame::data(message_type, payload),
            None => Frame::new(kind, payload),
        };
        Ok((frame, end))
    }

    fn validate_payload_size(&self, size: usize) -> Result<(), WireProtocolError> {
        if size > self.max_payload_size {
            warn!(
                size,
                max_size = self.max_payload_size,
                "Frame payload exceeds maximum allowed size"
            );
            return Err(WireProtocolError::PayloadTooLarge {
                size,
                max_size: self.max_payload_size,
            });
        }
        if size > SUSPICIOUS_PAYLOAD_THRESHOLD {
            warn!(
                size,
                threshold = SUSPICIOUS_PAYLOAD_THRESHOLD,
                "Frame payload exceeds suspicious threshold but is still allowed"
            );
        }
        Ok(())
    }
}

/// Read the text between `start` and the next separator
fn read_field(input: &str, start: usize) -> Result<(&str, usize), WireProtocolError> {
    let rest = input.get(start..).ok_or(WireProtocolError::Incomplete)?;
    match rest.find(SEPARATOR) {
        Some(end) => Ok((&rest[..end], start + end + 1)),
        None if rest.bytes().all(|b| b.is_ascii_digit() || b == b'-') => {
            Err(WireProtocolError::Incomplete)
        }
        None => Err(WireProtocolError::MissingSeparator {
            position: input.len(),
        }),
    }
}

fn parse_unsigned(value: &str, field: &'static str) -> Result<usize, WireProtocolError> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WireProtocolError::InvalidNumber {
            field,
            value: value.to_string(),
        });
    }
    value
        .parse::<usize>()
        .map_err(|_| WireProtocolError::InvalidNumber {
            field,
            value: value.to_string(),
        })
}

fn parse_message_type(value: &str) -> Result<i32, WireProtocolError> {
    let digits = value.strip_prefix('-').unwrap_or(value);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(WireProtocolError::InvalidNumber {
            field: "message type",
            value: value.to_string(),
        });
    }
    value
        .parse::<i32>()
        .map_err(|_| WireProtocolError::InvalidNumber {
            field: "message type",
            value: value.to_string(),
        })
}

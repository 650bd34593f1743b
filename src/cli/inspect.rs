use crate::cli::error_handler::CliError;
use crate::messages::{Frame, FrameCodec, FrameKind, WireProtocolError, TEXT_MESSAGE_TYPE};
use std::fmt;

/// Accept a frame kind by name (`ping`) or wire code (`4`)
pub fn parse_frame_kind(value: &str) -> Result<FrameKind, CliError> {
    FrameKind::from_name(value)
        .or_else(|| value.parse::<u32>().ok().and_then(FrameKind::from_code))
        .ok_or_else(|| CliError::invalid_frame_kind(value))
}

/// Wire encoding of a single frame
pub fn encode_frame(
    kind: &str,
    message_type: Option<i32>,
    payload: &str,
) -> Result<String, CliError> {
    let kind = parse_frame_kind(kind)?;
    let frame = match (kind, message_type) {
        (FrameKind::Data, message_type) => {
            Frame::data(message_type.unwrap_or(TEXT_MESSAGE_TYPE), payload)
        }
        (kind, None) => Frame::new(kind, payload),
        (kind, Some(_)) => return Err(CliError::message_type_not_allowed(kind.name())),
    };
    Ok(FrameCodec::encode(&frame))
}

/// What `decode` found in some wire text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeReport {
    pub frames: Vec<Frame>,
    pub consumed: usize,
    /// Trailing bytes the decoder skipped
    pub ignored: usize,
    pub stopped: Option<WireProtocolError>,
}

impl DecodeReport {
    /// Fail if any input was left over
    pub fn into_strict(self) -> Result<Vec<Frame>, CliError> {
        match self.stopped {
            Some(err) => Err(err.into()),
            None => Ok(self.frames),
        }
    }
}

impl fmt::Display for DecodeReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, frame) in self.frames.iter().enumerate() {
            if frame.is_data() {
                writeln!(
                    f,
                    "#{} {} (type {}): {}",
                    i + 1,
                    frame.kind(),
                    frame.message_type(),
                    frame.payload()
                )?;
            } else {
                writeln!(f, "#{} {}: {}", i + 1, frame.kind(), frame.payload())?;
            }
        }
        if self.ignored > 0 {
            write!(f, "ignored {} trailing byte(s)", self.ignored)?;
            if let Some(reason) = &self.stopped {
                write!(f, " ({})", reason)?;
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

pub fn decode_wire(input: &str) -> DecodeReport {
    let outcome = FrameCodec::default().decode_prefix(input);
    DecodeReport {
        ignored: input.len() - outcome.consumed,
        frames: outcome.frames,
        consumed: outcome.consumed,
        stopped: outcome.stopped,
    }
}

//! Length-prefixed UTF-8 messages over a byte stream.
//!
//! Each message is a 4-byte big-endian length followed by that many bytes of
//! UTF-8 text. Native socket clients speak this framing; the frames inside
//! each message use the regular wire codec.

use crate::transport::DuplexChannel;
use async_trait::async_trait;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, trace, warn};

pub const LENGTH_PREFIX_SIZE: usize = 4; // 4 bytes for u32 length prefix
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 1024 * 1024; // 1MB
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(30);
pub const SUSPICIOUS_MESSAGE_THRESHOLD: usize = 512 * 1024; // 512KB threshold for logging

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Unexpected EOF: got {read} of {expected} bytes")]
    UnexpectedEof { read: usize, expected: usize },

    #[error("Message too large: {size} bytes (max: {max_size})")]
    MessageTooLarge { size: usize, max_size: usize },

    #[error("Invalid message length: {length}")]
    InvalidLength { length: u32 },

    #[error("Message is not valid UTF-8")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    #[error("Read timeout after {timeout:?}")]
    ReadTimeout { timeout: Duration },

    #[error("Write timeout after {timeout:?}")]
    WriteTimeout { timeout: Duration },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

impl StreamError {
    /// The peer went away rather than misbehaving
    pub fn is_disconnect(&self) -> bool {
        matches!(
            self,
            StreamError::ConnectionClosed | StreamError::UnexpectedEof { .. }
        )
    }
}

impl From<StreamError> for io::Error {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Io(e) => e,
            StreamError::ReadTimeout { .. } | StreamError::WriteTimeout { .. } => {
                io::Error::new(io::ErrorKind::TimedOut, err)
            }
            StreamError::ConnectionClosed | StreamError::UnexpectedEof { .. } => {
                io::Error::new(io::ErrorKind::UnexpectedEof, err)
            }
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}

/// Limits and timeouts for one stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamConfig {
    pub max_message_size: usize,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            read_timeout: DEFAULT_READ_TIMEOUT,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}

impl StreamConfig {
    pub fn with_max_message_size(max_message_size: usize) -> Self {
        Self {
            max_message_size,
            ..Self::default()
        }
    }

    pub fn with_timeouts(read_timeout: Duration, write_timeout: Duration) -> Self {
        Self {
            read_timeout,
            write_timeout,
            ..Self::default()
        }
    }
}

/// Reads and writes length-prefixed messages
#[derive(Debug, Clone, Default)]
pub struct MessageFramer {
    config: StreamConfig,
}

impl MessageFramer {
    pub fn new(config: StreamConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StreamConfig {
        &self.config
    }

    /// Check an announced or outgoing length against the configured limits
    fn validate_length(&self, size: usize) -> Result<usize, StreamError> {
        if size == 0 {
            warn!("Received zero-length message prefix");
            return Err(StreamError::InvalidLength { length: 0 });
        }
        if size > self.config.max_message_size {
            error!(
                size,
                max_size = self.config.max_message_size,
                "Message size exceeds maximum allowed size"
            );
            return Err(StreamError::MessageTooLarge {
                size,
                max_size: self.config.max_message_size,
            });
        }
        if size > SUSPICIOUS_MESSAGE_THRESHOLD {
            warn!(
                size,
                threshold = SUSPICIOUS_MESSAGE_THRESHOLD,
                "Message size exceeds suspicious threshold but is still allowed"
            );
        }
        Ok(size)
    }

    /// Fill `buffer` completely. A clean EOF before the first byte is
    /// reported as `ConnectionClosed` when `eof_ok` is set.
    async fn read_exact_or_eof(
        reader: &mut (impl AsyncRead + Unpin),
        buffer: &mut [u8],
        eof_ok: bool,
    ) -> Result<(), StreamError> {
        let expected = buffer.len();
        let mut total_read = 0;
        while total_read < expected {
            match reader.read(&mut buffer[total_read..]).await? {
                0 if total_read == 0 && eof_ok => return Err(StreamError::ConnectionClosed),
                0 => {
                    return Err(StreamError::UnexpectedEof {
                        read: total_read,
                        expected,
                    })
                }
                read => {
                    total_read += read;
                    trace!(read, total_read, expected, "Partial read completed");
                }
            }
        }
        Ok(())
    }

    /// Read one message, waiting at most the configured read timeout
    #[instrument(level = "trace", skip(self, reader))]
    pub async fn read_message(
        &self,
        reader: &mut (impl AsyncRead + Unpin),
    ) -> Result<String, StreamError> {
        let timeout = self.config.read_timeout;
        match tokio::time::timeout(timeout, self.read_message_untimed(reader)).await {
            Ok(result) => result,
            Err(_) => {
                debug!(timeout = ?timeout, "Read operation timed out");
                Err(StreamError::ReadTimeout { timeout })
            }
        }
    }

    async fn read_message_untimed(
        &self,
        reader: &mut (impl AsyncRead + Unpin),
    ) -> Result<String, StreamError> {
        let mut length_buffer = [0u8; LENGTH_PREFIX_SIZE];
        Self::read_exact_or_eof(reader, &mut length_buffer, true).await?;

        let length = u32::from_be_bytes(length_buffer);
        let size = usize::try_from(length).map_err(|_| StreamError::InvalidLength { length })?;
        let size = self.validate_length(size)?;

        let mut message = vec![0u8; size];
        Self::read_exact_or_eof(reader, &mut message, false).await?;
        trace!(size, "Read message");
        Ok(String::from_utf8(message)?)
    }

    /// Write one message and flush, waiting at most the configured write timeout
    #[instrument(level = "trace", skip(self, writer, message), fields(size = message.len()))]
    pub async fn write_message(
        &self,
        writer: &mut (impl AsyncWrite + Unpin),
        message: &str,
    ) -> Result<(), StreamError> {
        let size = self.validate_length(message.len())?;
        let length = u32::try_from(size).map_err(|_| StreamError::MessageTooLarge {
            size,
            max_size: u32::MAX as usize,
        })?;

        let timeout = self.config.write_timeout;
        let write = async {
            writer.write_all(&length.to_be_bytes()).await?;
            writer.write_all(message.as_bytes()).await?;
            writer.flush().await
        };
        match tokio::time::timeout(timeout, write).await {
            Ok(result) => Ok(result?),
            Err(_) => {
                debug!(timeout = ?timeout, "Write operation timed out");
                Err(StreamError::WriteTimeout { timeout })
            }
        }
    }
}

/// Write half of a socket exposed as a [`DuplexChannel`]
pub struct StreamChannel<W> {
    writer: Mutex<W>,
    framer: MessageFramer,
    closed: AtomicBool,
}

impl<W> StreamChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    pub fn new(writer: W, framer: MessageFramer) -> Self {
        Self {
            writer: Mutex::new(writer),
            framer,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<W> DuplexChannel for StreamChannel<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_text(&self, text: String) -> io::Result<()> {
        if self.is_closed() {
            return Err(io::Error::new(
                io::ErrorKind::NotConnected,
                StreamError::ConnectionClosed,
            ));
        }
        let mut writer = self.writer.lock().await;
        self.framer
            .write_message(&mut *writer, &text)
            .await
            .map_err(io::Error::from)
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!(error = %e, "Error shutting down stream");
        }
    }
}

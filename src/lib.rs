pub mod cli;
pub mod config;
pub mod messages;
pub mod network;
pub mod session;
pub mod transport;

// Re-export key types for easy testing
pub use config::Config;
pub use messages::{Frame, FrameCodec, FrameKind};
pub use network::{ServerConfig, SocketServer};
pub use session::{
    ConnectionState, DisconnectReason, Session, SessionRegistry, SocketInbound, SocketOutbound,
    TransportHandler,
};
pub use transport::{FullDuplexAdapter, LongPollAdapter, TransportKind};

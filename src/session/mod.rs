pub mod errors;
pub mod handler;
pub mod inbound;
pub mod machine;
pub mod registry;
pub mod timer;

pub use errors::SessionError;
pub use handler::TransportHandler;
pub use inbound::{SocketInbound, SocketOutbound};
pub use machine::Session;
pub use registry::SessionRegistry;
pub use timer::{TimerHandle, TimerService};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// Session constants
pub const DEFAULT_HEARTBEAT_DELAY: Duration = Duration::from_secs(15);
pub const DEFAULT_TIMEOUT_DELAY: Duration = Duration::from_secs(10);

/// Close token a client sends when it starts the close itself
pub const REMOTE_CLOSE_TOKEN: &str = "client";
/// Prefix of the close ids this side generates
pub const LOCAL_CLOSE_PREFIX: &str = "server";

/// Lifecycle of a session. Closed is terminal.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Connected,
    Closing,
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Why the application was told a session ended
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The peer stopped answering heartbeats, or the outbound buffer stayed full
    Timeout,
    /// Close handshake started here completed
    Closed,
    /// The peer started the close
    ClosedRemotely,
    /// Close started here, but the transport died before the peer confirmed
    CloseFailed,
    /// The transport died unexpectedly
    Error,
    /// The application dropped the connection
    Disconnect,
    /// The transport never connected
    ConnectFailed,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DisconnectReason::Timeout => "timeout",
            DisconnectReason::Closed => "closed",
            DisconnectReason::ClosedRemotely => "closed-remotely",
            DisconnectReason::CloseFailed => "close-failed",
            DisconnectReason::Error => "error",
            DisconnectReason::Disconnect => "disconnect",
            DisconnectReason::ConnectFailed => "connect-failed",
        };
        f.write_str(name)
    }
}

pub mod server;
pub mod stream;

pub use server::{InboundFactory, ServerConfig, SocketServer};
pub use stream::{MessageFramer, StreamChannel, StreamConfig, StreamError};

pub mod buffer;
pub mod format;
pub mod full_duplex;
pub mod http;
pub mod kind;
pub mod long_poll;

pub use buffer::{BufferListener, Delivery, TransportBuffer};
pub use format::ResponseFormat;
pub use full_duplex::{DuplexChannel, DuplexConfig, FullDuplexAdapter, OPEN_HANDSHAKE};
pub use http::{HttpMethod, HttpRequest, HttpResponse, ResponseBody};
pub use kind::{PollMode, TransportKind};
pub use long_poll::{LongPollAdapter, LongPollConfig};

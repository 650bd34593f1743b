use serde::{Deserialize, Serialize};
use std::fmt;

/// How a transport carries server-to-client traffic
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PollMode {
    /// One GET stays open and is written to repeatedly
    Persistent,
    /// Each GET is answered once and closed; the client polls again
    NonPersistent,
    /// A bidirectional channel, no polling at all
    FullDuplex,
}

/// Every transport the server knows how to serve.
///
/// This is the static registration table: adapters are chosen by matching on
/// the kind rather than discovered at runtime.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    #[serde(rename = "websocket")]
    WebSocket,
    #[serde(rename = "flashsocket")]
    FlashSocket,
    #[serde(rename = "xhr-polling")]
    XhrPolling,
    #[serde(rename = "xhr-multipart")]
    XhrMultipart,
    #[serde(rename = "htmlfile")]
    HtmlFile,
    #[serde(rename = "jsonp-polling")]
    JsonpPolling,
}

impl TransportKind {
    pub const ALL: [TransportKind; 6] = [
        TransportKind::WebSocket,
        TransportKind::FlashSocket,
        TransportKind::XhrPolling,
        TransportKind::XhrMultipart,
        TransportKind::HtmlFile,
        TransportKind::JsonpPolling,
    ];

    /// Name used in request paths and logs
    pub fn name(self) -> &'static str {
        match self {
            TransportKind::WebSocket => "websocket",
            TransportKind::FlashSocket => "flashsocket",
            TransportKind::XhrPolling => "xhr-polling",
            TransportKind::XhrMultipart => "xhr-multipart",
            TransportKind::HtmlFile => "htmlfile",
            TransportKind::JsonpPolling => "jsonp-polling",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn poll_mode(self) -> PollMode {
        match self {
            TransportKind::WebSocket | TransportKind::FlashSocket => PollMode::FullDuplex,
            TransportKind::XhrMultipart | TransportKind::HtmlFile => PollMode::Persistent,
            TransportKind::XhrPolling | TransportKind::JsonpPolling => PollMode::NonPersistent,
        }
    }

    /// True if the long-poll adapter serves this transport
    pub fn is_long_poll(self) -> bool {
        self.poll_mode() != PollMode::FullDuplex
    }

    pub fn is_persistent(self) -> bool {
        self.poll_mode() == PollMode::Persistent
    }
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

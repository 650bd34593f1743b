//! How encoded frames are wrapped for each long-poll transport.

use crate::transport::kind::TransportKind;
use serde_json::Value;

pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=UTF-8";
pub const JAVASCRIPT_CONTENT_TYPE: &str = "text/javascript; charset=UTF-8";
pub const HTML_CONTENT_TYPE: &str = "text/html; charset=UTF-8";
pub const MULTIPART_CONTENT_TYPE: &str = "multipart/x-mixed-replace;boundary=\"socketio\"";

pub const MULTIPART_BOUNDARY: &str = "socketio";
/// Browsers buffer small streamed documents; the htmlfile preamble is padded
/// to this many bytes so the first script chunk runs right away.
pub const HTMLFILE_PREAMBLE_SIZE: usize = 256;

/// Query parameter carrying the JSONP callback index
pub const JSONP_INDEX_PARAM: &str = "i";

/// Wraps frame batches for one transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseFormat {
    kind: TransportKind,
}

impl ResponseFormat {
    pub fn new(kind: TransportKind) -> Self {
        Self { kind }
    }

    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    pub fn content_type(&self) -> &'static str {
        match self.kind {
            TransportKind::JsonpPolling => JAVASCRIPT_CONTENT_TYPE,
            TransportKind::XhrMultipart => MULTIPART_CONTENT_TYPE,
            TransportKind::HtmlFile => HTML_CONTENT_TYPE,
            TransportKind::XhrPolling | TransportKind::WebSocket | TransportKind::FlashSocket => {
                TEXT_CONTENT_TYPE
            }
        }
    }

    /// Written once when a persistent response is opened
    pub fn preamble(&self) -> Option<String> {
        match self.kind {
            TransportKind::XhrMultipart => Some(format!("--{}\r\n", MULTIPART_BOUNDARY)),
            TransportKind::HtmlFile => {
                let open = "<html><body>";
                Some(format!(
                    "{open}{}",
                    " ".repeat(HTMLFILE_PREAMBLE_SIZE - open.len())
                ))
            }
            _ => None,
        }
    }

    /// Wrap an encoded frame batch as one response body or stream chunk
    pub fn wrap(&self, frames: &str, jsonp_index: u64) -> String {
        match self.kind {
            TransportKind::JsonpPolling => {
                format!("io.JSONP[{}]._({});", jsonp_index, json_string(frames))
            }
            TransportKind::XhrMultipart => format!(
                "Content-Type: text/plain\r\n\r\n{}\r\n--{}\r\n",
                frames, MULTIPART_BOUNDARY
            ),
            TransportKind::HtmlFile => format!(
                "<script>parent.s._({}, document);</script>",
                json_string(frames)
            ),
            TransportKind::XhrPolling | TransportKind::WebSocket | TransportKind::FlashSocket => {
                frames.to_string()
            }
        }
    }
}

/// Quote `text` as a JavaScript-safe JSON string literal
fn json_string(text: &str) -> String {
    Value::String(text.to_string()).to_string()
}

//! Minimal request/response model the long-poll adapter is driven through.
//!
//! The HTTP server itself is the host's business; it translates its own
//! request type into [`HttpRequest`] and writes back whatever
//! [`HttpResponse`] the adapter returns.

use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;

pub const STATUS_OK: u16 = 200;
pub const STATUS_BAD_REQUEST: u16 = 400;
pub const STATUS_NOT_FOUND: u16 = 404;
pub const STATUS_SERVICE_UNAVAILABLE: u16 = 503;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Other(String),
}

impl HttpMethod {
    pub fn parse(method: &str) -> Self {
        match method.to_ascii_uppercase().as_str() {
            "GET" => HttpMethod::Get,
            "POST" => HttpMethod::Post,
            other => HttpMethod::Other(other.to_string()),
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HttpMethod::Get => f.write_str("GET"),
            HttpMethod::Post => f.write_str("POST"),
            HttpMethod::Other(method) => f.write_str(method),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub content_type: Option<String>,
    pub body: String,
    pub query: HashMap<String, String>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod) -> Self {
        Self {
            method,
            content_type: None,
            body: String::new(),
            query: HashMap::new(),
        }
    }

    pub fn get() -> Self {
        Self::new(HttpMethod::Get)
    }

    pub fn post(content_type: Option<&str>, body: impl Into<String>) -> Self {
        Self {
            content_type: content_type.map(str::to_string),
            body: body.into(),
            ..Self::new(HttpMethod::Post)
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query.get(key).map(String::as_str)
    }

    /// Frame text carried by a POST.
    ///
    /// Form-encoded bodies carry it in the `data` field; anything else is
    /// taken as raw text. Returns `None` for an empty or undecodable body.
    pub fn frame_text(&self) -> Option<String> {
        let is_form = self
            .content_type
            .as_deref()
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with(FORM_CONTENT_TYPE));

        let text = if is_form {
            form_field(&self.body, "data")?
        } else {
            self.body.clone()
        };
        (!text.is_empty()).then_some(text)
    }
}

/// What an adapter hands back to the host
#[derive(Debug)]
pub enum ResponseBody {
    Empty,
    Full(String),
    /// Chunks to write as they arrive; the response ends when the sender drops
    Stream(mpsc::UnboundedReceiver<String>),
}

#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: Option<&'static str>,
    pub body: ResponseBody,
}

impl HttpResponse {
    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: None,
            body: ResponseBody::Empty,
        }
    }

    pub fn ok(content_type: &'static str, body: String) -> Self {
        Self {
            status: STATUS_OK,
            content_type: Some(content_type),
            body: ResponseBody::Full(body),
        }
    }

    /// 200 with no body, used to acknowledge a POST
    pub fn ok_empty() -> Self {
        Self::status(STATUS_OK)
    }

    pub fn stream(content_type: &'static str, chunks: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            status: STATUS_OK,
            content_type: Some(content_type),
            body: ResponseBody::Stream(chunks),
        }
    }

    pub fn bad_request() -> Self {
        Self::status(STATUS_BAD_REQUEST)
    }

    pub fn not_found() -> Self {
        Self::status(STATUS_NOT_FOUND)
    }

    pub fn service_unavailable() -> Self {
        Self::status(STATUS_SERVICE_UNAVAILABLE)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body text of a fully buffered response
    pub fn body_text(&self) -> Option<&str> {
        match &self.body {
            ResponseBody::Full(body) => Some(body),
            _ => None,
        }
    }
}

/// Value of `name` in an `application/x-www-form-urlencoded` body
pub fn form_field(body: &str, name: &str) -> Option<String> {
    body.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=').unwrap_or((pair, ""));
        if percent_decode(key)? == name {
            percent_decode(value)
        } else {
            None
        }
    })
}

/// Decode `%XX` escapes and `+` as space. `None` on a bad escape or
/// non-UTF-8 result.
pub fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            b'%' => {
                let hex = bytes.get(i + 1..i + 3)?;
                let hex = std::str::from_utf8(hex).ok()?;
                decoded.push(u8::from_str_radix(hex, 16).ok()?);
                i += 3;
            }
            b => {
                decoded.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8(decoded).ok()
}

//! Outgoing response state and the [`Body`] it carries.
//!
//! [`ResponseView`] is plain mutable state: status, headers, body. Nothing is
//! written until the responder finalizes the request.

use std::borrow::Cow;
use std::fmt;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Value, json};
use tracing::warn;

use crate::request::headers_to_json;
use crate::status;

// ── ContentType ───────────────────────────────────────────────────────────────

/// Common content-type values for [`ResponseView::set_type`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ContentType {
    Html,         // text/html; charset=utf-8
    Json,         // application/json; charset=utf-8
    OctetStream,  // application/octet-stream
    Text,         // text/plain; charset=utf-8
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Html        => "text/html; charset=utf-8",
            Self::Json        => "application/json; charset=utf-8",
            Self::OctetStream => "application/octet-stream",
            Self::Text        => "text/plain; charset=utf-8",
        }
    }
}

// ── Body ──────────────────────────────────────────────────────────────────────

/// A boxed byte stream used as a streaming response body.
pub type BodyStream = Pin<Box<dyn Stream<Item = std::io::Result<Bytes>> + Send + 'static>>;

/// What the responder will send.
pub enum Body {
    Empty,
    Text(String),
    Bytes(Bytes),
    Stream(BodyStream),
    /// Any JSON-serializable value, including structured error objects.
    Json(Value),
}

impl Body {
    pub fn stream<S>(stream: S) -> Self
    where
        S: Stream<Item = std::io::Result<Bytes>> + Send + 'static,
    {
        Self::Stream(Box::pin(stream))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl Default for Body {
    fn default() -> Self { Self::Empty }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty    => f.write_str("Empty"),
            Self::Text(s)  => f.debug_tuple("Text").field(s).finish(),
            Self::Bytes(b) => f.debug_tuple("Bytes").field(b).finish(),
            Self::Stream(_) => f.write_str("Stream(..)"),
            Self::Json(v)  => f.debug_tuple("Json").field(v).finish(),
        }
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self { Self::Text(s.to_owned()) }
}

impl From<String> for Body {
    fn from(s: String) -> Self { Self::Text(s) }
}

impl From<Bytes> for Body {
    fn from(b: Bytes) -> Self { Self::Bytes(b) }
}

impl From<Vec<u8>> for Body {
    fn from(b: Vec<u8>) -> Self { Self::Bytes(b.into()) }
}

impl From<Value> for Body {
    fn from(v: Value) -> Self { Self::Json(v) }
}

// ── ResponseView ──────────────────────────────────────────────────────────────

/// The response being built for one request.
#[derive(Debug)]
pub struct ResponseView {
    status: u16,
    explicit_status: bool,
    message: Option<String>,
    headers: HeaderMap,
    body: Body,
}

impl ResponseView {
    /// A fresh response. `status` is a default, not an explicit choice: the
    /// first body assignment may still replace it.
    pub fn new(status: u16) -> Self {
        Self {
            status,
            explicit_status: false,
            message: None,
            headers: HeaderMap::new(),
            body: Body::Empty,
        }
    }

    pub fn status(&self) -> u16 { self.status }

    pub fn set_status(&mut self, status: u16) {
        self.status = status;
        self.explicit_status = true;
    }

    /// Explicit status message, else the reason phrase, else the bare code.
    pub fn message(&self) -> Cow<'_, str> {
        match (&self.message, status::reason(self.status)) {
            (Some(msg), _)    => Cow::Borrowed(msg),
            (None, Some(msg)) => Cow::Borrowed(msg),
            (None, None)      => Cow::Owned(self.status.to_string()),
        }
    }

    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = Some(message.into());
    }

    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Sets a header from strings. Invalid names or values are dropped with a
    /// warning.
    pub fn set(&mut self, name: &str, value: &str) {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.insert(name, value);
            }
            _ => warn!(header = name, "ignoring invalid response header"),
        }
    }

    pub fn remove(&mut self, name: HeaderName) {
        self.headers.remove(name);
    }

    /// Keeps only the headers whose lowercase name satisfies `keep`.
    pub fn retain_headers(&mut self, keep: impl Fn(&str) -> bool) {
        let names: Vec<HeaderName> = self
            .headers
            .keys()
            .filter(|name| !keep(name.as_str()))
            .cloned()
            .collect();
        for name in names {
            self.headers.remove(name);
        }
    }

    pub fn set_type(&mut self, content_type: ContentType) {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header(CONTENT_TYPE.as_str())
    }

    pub fn length(&self) -> Option<u64> {
        self.header(CONTENT_LENGTH.as_str()).and_then(|v| v.parse().ok())
    }

    pub fn set_length(&mut self, len: usize) {
        self.headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    }

    pub fn body(&self) -> &Body { &self.body }

    pub(crate) fn take_body(&mut self) -> Body {
        std::mem::take(&mut self.body)
    }

    /// Assigns the body and derives the status and entity headers from it.
    ///
    /// Without an explicit status, a body switches it to 200 and an empty
    /// body to 204. JSON bodies always set a JSON content-type; other kinds
    /// only fill one in when none is set.
    pub fn set_body(&mut self, body: impl Into<Body>) {
        let body = body.into();
        let empty = body.is_empty();
        if !self.explicit_status {
            self.status = if empty { 204 } else { 200 };
        }

        match &body {
            Body::Empty => {
                self.strip_entity_headers();
            }
            Body::Text(s) => {
                if self.content_type().is_none() {
                    let html = s.trim_start().starts_with('<');
                    self.set_type(if html { ContentType::Html } else { ContentType::Text });
                }
                self.set_length(s.len());
            }
            Body::Bytes(b) => {
                self.default_type(ContentType::OctetStream);
                self.set_length(b.len());
            }
            Body::Stream(_) => {
                self.default_type(ContentType::OctetStream);
                self.headers.remove(CONTENT_LENGTH);
            }
            Body::Json(_) => {
                self.set_type(ContentType::Json);
                self.headers.remove(CONTENT_LENGTH);
            }
        }
        self.body = body;
    }

    pub(crate) fn strip_entity_headers(&mut self) {
        self.headers.remove(CONTENT_TYPE);
        self.headers.remove(CONTENT_LENGTH);
        self.headers.remove(TRANSFER_ENCODING);
    }

    fn default_type(&mut self, content_type: ContentType) {
        if self.content_type().is_none() {
            self.set_type(content_type);
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "status": self.status,
            "message": self.message(),
            "header": headers_to_json(&self.headers),
        })
    }
}

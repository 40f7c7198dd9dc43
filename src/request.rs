//! Incoming HTTP request view.

use std::net::SocketAddr;

use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, Method, Uri, Version};
use serde_json::{Map, Value, json};

/// An incoming HTTP request with its body already read.
#[derive(Debug)]
pub struct RequestView {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    original_url: String,
    remote_addr: Option<SocketAddr>,
}

impl RequestView {
    /// A bodiless request, mostly useful for tests and embedding.
    pub fn new(method: Method, uri: Uri) -> Self {
        let original_url = uri.to_string();
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            original_url,
            remote_addr: None,
        }
    }

    pub(crate) fn from_parts(
        parts: http::request::Parts,
        body: Bytes,
        remote_addr: Option<SocketAddr>,
    ) -> Self {
        let original_url = parts.uri.to_string();
        Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            original_url,
            remote_addr,
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.append(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn version(&self) -> Version { self.version }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn remote_addr(&self) -> Option<SocketAddr> { self.remote_addr }

    /// The URL as received, before any middleware rewrote the URI.
    pub fn original_url(&self) -> &str { &self.original_url }

    /// Replaces the URI. `original_url` is kept.
    pub fn set_uri(&mut self, uri: Uri) {
        self.uri = uri;
    }

    /// Header lookup. Values that are not visible ASCII are skipped.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_head(&self) -> bool {
        self.method == Method::HEAD
    }

    pub fn to_json(&self) -> Value {
        json!({
            "method": self.method.as_str(),
            "url": self.uri.to_string(),
            "header": headers_to_json(&self.headers),
        })
    }
}

pub(crate) fn headers_to_json(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.insert(name.as_str().to_owned(), Value::from(value));
        }
    }
    Value::Object(map)
}

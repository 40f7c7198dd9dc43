//! Error types and the process-level error reporter.
//!
//! Three kinds of failure live here:
//!
//! - [`Error`]: infrastructure failures of the crate itself (binding a port,
//!   reading a request body) and registration misuse.
//! - [`HttpError`]: a proper error object raised by a middleware step. It may
//!   carry a status, an `expose` flag, and an I/O-style code.
//! - [`Failure`]: whatever a step fails with. Either an [`HttpError`] or an
//!   arbitrary JSON value (a structured application error such as
//!   `{"status": 400, "message": "bad input"}`).

use std::any::Any;
use std::fmt;

use serde_json::Value;
use tracing::error;

use crate::status;

/// The error type returned by ferrule's fallible operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("hyper: {0}")]
    Hyper(#[from] hyper::Error),

    /// An operation was attempted in a lifecycle stage that forbids it.
    #[error("invalid state: {0}")]
    InvalidState(&'static str),

    /// The engine wrote nothing for this exchange.
    #[error("response suppressed")]
    Suppressed,
}

// ── HttpError ─────────────────────────────────────────────────────────────────

/// An error object raised by a middleware step or hook.
///
/// `expose` decides whether the message may reach the client. Without it the
/// client only sees the reason phrase of the resolved status.
///
/// ```rust
/// use ferrule::HttpError;
///
/// let err = HttpError::new(400, "bad input");
/// assert_eq!(err.status(), Some(400));
/// assert!(err.expose());
///
/// let err = HttpError::internal("db pool exhausted");
/// assert_eq!(err.status(), None);
/// assert!(!err.expose());
/// ```
#[derive(Debug)]
pub struct HttpError {
    status: Option<u16>,
    message: String,
    expose: bool,
    code: Option<String>,
    headers_sent: bool,
    context: Option<Value>,
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl HttpError {
    /// Error with an explicit status. Client errors (< 500) are exposed.
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status: Some(status),
            expose: status < 500,
            ..Self::internal(message)
        }
    }

    /// Error with an explicit status and its reason phrase as message.
    pub fn status_only(status: u16) -> Self {
        let message = status::reason(status).map_or_else(|| status.to_string(), str::to_owned);
        Self::new(status, message)
    }

    /// A genuine fault without HTTP semantics. Never exposed.
    pub fn internal(message: impl Into<String>) -> Self {
        Self {
            status: None,
            message: message.into(),
            expose: false,
            code: None,
            headers_sent: false,
            context: None,
            source: None,
        }
    }

    /// Wraps any error as a fault, keeping it as the source.
    pub fn from_error<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            source: Some(Box::new(err)),
            ..Self::internal(String::new())
        }
        .with_source_message()
    }

    pub fn with_expose(mut self, expose: bool) -> Self {
        self.expose = expose;
        self
    }

    /// Sets an I/O-style code such as `ENOENT`.
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn status(&self) -> Option<u16> { self.status }
    pub fn message(&self) -> &str { &self.message }
    pub fn expose(&self) -> bool { self.expose }
    pub fn code(&self) -> Option<&str> { self.code.as_deref() }

    /// Whether headers had already been handed to the transport when this
    /// error arrived. Only set for errors that could not be rendered.
    pub fn headers_sent(&self) -> bool { self.headers_sent }

    /// Snapshot of the request context, attached when the error could not be
    /// rendered because the response had already settled.
    pub fn context(&self) -> Option<&Value> { self.context.as_ref() }

    pub(crate) fn attach(&mut self, headers_sent: bool, context: Value) {
        self.headers_sent = headers_sent;
        self.context = Some(context);
    }

    fn with_source_message(mut self) -> Self {
        if let Some(source) = &self.source {
            self.message = source.to_string();
        }
        self
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{status}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_deref().map(|e| e as &(dyn std::error::Error + 'static))
    }
}

impl From<std::io::Error> for HttpError {
    fn from(e: std::io::Error) -> Self {
        let not_found = e.kind() == std::io::ErrorKind::NotFound;
        let err = Self::from_error(e);
        if not_found { err.with_code("ENOENT") } else { err }
    }
}

// ── Failure ───────────────────────────────────────────────────────────────────

/// The value a middleware step or hook fails with.
#[derive(Debug)]
pub enum Failure {
    /// A proper error object.
    Error(HttpError),
    /// A non-error value. With a numeric `status` field it is rendered as a
    /// structured JSON error body.
    Value(Value),
}

impl Failure {
    /// Converts into an error object, wrapping non-error values.
    pub fn into_error(self) -> HttpError {
        match self {
            Self::Error(err) => err,
            Self::Value(value) => HttpError::internal(format!("non-error thrown: {value}")),
        }
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_owned());
        Self::Error(HttpError::internal(format!("step panicked: {msg}")))
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error(err) => fmt::Display::fmt(err, f),
            Self::Value(value) => write!(f, "non-error thrown: {value}"),
        }
    }
}

impl From<HttpError> for Failure {
    fn from(e: HttpError) -> Self { Self::Error(e) }
}

impl From<std::io::Error> for Failure {
    fn from(e: std::io::Error) -> Self { Self::Error(e.into()) }
}

impl From<serde_json::Error> for Failure {
    fn from(e: serde_json::Error) -> Self { Self::Error(HttpError::from_error(e)) }
}

impl From<Value> for Failure {
    fn from(v: Value) -> Self { Self::Value(v) }
}

impl From<Error> for Failure {
    fn from(e: Error) -> Self { Self::Error(HttpError::from_error(e)) }
}

// ── Process-level reporter ────────────────────────────────────────────────────

/// Last-resort sink for errors that could not be rendered in-band.
///
/// Exposed errors and client errors are expected traffic and are skipped.
/// Never panics and never blocks beyond the subscriber's own cost.
pub(crate) fn report(err: &HttpError) {
    if err.expose || err.status.is_some_and(|s| s < 500) {
        return;
    }
    let chain = source_chain(err);
    error!(
        status = ?err.status,
        code = ?err.code,
        headers_sent = err.headers_sent,
        context = ?err.context,
        sources = %chain,
        "unhandled error: {err}"
    );
}

fn source_chain(err: &HttpError) -> String {
    let mut out = String::new();
    let mut next = std::error::Error::source(err);
    while let Some(source) = next {
        if !out.is_empty() {
            out.push_str(" <- ");
        }
        out.push_str(&source.to_string());
        next = source.source();
    }
    out
}

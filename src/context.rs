//! Per-request state: request and response views, lifecycle flags, the
//! after-hook queue and the terminal-signal listeners.
//!
//! # Lifecycle
//!
//! Two flags settle independently and never reverse:
//!
//! | Flag | Settles when | Values |
//! |---|---|---|
//! | `ended` | the responder has handed the response (or its suppression) to the transport | `false → true` |
//! | `finished` | the transport reports the outcome | `unset → true` (sent) or `unset → false` (connection lost) |
//!
//! `closed()` is shorthand for `finished == false`.

use std::fmt;
use std::sync::Arc;

use http::{Extensions, Method, StatusCode};
use serde_json::{Value, json};
use tracing::trace;

use crate::config::Config;
use crate::error::{Error, Failure, report};
use crate::middleware::{self, Middleware};
use crate::pipeline;
use crate::request::RequestView;
use crate::response::{Body, ResponseView};

/// A queued after-hook.
pub(crate) type Hook = Box<dyn Middleware>;

type Listener = Box<dyn FnOnce(&RequestContext) + Send + 'static>;

#[derive(Default)]
struct Listeners {
    finish: Vec<Listener>,
    close: Vec<Listener>,
    end: Vec<Listener>,
}

#[derive(Clone, Copy)]
enum Signal {
    Finish,
    Close,
    End,
}

/// Everything one request's middleware can see and change.
pub struct RequestContext {
    pub request: RequestView,
    pub response: ResponseView,
    /// Typed per-request data shared between middleware.
    pub state: Extensions,
    /// Set to `false` to take over the exchange: the responder then writes
    /// nothing, but the context still ends.
    pub respond: bool,
    config: Arc<Config>,
    ended: bool,
    finished: Option<bool>,
    headers_sent: bool,
    after_hooks: Vec<Hook>,
    pending_error: Option<Failure>,
    listeners: Listeners,
}

impl RequestContext {
    /// Creates the context for a freshly arrived request.
    ///
    /// The status starts at 421 (Misdirected Request): a request no
    /// middleware claims was sent to a server that cannot produce a response
    /// for it.
    pub fn new(request: RequestView, config: Arc<Config>) -> Self {
        Self {
            request,
            response: ResponseView::new(StatusCode::MISDIRECTED_REQUEST.as_u16()),
            state: Extensions::new(),
            respond: true,
            config,
            ended: false,
            finished: None,
            headers_sent: false,
            after_hooks: vec![Box::new(middleware::yield_now) as Hook],
            pending_error: None,
            listeners: Listeners::default(),
        }
    }

    pub fn config(&self) -> &Config { &self.config }

    // ── Delegates ─────────────────────────────────────────────────────────────

    pub fn method(&self) -> &Method { self.request.method() }
    pub fn status(&self) -> u16 { self.response.status() }
    pub fn set_status(&mut self, status: u16) { self.response.set_status(status) }
    pub fn body(&self) -> &Body { self.response.body() }
    pub fn set_body(&mut self, body: impl Into<Body>) { self.response.set_body(body) }
    pub fn set(&mut self, name: &str, value: &str) { self.response.set(name, value) }

    // ── Lifecycle flags ───────────────────────────────────────────────────────

    /// The response has been handed to the transport, or suppressed.
    pub fn ended(&self) -> bool { self.ended }

    /// The transport reported a complete response.
    pub fn finished(&self) -> bool { self.finished == Some(true) }

    /// The transport reported the connection gone before completion.
    pub fn closed(&self) -> bool { self.finished == Some(false) }

    /// Whether the transport has reported either outcome.
    pub fn is_settled(&self) -> bool { self.finished.is_some() }

    /// Whether status and headers have been handed to the transport.
    pub fn headers_sent(&self) -> bool { self.headers_sent }

    // ── After-hooks ───────────────────────────────────────────────────────────

    /// Queues `hook` to run once the middleware chain settles. Hooks run last
    /// registered, first executed.
    ///
    /// Fails with [`Error::InvalidState`] once the queue has been drained,
    /// i.e. when called from a hook or after the chain completed.
    pub fn after(&mut self, hook: impl Middleware) -> Result<usize, Error> {
        if self.after_hooks.is_empty() {
            return Err(Error::InvalidState("can't add hook after middleware process"));
        }
        self.after_hooks.push(Box::new(hook));
        Ok(self.after_hooks.len())
    }

    /// Takes every queued hook in execution (LIFO) order. A second call
    /// returns nothing.
    pub(crate) fn drain_hooks(&mut self) -> Vec<Hook> {
        let mut hooks = std::mem::take(&mut self.after_hooks);
        hooks.reverse();
        hooks
    }

    // ── Errors ────────────────────────────────────────────────────────────────

    /// Delivers an error in-band.
    ///
    /// While the request is still being processed, the error is handed to the
    /// request's recovery point once the current step returns: the remaining
    /// middleware are skipped, the error transform and the error pipeline run,
    /// and the response is finalized from their result. Only the first
    /// pending error is kept.
    ///
    /// Once the response has ended there is nothing left to render, so the
    /// error goes straight to the process-level reporter with diagnostics
    /// attached.
    pub fn on_error(&mut self, failure: impl Into<Failure>) {
        let failure = failure.into();
        if self.ended || self.is_settled() || self.headers_sent {
            self.render_error(failure);
        } else if self.pending_error.is_none() {
            self.pending_error = Some(failure);
        } else {
            report(&failure.into_error());
        }
    }

    /// Takes the error delivered through [`on_error`](Self::on_error) since
    /// the last call.
    pub(crate) fn take_error(&mut self) -> Option<Failure> {
        self.pending_error.take()
    }

    /// Renders `failure` into the response, or reports it when it cannot be.
    pub(crate) fn render_error(&mut self, failure: Failure) {
        if let Some(err) = pipeline::render(self, failure) {
            report(&err);
        }
    }

    // ── Terminal signals ──────────────────────────────────────────────────────

    /// Runs `f` once the transport reports a complete response.
    pub fn on_finish(&mut self, f: impl FnOnce(&RequestContext) + Send + 'static) {
        self.listen(Signal::Finish, Box::new(f));
    }

    /// Runs `f` once the transport reports the connection lost.
    pub fn on_close(&mut self, f: impl FnOnce(&RequestContext) + Send + 'static) {
        self.listen(Signal::Close, Box::new(f));
    }

    /// Runs `f` once the response has been finalized.
    pub fn on_end(&mut self, f: impl FnOnce(&RequestContext) + Send + 'static) {
        self.listen(Signal::End, Box::new(f));
    }

    fn listen(&mut self, signal: Signal, f: Listener) {
        let fired = match signal {
            Signal::Finish => self.finished == Some(true),
            Signal::Close  => self.finished == Some(false),
            Signal::End    => self.ended,
        };
        if fired {
            f(self);
        } else {
            self.listeners(signal).push(f);
        }
    }

    fn listeners(&mut self, signal: Signal) -> &mut Vec<Listener> {
        match signal {
            Signal::Finish => &mut self.listeners.finish,
            Signal::Close  => &mut self.listeners.close,
            Signal::End    => &mut self.listeners.end,
        }
    }

    fn emit(&mut self, signal: Signal) {
        for f in std::mem::take(self.listeners(signal)) {
            f(self);
        }
    }

    pub(crate) fn mark_headers_sent(&mut self) {
        self.headers_sent = true;
    }

    /// Marks the response finalized. Emits `end` the first time only.
    pub(crate) fn mark_ended(&mut self) {
        if !self.ended {
            self.ended = true;
            trace!(status = self.status(), "context ended");
            self.emit(Signal::End);
        }
    }

    /// Records the transport outcome. Returns `false` if it was already
    /// recorded, in which case nothing is emitted.
    pub(crate) fn settle(&mut self, finished: bool) -> bool {
        if self.finished.is_some() {
            return false;
        }
        self.finished = Some(finished);
        // Listeners of the other outcome can never fire.
        if finished {
            self.listeners.close.clear();
            self.emit(Signal::Finish);
        } else {
            self.listeners.finish.clear();
            self.emit(Signal::Close);
        }
        true
    }

    pub fn to_json(&self) -> Value {
        json!({
            "request": self.request.to_json(),
            "response": self.response.to_json(),
            "originalUrl": self.request.original_url(),
        })
    }
}

impl fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request", &self.request)
            .field("response", &self.response)
            .field("respond", &self.respond)
            .field("ended", &self.ended)
            .field("finished", &self.finished)
            .field("after_hooks", &self.after_hooks.len())
            .field("pending_error", &self.pending_error)
            .finish_non_exhaustive()
    }
}

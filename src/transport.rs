//! The boundary between the engine and whatever moves bytes.
//!
//! [`channel`] creates the two ends of one exchange:
//!
//! - [`Transport`] stays with the engine. It delivers the response at most
//!   once and reports how the exchange ended.
//! - [`Connection`] stays with the server (or a test). Dropping it before a
//!   response arrived means the client went away, and cancels the engine.
//!
//! The response body is wrapped in [`ResponseBody`], which reports *finished*
//! once the body has been fully read and *closed* if it is dropped early.
//! Exactly one of the two is ever reported. Empty bodies (204, 304, `HEAD`)
//! are no exception: they must be polled once to count as delivered.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use bytes::Bytes;
use http::Response;
use http_body::{Body, Frame, SizeHint};
use http_body_util::combinators::UnsyncBoxBody;
use tokio::sync::oneshot;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::trace;

use crate::context::RequestContext;

pub(crate) type BoxBody = UnsyncBoxBody<Bytes, io::Error>;

#[derive(Clone, Copy, Debug)]
enum Outcome {
    Finished,
    Closed,
}

/// Creates both ends of one exchange.
pub fn channel() -> (Transport, Connection) {
    let stop = CancellationToken::new();
    let (reply_tx, reply_rx) = oneshot::channel();
    let (outcome_tx, outcome_rx) = oneshot::channel();
    let transport = Transport {
        stop: stop.clone(),
        reply: Some(reply_tx),
        outcome_tx: Some(outcome_tx),
        outcome_rx,
    };
    let connection = Connection {
        reply: reply_rx,
        guard: Some(stop.drop_guard()),
    };
    (transport, connection)
}

// ── Engine side ───────────────────────────────────────────────────────────────

/// The engine's end of an exchange.
pub struct Transport {
    stop: CancellationToken,
    reply: Option<oneshot::Sender<Response<ResponseBody>>>,
    outcome_tx: Option<oneshot::Sender<Outcome>>,
    outcome_rx: oneshot::Receiver<Outcome>,
}

impl Transport {
    /// Cancelled when the peer goes away before a response was delivered.
    pub(crate) fn stop_signal(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub(crate) fn headers_sent(&self) -> bool {
        self.reply.is_none()
    }

    /// Hands the response over. Only the first call does anything.
    pub(crate) fn send(&mut self, response: Response<BoxBody>) {
        let Some(reply) = self.reply.take() else { return };
        let response = response.map(|inner| ResponseBody {
            inner,
            outcome: self.outcome_tx.take(),
        });
        // A refused response drops its body, which reports `Closed`.
        let _ = reply.send(response);
    }

    /// Waits for the transport outcome and records it on the context.
    pub(crate) async fn settle(mut self, ctx: &mut RequestContext) {
        let finished = if self.reply.is_some() {
            // Nothing was written, so the exchange cannot complete normally.
            false
        } else {
            tokio::select! {
                biased;
                outcome = &mut self.outcome_rx => matches!(outcome, Ok(Outcome::Finished)),
                () = self.stop.cancelled() => false,
            }
        };
        trace!(finished, "transport settled");
        ctx.settle(finished);
    }
}

// ── Server side ───────────────────────────────────────────────────────────────

/// The server's end of an exchange.
pub struct Connection {
    reply: oneshot::Receiver<Response<ResponseBody>>,
    guard: Option<DropGuard>,
}

impl Connection {
    /// Waits for the engine's response. `None` means the engine wrote
    /// nothing and the exchange should be aborted.
    ///
    /// Dropping this future before it resolves cancels the request.
    pub async fn response(mut self) -> Option<Response<ResponseBody>> {
        let response = (&mut self.reply).await.ok();
        if response.is_some() {
            if let Some(guard) = self.guard.take() {
                let _ = guard.disarm();
            }
        }
        response
    }

    /// Signals that the client went away.
    pub fn abort(self) {}
}

// ── ResponseBody ──────────────────────────────────────────────────────────────

/// Response body handed to the transport. Reports the exchange outcome back
/// to the engine.
pub struct ResponseBody {
    inner: BoxBody,
    outcome: Option<oneshot::Sender<Outcome>>,
}

impl ResponseBody {
    fn report(&mut self, outcome: Outcome) {
        if let Some(tx) = self.outcome.take() {
            let _ = tx.send(outcome);
        }
    }
}

impl Body for ResponseBody {
    type Data = Bytes;
    type Error = io::Error;

    fn poll_frame(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, io::Error>>> {
        let this = self.get_mut();
        let frame = ready!(Pin::new(&mut this.inner).poll_frame(cx));
        match &frame {
            None => this.report(Outcome::Finished),
            Some(Err(_)) => this.report(Outcome::Closed),
            Some(Ok(_)) if this.inner.is_end_stream() => this.report(Outcome::Finished),
            Some(Ok(_)) => {}
        }
        Poll::Ready(frame)
    }

    /// Stays `false` until the outcome is reported, so that even an empty
    /// body is polled once. A body dropped unpolled was never delivered.
    fn is_end_stream(&self) -> bool {
        self.outcome.is_none() && self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        // Reaching the end reports `Finished` while polling, so anything
        // still unreported here was cut short.
        self.report(Outcome::Closed);
    }
}

impl std::fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseBody").finish_non_exhaustive()
    }
}

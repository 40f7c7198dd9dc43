//! The per-request runner.
//!
//! A [`Scope`] drives one request through its chain: middleware in
//! registration order, then the after-hooks in reverse registration order,
//! one step at a time. Whatever happens on the way, the request ends with a
//! single pass through the responder.
//!
//! ```text
//! Pending → Running(i) → Succeeded ─┐
//!                      → Failed ────┼→ HooksDraining → Settled
//!                      → Cancelled ─┘
//! ```
//!
//! - A failing step skips the remaining middleware, and so does a step that
//!   delivers an error through `RequestContext::on_error`. The failure goes
//!   through the error transform and the error pipeline, then the hooks still
//!   run.
//! - A transport abort stops the scope at the current suspension point. The
//!   in-flight step is never polled again, the context is marked closed and
//!   writing is suppressed, then the hooks still run.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::context::RequestContext;
use crate::error::{Failure, HttpError, report};
use crate::middleware::{Middleware, StepResult};
use crate::responder::{self, Interrupted};
use crate::transport::Transport;

/// What a user-supplied error transform decides.
#[derive(Debug)]
pub enum Recovery {
    /// Swallow the error and respond with the status and body already set.
    Respond,
    /// Render this failure instead of the original one.
    Replace(Failure),
    /// Render the original failure.
    Pass,
}

/// User-supplied hook run on every failure before it is rendered. An `Err`
/// return replaces the failure, like [`Recovery::Replace`].
pub type ErrorTransform =
    Arc<dyn Fn(&mut RequestContext, &Failure) -> Result<Recovery, Failure> + Send + Sync>;

/// The ordered middleware of one application, frozen at dispatch time.
pub(crate) type Chain = Arc<[Box<dyn Middleware>]>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ScopeState {
    Pending,
    Running(usize),
    Succeeded,
    Failed,
    Cancelled,
    HooksDraining,
    Settled,
}

pub(crate) struct Scope {
    chain: Chain,
    transform: Option<ErrorTransform>,
    stop: CancellationToken,
    state: ScopeState,
}

impl Scope {
    pub(crate) fn new(chain: Chain, transform: Option<ErrorTransform>, stop: CancellationToken) -> Self {
        Self { chain, transform, stop, state: ScopeState::Pending }
    }

    pub(crate) fn state(&self) -> ScopeState {
        self.state
    }

    /// Runs the request to completion and waits for the transport outcome.
    pub(crate) async fn run(&mut self, ctx: &mut RequestContext, mut transport: Transport) {
        self.run_middleware(ctx).await;
        self.drain_hooks(ctx).await;
        self.finalize(ctx, &mut transport).await;
        self.transition(ScopeState::Settled);
        transport.settle(ctx).await;
    }

    async fn run_middleware(&mut self, ctx: &mut RequestContext) {
        let chain = Arc::clone(&self.chain);
        for (index, step) in chain.iter().enumerate() {
            self.transition(ScopeState::Running(index));
            debug!(index, step = step.name(), "running middleware");
            match self.step(step.as_ref(), ctx, true).await {
                Some(Ok(())) => {}
                Some(Err(failure)) => {
                    self.transition(ScopeState::Failed);
                    self.recover(ctx, failure);
                    return;
                }
                None => {
                    self.cancel(ctx);
                    return;
                }
            }
        }
        self.transition(ScopeState::Succeeded);
    }

    /// Runs every queued hook, LIFO. Hooks after a cancellation run without
    /// interruption: they are the request's last chance to clean up.
    async fn drain_hooks(&mut self, ctx: &mut RequestContext) {
        let settled = self.state;
        self.transition(ScopeState::HooksDraining);
        let hooks = ctx.drain_hooks();
        debug!(count = hooks.len(), after = ?settled, "draining after-hooks");

        for hook in &hooks {
            let cancellable = !self.stop.is_cancelled();
            match self.step(hook.as_ref(), ctx, cancellable).await {
                Some(Ok(())) => {}
                Some(Err(failure)) => self.recover(ctx, failure),
                None => self.cancel(ctx),
            }
        }
    }

    /// Runs one step. `None` means the scope was cancelled first.
    ///
    /// An error delivered through [`RequestContext::on_error`] while the step
    /// ran counts as the step's failure. It was raised first, so it wins over
    /// an error the step returns afterwards.
    async fn step(
        &self,
        step: &dyn Middleware,
        ctx: &mut RequestContext,
        cancellable: bool,
    ) -> Option<StepResult> {
        // `call` itself may panic before returning its future.
        let run = AssertUnwindSafe(async { step.call(ctx).await }).catch_unwind();
        let outcome = if cancellable {
            tokio::select! {
                biased;
                () = self.stop.cancelled() => None,
                outcome = run => Some(outcome),
            }
        } else {
            Some(run.await)
        };

        let delivered = ctx.take_error();
        let Some(outcome) = outcome else {
            if let Some(failure) = delivered {
                report(&failure.into_error());
            }
            return None;
        };
        let result = outcome.unwrap_or_else(|panic| Err(Failure::from_panic(panic)));
        Some(match (result, delivered) {
            (result, None) => result,
            (Ok(()), Some(failure)) => Err(failure),
            (Err(thrown), Some(failure)) => {
                report(&thrown.into_error());
                Err(failure)
            }
        })
    }

    /// Stops the scope for good: the peer is gone, so nothing gets written.
    fn cancel(&mut self, ctx: &mut RequestContext) {
        if ctx.settle(false) {
            warn!(state = ?self.state, "client went away, cancelling request");
        }
        ctx.respond = false;
        if self.state != ScopeState::HooksDraining {
            self.transition(ScopeState::Cancelled);
        }
    }

    /// The single recovery point for every failure of this request.
    fn recover(&self, ctx: &mut RequestContext, failure: Failure) {
        debug!(%failure, "recovering from failure");
        let Some(transform) = &self.transform else {
            ctx.render_error(failure);
            return;
        };

        let decision = std::panic::catch_unwind(AssertUnwindSafe(|| transform(ctx, &failure)));
        if let Some(nested) = ctx.take_error() {
            report(&nested.into_error());
        }
        let failure = match decision {
            Ok(Ok(Recovery::Respond)) => return,
            Ok(Ok(Recovery::Replace(replacement))) => replacement,
            Ok(Ok(Recovery::Pass)) => failure,
            Ok(Err(thrown)) => thrown,
            Err(panic) => {
                // Double fault: log both and respond with whatever is set.
                report(&failure.into_error());
                let fault = Failure::from_panic(panic).into_error();
                report(&HttpError::internal(format!("error transform failed: {}", fault.message())));
                return;
            }
        };
        ctx.render_error(failure);
    }

    /// Hands the response to the responder. A stream that fails before its
    /// first chunk is rendered as an error and sent instead.
    async fn finalize(&mut self, ctx: &mut RequestContext, transport: &mut Transport) {
        if self.stop.is_cancelled() {
            self.cancel(ctx);
        }
        for _ in 0..2 {
            match responder::respond(ctx, transport).await {
                Ok(()) => return,
                Err(Interrupted::Failed(failure)) => self.recover(ctx, failure),
                Err(Interrupted::Cancelled) => self.cancel(ctx),
            }
        }
        // The second attempt carries a plain body and cannot be interrupted.
        ctx.mark_ended();
    }

    fn transition(&mut self, next: ScopeState) {
        debug!(from = ?self.state, to = ?next, "scope transition");
        self.state = next;
    }
}

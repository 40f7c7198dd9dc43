//! Per-request access log.
//!
//! An ordinary middleware built on the engine: it remembers when the request
//! entered the chain and registers an after-hook that logs method, path,
//! final status and latency once the chain has settled. Because hooks run on
//! every path, failed and cancelled requests are logged too.
//!
//! ```rust
//! use ferrule::{App, middleware};
//!
//! let app = App::new().use_middleware(middleware::trace());
//! ```

use std::time::Instant;

use tracing::info;

use crate::context::RequestContext;
use crate::middleware::{BoxFuture, Middleware, StepResult, from_fn};

/// Returns the access-log middleware. Register it first.
pub fn trace() -> Trace {
    Trace
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Trace;

impl Middleware for Trace {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, StepResult> {
        Box::pin(register(ctx))
    }

    fn name(&self) -> &'static str {
        "trace"
    }
}

async fn register(ctx: &mut RequestContext) -> StepResult {
    let start = Instant::now();
    let method = ctx.request.method().clone();
    let path = ctx.request.path().to_owned();

    ctx.after(from_fn(move |ctx| {
        info!(
            env = %ctx.config().env,
            method = %method,
            path = %path,
            status = ctx.status(),
            closed = ctx.closed(),
            latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "request"
        );
        Box::pin(async { Ok(()) })
    }))?;
    Ok(())
}

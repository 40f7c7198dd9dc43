//! Middleware contract and type erasure.
//!
//! A middleware is one step of a request's chain. It gets exclusive access to
//! the [`RequestContext`] while it runs and signals completion by resolving
//! its future: `Ok(())` continues with the next step, `Err(failure)` skips
//! every remaining middleware and hands the failure to the error path.
//! After-hooks use the very same shape.
//!
//! # How steps are stored
//!
//! The chain holds steps of *different* concrete types, so they are kept as
//! trait objects and each call returns a boxed future:
//!
//! ```text
//! fn auth(ctx: &mut RequestContext) -> BoxFuture<'_, StepResult> { … }  ← user writes this
//!        ↓ App::new().use_middleware(auth)
//! Box<dyn Middleware>                                                   ← stored in the chain
//!        ↓
//! step.call(&mut ctx)  at request time                                  ← one vtable dispatch
//! ```
//!
//! Closures work too, through [`from_fn`] (or [`App::use_fn`](crate::App::use_fn)),
//! which pins down the higher-ranked signature for the compiler:
//!
//! ```rust
//! use ferrule::{App, from_fn};
//!
//! let app = App::new().use_middleware(from_fn(|ctx| Box::pin(async move {
//!     ctx.set_body("hello");
//!     Ok(())
//! })));
//! ```

use std::future::Future;
use std::pin::Pin;

use crate::context::RequestContext;
use crate::error::Failure;

pub mod trace;

pub use trace::{Trace, trace};

/// A heap-allocated, type-erased future borrowing the context for `'a`.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of one step.
pub type StepResult = Result<(), Failure>;

/// One step of the chain, or one after-hook.
pub trait Middleware: Send + Sync + 'static {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, StepResult>;

    /// Name used in trace output.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

impl<F> Middleware for F
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, StepResult> + Send + Sync + 'static,
{
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, StepResult> {
        (self)(ctx)
    }
}

/// Identity function that lets closures be inferred as middleware.
pub fn from_fn<F>(f: F) -> F
where
    F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, StepResult> + Send + Sync + 'static,
{
    f
}

/// Seed hook of every context: gives other requests a turn on the scheduler
/// before the remaining hooks run.
pub(crate) fn yield_now(_ctx: &mut RequestContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async {
        tokio::task::yield_now().await;
        Ok(())
    })
}

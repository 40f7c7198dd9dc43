//! Application builder and the frozen per-request dispatcher.
//!
//! [`App`] is where middleware and the error transform are registered. It is
//! consumed by [`App::build`] (or by [`Server::serve`](crate::Server::serve)),
//! which freezes the chain into a [`Dispatcher`]: once requests flow, the
//! chain can no longer change.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::task::TaskTracker;
use tracing::{Instrument, debug, debug_span};

use crate::config::Config;
use crate::context::RequestContext;
use crate::error::Failure;
use crate::middleware::{BoxFuture, Middleware, StepResult};
use crate::request::RequestView;
use crate::scope::{Chain, ErrorTransform, Recovery, Scope};
use crate::transport::Transport;

/// The application: an ordered middleware chain plus an optional error
/// transform.
///
/// ```rust
/// use ferrule::{App, HttpError, Recovery};
///
/// let app = App::new()
///     .use_fn(|ctx| Box::pin(async move {
///         ctx.set_body("hello");
///         Ok(())
///     }))
///     .on_error(|ctx, _failure| {
///         ctx.set("x-error", "1");
///         Ok(Recovery::Pass)
///     });
/// ```
pub struct App {
    middleware: Vec<Box<dyn Middleware>>,
    transform: Option<ErrorTransform>,
    config: Config,
}

impl App {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self { middleware: Vec::new(), transform: None, config }
    }

    /// Appends a middleware. Returns `self` for chaining.
    pub fn use_middleware(mut self, middleware: impl Middleware) -> Self {
        self.middleware.push(Box::new(middleware));
        self
    }

    /// Appends a closure middleware.
    pub fn use_fn<F>(self, f: F) -> Self
    where
        F: for<'a> Fn(&'a mut RequestContext) -> BoxFuture<'a, StepResult> + Send + Sync + 'static,
    {
        self.use_middleware(f)
    }

    /// Installs the error transform, run with the context on every failure
    /// before it is rendered.
    pub fn on_error<F>(mut self, transform: F) -> Self
    where
        F: Fn(&mut RequestContext, &Failure) -> Result<Recovery, Failure> + Send + Sync + 'static,
    {
        self.transform = Some(Arc::new(transform));
        self
    }

    /// Freezes the chain.
    pub fn build(self) -> Dispatcher {
        let chain: Chain = self.middleware.into();
        Dispatcher {
            chain,
            transform: self.transform,
            config: Arc::new(self.config),
            tasks: TaskTracker::new(),
        }
    }
}

impl Default for App {
    fn default() -> Self { Self::new() }
}

/// A frozen application. Cheap to clone; one per server.
///
/// Clones share one set of spawned requests, which [`drain`](Self::drain)
/// waits for.
#[derive(Clone)]
pub struct Dispatcher {
    chain: Chain,
    transform: Option<ErrorTransform>,
    config: Arc<Config>,
    tasks: TaskTracker,
}

impl Dispatcher {
    pub fn config(&self) -> &Config { &self.config }

    /// Creates the context for a new request.
    pub fn context(&self, request: RequestView) -> RequestContext {
        RequestContext::new(request, Arc::clone(&self.config))
    }

    /// Runs one request to completion and returns its settled context.
    pub async fn run(&self, mut ctx: RequestContext, transport: Transport) -> RequestContext {
        let span = debug_span!("request", method = %ctx.method(), path = ctx.request.path());
        let mut scope = Scope::new(
            Arc::clone(&self.chain),
            self.transform.clone(),
            transport.stop_signal(),
        );
        async {
            scope.run(&mut ctx, transport).await;
            debug!(state = ?scope.state(), status = ctx.status(), "request settled");
        }
        .instrument(span)
        .await;
        ctx
    }

    /// Runs one request on its own task, detached from the caller: the scope
    /// outlives a caller that goes away, so hooks always run.
    pub fn spawn(&self, request: RequestView, transport: Transport) -> JoinHandle<RequestContext> {
        let dispatcher = self.clone();
        let ctx = self.context(request);
        self.tasks.spawn(async move { dispatcher.run(ctx, transport).await })
    }

    /// Waits for every request started with [`spawn`](Self::spawn) to settle,
    /// including the after-hooks of requests whose client already left.
    ///
    /// Requests spawned while draining are waited for too.
    pub async fn drain(&self) {
        self.tasks.close();
        debug!(in_flight = self.tasks.len(), "draining requests");
        self.tasks.wait().await;
    }
}

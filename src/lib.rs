//! # ferrule
//!
//! The per-request engine of a middleware framework on top of hyper.
//!
//! ## The contract
//!
//! Every request gets a [`RequestContext`] and runs through one ordered chain
//! of middleware. Whatever happens on the way, the client gets exactly one
//! well-formed response, or nothing at all when it already hung up:
//!
//! - **Ordered steps**: middleware run one at a time, in registration order.
//! - **After-hooks**: [`RequestContext::after`] queues cleanup that runs
//!   once the chain settles, last registered first, on every path.
//! - **One error path**: a failing step skips the rest of the chain. The
//!   failure goes through an optional transform ([`App::on_error`]), then is
//!   rendered into a safe status and body. Internal messages never leak.
//! - **Cancellation**: a client disconnect stops the chain at its current
//!   suspension point, suppresses the write, and still runs the hooks.
//! - **Respond once**: the response is handed to the transport at most once.
//!
//! What ferrule leaves to ordinary middleware: routing, templating, body
//! parsing, timeouts.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use ferrule::{App, HttpError, Server, middleware};
//!
//! #[tokio::main]
//! async fn main() {
//!     let app = App::new()
//!         .use_middleware(middleware::trace())
//!         .use_fn(|ctx| Box::pin(async move {
//!             if ctx.request.path() != "/" {
//!                 return Err(HttpError::new(404, "no such page").into());
//!             }
//!             ctx.set_body(serde_json::json!({ "hello": "world" }));
//!             Ok(())
//!         }));
//!
//!     Server::bind("0.0.0.0:3000").serve(app).await.unwrap();
//! }
//! ```

mod application;
mod config;
mod context;
mod error;
mod pipeline;
mod request;
mod responder;
mod response;
mod scope;
mod server;

pub mod middleware;
pub mod status;
pub mod transport;

pub use application::{App, Dispatcher};
pub use config::Config;
pub use context::RequestContext;
pub use error::{Error, Failure, HttpError};
pub use middleware::{BoxFuture, Middleware, StepResult, from_fn};
pub use request::RequestView;
pub use response::{Body, BodyStream, ContentType, ResponseView};
pub use scope::{ErrorTransform, Recovery};
pub use server::Server;

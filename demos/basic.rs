//! Minimal ferrule example: access log, an error transform, a JSON endpoint
//! and a cleanup hook.
//!
//! Run with:
//!   RUST_LOG=info FERRULE_ENV=staging cargo run --example basic
//!
//! Try:
//!   curl http://localhost:3000/
//!   curl http://localhost:3000/missing
//!   curl http://localhost:3000/boom

use ferrule::{App, BoxFuture, Config, HttpError, Recovery, RequestContext, Server, StepResult, from_fn, middleware};
use serde_json::json;
use tracing::info;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let app = App::with_config(Config::from_env())
        .use_middleware(middleware::trace())
        .use_middleware(cleanup)
        .use_middleware(hello)
        .on_error(|ctx, failure| {
            ctx.set("x-failed", "1");
            info!(%failure, "request failed");
            Ok(Recovery::Pass)
        });

    Server::bind("0.0.0.0:3000")
        .serve(app)
        .await
        .expect("server error");
}

/// Queues a hook that runs however the request ends.
fn cleanup(ctx: &mut RequestContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        ctx.after(from_fn(|ctx| {
            info!(status = ctx.status(), closed = ctx.closed(), "cleaning up");
            Box::pin(async { Ok(()) })
        }))?;
        Ok(())
    })
}

fn hello(ctx: &mut RequestContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        match ctx.request.path() {
            "/" => {
                ctx.set_body(json!({ "hello": "world" }));
                Ok(())
            }
            "/boom" => Err(HttpError::internal("database password is hunter2").into()),
            _ => Err(HttpError::new(404, "no such page").into()),
        }
    })
}

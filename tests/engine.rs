//! End-to-end behaviour of the request engine, driven through an in-memory
//! transport.

use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use ferrule::transport;
use ferrule::{
    App, Body, BoxFuture, Error, Failure, HttpError, Middleware, Recovery, RequestContext,
    RequestView, StepResult, from_fn,
};
use futures::stream;
use http::{HeaderMap, Method, StatusCode, Uri};
use http_body_util::BodyExt;
use serde_json::json;
use tokio::sync::Notify;

// ── Helpers ───────────────────────────────────────────────────────────────────

#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<String>>>);

impl Log {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

/// Logs its name and queues a hook that logs `after <name>`.
struct Step {
    name: &'static str,
    log: Log,
}

impl Step {
    fn new(name: &'static str, log: &Log) -> Self {
        Self { name, log: log.clone() }
    }
}

impl Middleware for Step {
    fn call<'a>(&'a self, ctx: &'a mut RequestContext) -> BoxFuture<'a, StepResult> {
        Box::pin(async move {
            self.log.push(self.name);
            let (log, name) = (self.log.clone(), self.name);
            ctx.after(from_fn(move |_ctx| {
                log.push(format!("after {name}"));
                Box::pin(async { Ok(()) })
            }))?;
            Ok(())
        })
    }
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Reply {
    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

fn get(path: &'static str) -> RequestView {
    RequestView::new(Method::GET, Uri::from_static(path))
}

/// Runs one request and reads the whole response, like a well-behaved client.
async fn exchange(app: App, request: RequestView) -> (Option<Reply>, RequestContext) {
    let dispatcher = app.build();
    let (transport, connection) = transport::channel();
    let handle = dispatcher.spawn(request, transport);

    let reply = match connection.response().await {
        Some(response) => {
            let (parts, body) = response.into_parts();
            let body = body.collect().await.unwrap().to_bytes();
            Some(Reply { status: parts.status, headers: parts.headers, body })
        }
        None => None,
    };
    (reply, handle.await.unwrap())
}

async fn send(app: App, request: RequestView) -> (Reply, RequestContext) {
    let (reply, ctx) = exchange(app, request).await;
    (reply.expect("a response"), ctx)
}

fn hello(ctx: &mut RequestContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async move {
        ctx.set_body("hello");
        Ok(())
    })
}

fn reject(_ctx: &mut RequestContext) -> BoxFuture<'_, StepResult> {
    Box::pin(async { Err(Failure::from(HttpError::new(400, "bad input"))) })
}

// ── Ordering ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn middleware_run_in_order_and_hooks_in_reverse() {
    let log = Log::default();
    let app = App::new()
        .use_middleware(Step::new("a", &log))
        .use_middleware(Step::new("b", &log))
        .use_middleware(Step::new("c", &log))
        .use_middleware(hello);

    let (reply, ctx) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "hello");
    assert_eq!(log.entries(), ["a", "b", "c", "after c", "after b", "after a"]);
    assert!(ctx.ended());
    assert!(ctx.finished());
    assert!(!ctx.closed());
}

#[tokio::test]
async fn unclaimed_request_is_misdirected() {
    let (reply, _) = send(App::new(), get("/")).await;

    assert_eq!(reply.status, StatusCode::MISDIRECTED_REQUEST);
    assert_eq!(reply.body, "Misdirected Request");
}

// ── Failures ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn failure_skips_remaining_middleware_but_runs_hooks() {
    let log = Log::default();
    let ends = Log::default();
    let on_end = ends.clone();
    let app = App::new()
        .use_fn(move |ctx| {
            let on_end = on_end.clone();
            ctx.on_end(move |_| on_end.push("end"));
            Box::pin(async { Ok(()) })
        })
        .use_middleware(Step::new("a", &log))
        .use_middleware(reject)
        .use_middleware(Step::new("c", &log));

    let (reply, ctx) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body, "bad input");
    assert_eq!(reply.header("content-type"), Some("text/plain; charset=utf-8"));
    assert_eq!(reply.header("x-content-type-options"), Some("nosniff"));
    assert_eq!(log.entries(), ["a", "after a"]);
    assert_eq!(ends.entries(), ["end"]);
    assert!(ctx.finished());
}

#[tokio::test]
async fn internal_messages_are_not_exposed() {
    let app = App::new().use_fn(|_ctx| {
        Box::pin(async { Err(HttpError::internal("db password is hunter2").into()) })
    });

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.body, "Internal Server Error");
}

#[tokio::test]
async fn error_response_drops_unrelated_headers() {
    let app = App::new().use_fn(|ctx| {
        ctx.set("x-request-id", "42");
        ctx.set("vary", "accept");
        ctx.set_body("partial");
        Box::pin(async { Err(HttpError::status_only(403).into()) })
    });

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::FORBIDDEN);
    assert_eq!(reply.body, "Forbidden");
    assert_eq!(reply.header("x-request-id"), None);
    assert_eq!(reply.header("vary"), Some("accept"));
    assert_eq!(reply.header("content-length"), Some("9"));
}

#[tokio::test]
async fn missing_file_becomes_not_found() {
    let app = App::new().use_fn(|_ctx| {
        Box::pin(async {
            let err = io::Error::new(io::ErrorKind::NotFound, "no such file");
            Err(err.into())
        })
    });

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::NOT_FOUND);
    assert_eq!(reply.body, "Not Found");
}

#[tokio::test]
async fn structured_value_becomes_json_body() {
    let app = App::new().use_fn(|_ctx| {
        Box::pin(async { Err(json!({ "status": 422, "field": "email" }).into()) })
    });

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(reply.header("content-type"), Some("application/json; charset=utf-8"));
    let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
    assert_eq!(body, json!({ "status": 422, "field": "email" }));
}

#[tokio::test]
async fn panicking_middleware_is_a_fault() {
    let log = Log::default();
    let app = App::new()
        .use_middleware(Step::new("a", &log))
        .use_fn(|_ctx| panic!("boom"));

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.body, "Internal Server Error");
    assert_eq!(log.entries(), ["a", "after a"]);
}

#[tokio::test]
async fn failing_hook_does_not_stop_other_hooks() {
    let log = Log::default();
    let app = App::new()
        .use_middleware(Step::new("a", &log))
        .use_fn(|ctx| {
            let queued = ctx.after(from_fn(|_ctx| {
                Box::pin(async { Err(HttpError::new(409, "conflict").into()) })
            }));
            Box::pin(async move {
                queued?;
                Ok(())
            })
        })
        .use_middleware(hello);

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.body, "conflict");
    assert_eq!(log.entries(), ["a", "after a"]);
}

#[tokio::test]
async fn in_band_error_skips_remaining_middleware() {
    let log = Log::default();
    let app = App::new()
        .use_middleware(Step::new("a", &log))
        .use_fn(|ctx| {
            ctx.on_error(HttpError::new(400, "bad input"));
            Box::pin(async { Ok(()) })
        })
        .use_middleware(Step::new("never", &log))
        .use_middleware(hello);

    let (reply, ctx) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body, "bad input");
    assert_eq!(log.entries(), ["a", "after a"]);
    assert!(ctx.finished());
}

#[tokio::test]
async fn in_band_error_goes_through_the_transform() {
    let seen = Log::default();
    let log = seen.clone();
    let app = App::new()
        .use_fn(|ctx| {
            ctx.on_error(HttpError::new(400, "bad input"));
            Box::pin(async { Err(HttpError::internal("returned afterwards").into()) })
        })
        .on_error(move |_ctx, failure| {
            log.push(failure.to_string());
            Ok(Recovery::Pass)
        });

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body, "bad input");
    assert_eq!(seen.entries(), ["400: bad input"]);
}

// ── Error transform ───────────────────────────────────────────────────────────

#[tokio::test]
async fn transform_can_respond_itself() {
    let app = App::new().use_middleware(reject).on_error(|ctx, _failure| {
        ctx.set_status(503);
        ctx.set_body("down for maintenance");
        Ok(Recovery::Respond)
    });

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(reply.body, "down for maintenance");
}

#[tokio::test]
async fn transform_can_replace_the_failure() {
    let app = App::new()
        .use_middleware(reject)
        .on_error(|_ctx, _failure| Ok(Recovery::Replace(HttpError::new(409, "conflict").into())));

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::CONFLICT);
    assert_eq!(reply.body, "conflict");
}

#[tokio::test]
async fn transform_pass_renders_the_original() {
    let seen = Log::default();
    let log = seen.clone();
    let app = App::new().use_middleware(reject).on_error(move |_ctx, failure| {
        log.push(failure.to_string());
        Ok(Recovery::Pass)
    });

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(reply.body, "bad input");
    assert_eq!(seen.entries(), ["400: bad input"]);
}

#[tokio::test]
async fn transform_error_replaces_the_failure() {
    let app = App::new()
        .use_middleware(reject)
        .on_error(|_ctx, _failure| Err(HttpError::new(418, "short and stout").into()));

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.status.as_u16(), 418);
    assert_eq!(reply.body, "short and stout");
}

#[tokio::test]
async fn panicking_transform_keeps_the_current_response() {
    let app = App::new()
        .use_fn(|ctx| {
            ctx.set_status(502);
            Box::pin(async { Err(HttpError::internal("upstream").into()) })
        })
        .on_error(|_ctx, _failure| panic!("transform broke"));

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::BAD_GATEWAY);
    assert_eq!(reply.body, "Bad Gateway");
}

// ── Cancellation ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn client_abort_cancels_chain_and_runs_hooks() {
    let log = Log::default();
    let entered = Arc::new(Notify::new());
    let closes = Log::default();

    let gate = Arc::clone(&entered);
    let on_close = closes.clone();
    let app = App::new()
        .use_middleware(Step::new("a", &log))
        .use_fn(move |ctx| {
            let gate = Arc::clone(&gate);
            let on_close = on_close.clone();
            ctx.on_close(move |_| on_close.push("close"));
            Box::pin(async move {
                gate.notify_one();
                std::future::pending::<()>().await;
                Ok(())
            })
        })
        .use_middleware(Step::new("never", &log));

    let dispatcher = app.build();
    let (transport, connection) = transport::channel();
    let handle = dispatcher.spawn(get("/slow"), transport);

    entered.notified().await;
    connection.abort();
    let ctx = handle.await.unwrap();

    assert_eq!(log.entries(), ["a", "after a"]);
    assert_eq!(closes.entries(), ["close"]);
    assert!(ctx.closed());
    assert!(!ctx.finished());
    assert!(ctx.ended());
    assert!(!ctx.respond);
}

#[tokio::test]
async fn dropping_the_body_early_reports_closed() {
    let app = App::new().use_fn(|ctx| {
        let chunks = vec![Ok(Bytes::from("a")), Ok(Bytes::from("b"))];
        ctx.set_body(Body::stream(stream::iter(chunks)));
        Box::pin(async { Ok(()) })
    });

    let dispatcher = app.build();
    let (transport, connection) = transport::channel();
    let handle = dispatcher.spawn(get("/"), transport);

    let response = connection.response().await.expect("a response");
    drop(response);
    let ctx = handle.await.unwrap();

    assert!(ctx.ended());
    assert!(ctx.closed());
}

#[tokio::test]
async fn drain_waits_for_hooks_of_abandoned_requests() {
    let log = Log::default();
    let entered = Arc::new(Notify::new());

    let gate = Arc::clone(&entered);
    let inner = log.clone();
    let app = App::new().use_fn(move |ctx| {
        let gate = Arc::clone(&gate);
        let inner = inner.clone();
        let queued = ctx.after(from_fn(move |_ctx| {
            let inner = inner.clone();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                inner.push("cleaned up");
                Ok(())
            })
        }));
        Box::pin(async move {
            queued?;
            gate.notify_one();
            std::future::pending::<()>().await;
            Ok(())
        })
    });

    let dispatcher = app.build();
    let (transport, connection) = transport::channel();
    drop(dispatcher.spawn(get("/slow"), transport));

    entered.notified().await;
    connection.abort();
    dispatcher.drain().await;

    assert_eq!(log.entries(), ["cleaned up"]);
}

#[tokio::test]
async fn empty_response_dropped_unread_reports_closed() {
    let app = App::new().use_fn(|ctx| {
        ctx.set_status(204);
        Box::pin(async { Ok(()) })
    });

    let dispatcher = app.build();
    let (transport, connection) = transport::channel();
    let handle = dispatcher.spawn(get("/"), transport);

    let response = connection.response().await.expect("a response");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    drop(response);
    let ctx = handle.await.unwrap();

    assert!(ctx.closed());
    assert!(!ctx.finished());
}

// ── Responder ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn empty_status_sends_no_body() {
    let app = App::new().use_fn(|ctx| {
        ctx.set_status(204);
        ctx.set_body("ignored");
        Box::pin(async { Ok(()) })
    });

    let (reply, ctx) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::NO_CONTENT);
    assert!(reply.body.is_empty());
    assert!(ctx.finished());
    assert_eq!(reply.header("content-type"), None);
    assert_eq!(reply.header("content-length"), None);
}

#[tokio::test]
async fn head_request_gets_length_without_bytes() {
    let app = App::new().use_fn(|ctx| {
        ctx.set_body(json!({ "a": 1 }));
        Box::pin(async { Ok(()) })
    });

    let (reply, _) = send(app, RequestView::new(Method::HEAD, Uri::from_static("/"))).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.header("content-length"), Some("7"));
    assert!(reply.body.is_empty());
}

#[tokio::test]
async fn missing_body_sends_the_status_message() {
    let app = App::new().use_fn(|ctx| {
        ctx.set_status(200);
        Box::pin(async { Ok(()) })
    });

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "OK");
    assert_eq!(reply.header("content-length"), Some("2"));
    assert_eq!(reply.header("content-type"), Some("text/plain; charset=utf-8"));
}

#[tokio::test]
async fn json_body_is_serialized() {
    let app = App::new().use_fn(|ctx| {
        ctx.set_body(json!({ "id": 7, "tags": ["x"] }));
        Box::pin(async { Ok(()) })
    });

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.header("content-type"), Some("application/json; charset=utf-8"));
    assert_eq!(reply.header("content-length"), Some(reply.body.len().to_string().as_str()));
    let body: serde_json::Value = serde_json::from_slice(&reply.body).unwrap();
    assert_eq!(body, json!({ "id": 7, "tags": ["x"] }));
}

#[tokio::test]
async fn stream_body_is_piped() {
    let app = App::new().use_fn(|ctx| {
        let chunks = vec![Ok(Bytes::from("chunk-1 ")), Ok(Bytes::from("chunk-2"))];
        ctx.set_body(Body::stream(stream::iter(chunks)));
        Box::pin(async { Ok(()) })
    });

    let (reply, ctx) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(reply.body, "chunk-1 chunk-2");
    assert_eq!(reply.header("content-type"), Some("application/octet-stream"));
    assert!(ctx.finished());
}

#[tokio::test]
async fn stream_failing_up_front_is_rendered_as_error() {
    let app = App::new().use_fn(|ctx| {
        let chunks: Vec<io::Result<Bytes>> = vec![Err(io::Error::other("disk on fire"))];
        ctx.set_body(Body::stream(stream::iter(chunks)));
        Box::pin(async { Ok(()) })
    });

    let (reply, ctx) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(reply.body, "Internal Server Error");
    assert!(ctx.ended());
}

#[tokio::test]
async fn respond_false_suppresses_the_write() {
    let log = Log::default();
    let app = App::new().use_middleware(Step::new("a", &log)).use_fn(|ctx| {
        ctx.respond = false;
        ctx.set_body("never sent");
        Box::pin(async { Ok(()) })
    });

    let (reply, ctx) = exchange(app, get("/")).await;

    assert!(reply.is_none());
    assert!(ctx.ended());
    assert!(!ctx.headers_sent());
    assert_eq!(log.entries(), ["a", "after a"]);
}

#[tokio::test]
async fn powered_by_banner_is_set() {
    let (reply, _) = send(App::new().use_middleware(hello), get("/")).await;
    assert_eq!(reply.header("x-powered-by"), Some("ferrule"));
}

// ── After-hooks ───────────────────────────────────────────────────────────────

#[tokio::test]
async fn hooks_cannot_queue_more_hooks() {
    let log = Log::default();
    let inner = log.clone();
    let app = App::new()
        .use_fn(move |ctx| {
            let inner = inner.clone();
            let queued = ctx.after(from_fn(move |ctx| {
                let late = ctx.after(from_fn(|_ctx| Box::pin(async { Ok(()) })));
                inner.push(match late {
                    Err(Error::InvalidState(_)) => "rejected",
                    _ => "accepted",
                });
                Box::pin(async { Ok(()) })
            }));
            Box::pin(async move {
                queued?;
                Ok(())
            })
        })
        .use_middleware(hello);

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::OK);
    assert_eq!(log.entries(), ["rejected"]);
}

#[tokio::test]
async fn hooks_see_the_final_status() {
    let log = Log::default();
    let inner = log.clone();
    let app = App::new()
        .use_fn(move |ctx| {
            let inner = inner.clone();
            let queued = ctx.after(from_fn(move |ctx| {
                inner.push(ctx.status().to_string());
                Box::pin(async { Ok(()) })
            }));
            Box::pin(async move {
                queued?;
                Ok(())
            })
        })
        .use_middleware(reject);

    let (reply, _) = send(app, get("/")).await;

    assert_eq!(reply.status, StatusCode::BAD_REQUEST);
    assert_eq!(log.entries(), ["400"]);
}

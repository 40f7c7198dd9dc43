//! Finalizes the response exactly once.
//!
//! Body dispatch, first match wins:
//!
//! | Case | Sent |
//! |---|---|
//! | status forbids a body (204, 205, 304) | nothing, entity headers stripped |
//! | `HEAD` request | nothing; JSON bodies still get their `content-length` |
//! | no body | the status message as plain text |
//! | text or bytes | as is |
//! | stream | piped, once the first chunk has arrived |
//! | JSON value | serialized |

use bytes::Bytes;
use futures::{StreamExt, TryStreamExt, stream};
use http::{Response, StatusCode};
use http_body::Frame;
use http_body_util::{BodyExt, Empty, Full, StreamBody};
use tokio_util::sync::CancellationToken;

use crate::context::RequestContext;
use crate::error::Failure;
use crate::response::{Body, BodyStream, ContentType};
use crate::status;
use crate::transport::{BoxBody, Transport};

/// Why finalization did not complete.
pub(crate) enum Interrupted {
    /// The stream body failed before producing any data. Nothing has been
    /// sent, so the failure can still be rendered.
    Failed(Failure),
    /// The peer went away while waiting for the first chunk.
    Cancelled,
}

/// Writes the context's response to `transport`.
///
/// Repeat calls are no-ops once the context ended or the response left.
pub(crate) async fn respond(
    ctx: &mut RequestContext,
    transport: &mut Transport,
) -> Result<(), Interrupted> {
    if !ctx.respond {
        ctx.mark_ended();
        return Ok(());
    }
    if ctx.ended() || transport.headers_sent() || ctx.is_settled() {
        return Ok(());
    }

    if let Some(by) = ctx.config().powered_by.clone() {
        ctx.set("x-powered-by", &by);
    }

    let code = ctx.status();
    let body = if status::is_empty(code) {
        ctx.response.take_body();
        ctx.response.strip_entity_headers();
        empty()
    } else if ctx.request.is_head() {
        if let Body::Json(value) = ctx.body() {
            let len = serde_json::to_vec(value).map_err(|e| Interrupted::Failed(e.into()))?.len();
            ctx.response.set_length(len);
        }
        empty()
    } else {
        match ctx.response.take_body() {
            Body::Empty => {
                let text = ctx.response.message().into_owned();
                ctx.response.set_type(ContentType::Text);
                ctx.response.set_length(text.len());
                full(text)
            }
            Body::Text(text) => full(text),
            Body::Bytes(bytes) => full(bytes),
            Body::Stream(stream) => pipe(stream, transport.stop_signal()).await?,
            Body::Json(value) => {
                let text = serde_json::to_vec(&value).map_err(|e| Interrupted::Failed(e.into()))?;
                ctx.response.set_length(text.len());
                full(text)
            }
        }
    };

    transport.send(build(ctx, body));
    ctx.mark_headers_sent();
    ctx.mark_ended();
    Ok(())
}

/// Waits for the first chunk so that a stream failing up front can still be
/// turned into an error response.
async fn pipe(mut body: BodyStream, stop: CancellationToken) -> Result<BoxBody, Interrupted> {
    let first = tokio::select! {
        biased;
        () = stop.cancelled() => return Err(Interrupted::Cancelled),
        first = body.next() => first,
    };
    match first {
        None => Ok(empty()),
        Some(Err(e)) => Err(Interrupted::Failed(e.into())),
        Some(Ok(chunk)) => {
            let rest = stream::once(async move { Ok(chunk) }).chain(body);
            Ok(StreamBody::new(rest.map_ok(Frame::data)).boxed_unsync())
        }
    }
}

fn build(ctx: &RequestContext, body: BoxBody) -> Response<BoxBody> {
    let mut response = Response::new(body);
    *response.status_mut() =
        StatusCode::from_u16(ctx.status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    *response.headers_mut() = ctx.response.headers().clone();
    response
}

fn empty() -> BoxBody {
    Empty::<Bytes>::new().map_err(|never| match never {}).boxed_unsync()
}

fn full(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed_unsync()
}

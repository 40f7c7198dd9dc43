//! Turns a failure of unknown shape into a safe status and body.
//!
//! | Input | Status | Body |
//! |---|---|---|
//! | JSON value with numeric `status` | that status (500 if unrecognized) | the value itself |
//! | error with code `ENOENT` | 404 | reason phrase |
//! | error with a recognized status | that status | message if exposed, else reason phrase |
//! | anything else | 500 | reason phrase |
//!
//! A response that has already settled is never touched: the error comes
//! back with diagnostics attached, for the reporter.

use serde_json::Value;

use crate::context::RequestContext;
use crate::error::{Failure, HttpError};
use crate::response::ContentType;
use crate::status;

/// Headers that survive an error response. Prefix match on lowercase names.
const RETAINED_HEADERS: &[&str] = &[
    "accept",
    "allow",
    "retry-after",
    "warning",
    "vary",
    "access-control-allow-",
];

/// Renders `failure` into the context's status and body.
///
/// Returns the error when it should still reach the process-level reporter:
/// genuine faults, and anything arriving after the response settled.
pub(crate) fn render(ctx: &mut RequestContext, failure: Failure) -> Option<HttpError> {
    if ctx.ended() || ctx.is_settled() || ctx.headers_sent() {
        let mut err = failure.into_error();
        err.attach(ctx.headers_sent(), ctx.to_json());
        return Some(err);
    }

    let err = match failure {
        Failure::Value(value) => match value.get("status").and_then(Value::as_u64) {
            Some(code) => {
                render_value(ctx, code, value);
                return None;
            }
            None => Failure::Value(value).into_error(),
        },
        Failure::Error(err) => err,
    };

    let res = &mut ctx.response;
    res.retain_headers(|name| RETAINED_HEADERS.iter().any(|prefix| name.starts_with(prefix)));
    res.set_type(ContentType::Text);
    res.set("x-content-type-options", "nosniff");

    let code = resolve_status(&err);
    res.set_status(code);
    let body = if err.expose() {
        err.message().to_owned()
    } else {
        status::reason(code).unwrap_or_default().to_owned()
    };
    res.set_body(body);
    Some(err)
}

/// A structured application error: the value becomes the JSON body.
fn render_value(ctx: &mut RequestContext, code: u64, value: Value) {
    let code = u16::try_from(code)
        .ok()
        .filter(|c| status::is_known(*c))
        .unwrap_or(500);
    ctx.response.set_status(code);
    ctx.response.set_type(ContentType::Json);
    ctx.response.set_body(value);
}

fn resolve_status(err: &HttpError) -> u16 {
    if err.code() == Some("ENOENT") {
        return 404;
    }
    match err.status() {
        Some(code) if status::is_known(code) => code,
        _ => 500,
    }
}

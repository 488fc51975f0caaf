//! Response assembly.
//!
//! # Responsibilities
//! - JSON error bodies
//! - Turn a finished `RequestContext` into the client response, exactly once
//!
//! # Design Decisions
//! - A missing status defaults to 200
//! - Header policy is applied here for locally produced responses; the
//!   forwarder applies the proxy policy itself
//! - Locally produced responses default to `application/json`

use axum::body::Body;
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;

use crate::config::RequestLogLevel;
use crate::http::headers::HeaderScope;
use crate::http::request::RequestContext;

/// `{"errorMessage": "<text>"}`
pub fn error_body(message: &str) -> Vec<u8> {
    let escaped = serde_json::Value::String(message.to_string()).to_string();
    format!("{{\"errorMessage\": {}}}", escaped).into_bytes()
}

/// Error response outside of any request context.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    let mut response = Response::new(Body::from(error_body(message)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

/// Local response: handler headers merged over the static header policy.
pub fn local_response(ctx: &mut RequestContext) -> Response {
    let scope = if ctx.is_options() {
        HeaderScope::StaticOptions
    } else {
        HeaderScope::Static
    };
    let produced = std::mem::take(&mut ctx.response_headers);
    let mut headers = ctx.server.headers.set(scope).apply_local(&produced, ctx.origin());
    if !headers.contains_key(header::CONTENT_TYPE) {
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
    ctx.response_headers = headers;
    finish(ctx)
}

/// Write status, headers and body of the context into a response.
pub fn finish(ctx: &mut RequestContext) -> Response {
    let status = ctx.status.unwrap_or(StatusCode::OK);
    let body = std::mem::take(&mut ctx.output);
    if ctx.server.log_level >= RequestLogLevel::All {
        tracing::info!(
            request_id = %ctx.request_id,
            status = status.as_u16(),
            size = body.len(),
            handled_by = %ctx.handled_by.as_str(),
            "Response"
        );
    }
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    *response.headers_mut() = std::mem::take(&mut ctx.response_headers);
    response
}

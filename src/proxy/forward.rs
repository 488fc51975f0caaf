//! Reverse-proxy forwarder.
//!
//! # Responsibilities
//! - Send the buffered inbound request to an upstream base url
//! - Merge upstream headers with the proxy header policy
//! - Run post-processors, which may veto the upstream response
//! - Map transport failures to JSON error responses
//!
//! # Design Decisions
//! - The upstream path is the original inbound path, not the rewritten one
//! - No retries: a failure is reported once, with the status it maps to
//! - The upstream body is read fully so post-processors can inspect it

use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::http::{header, HeaderMap, Request, StatusCode, Uri};

use crate::condition::ConditionEvaluator;
use crate::gateway::{run_processors, HostServer};
use crate::http::headers::HeaderScope;
use crate::http::request::RequestContext;
use crate::proxy::pool::ClientPool;
use crate::proxy::rewrite::{inbound_headers, outbound_headers, rewrite_set_cookies, target_url, OutboundIdentity};

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// The outbound request could not be built.
    #[error("{0}")]
    BadRequest(String),
    /// Connect, write or read failure before a complete response head.
    #[error("{message}")]
    Transport {
        message: String,
        partial_status: Option<StatusCode>,
    },
    #[error("timeout awaiting response headers after {0}s")]
    HeaderTimeout(u64),
    /// The response head arrived but its body could not be read.
    #[error("{0}")]
    Body(String),
}

impl ForwardError {
    pub fn status(&self) -> StatusCode {
        match self {
            ForwardError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ForwardError::Transport {
                partial_status: Some(status),
                ..
            } if status.as_u16() >= 300 => *status,
            ForwardError::Transport { .. } | ForwardError::HeaderTimeout(_) | ForwardError::Body(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

/// How a forward attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardOutcome {
    /// The upstream response is in the context.
    Forwarded,
    /// A post-processor rejected the upstream response; the context holds not-found.
    Vetoed,
    /// The context holds an error response.
    Failed,
}

struct Upstream {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

async fn execute(
    ctx: &RequestContext,
    server: &HostServer,
    pool: &ClientPool,
    upstream: &str,
) -> Result<Upstream, ForwardError> {
    let url = target_url(upstream, ctx.uri.path(), ctx.uri.query());
    let uri: Uri = url
        .parse()
        .map_err(|e: axum::http::uri::InvalidUri| ForwardError::BadRequest(format!("{}: {}", url, e)))?;

    let identity = OutboundIdentity {
        host_header: &server.host_header,
        proxy_name: server.proxy_name.as_deref(),
        compression: server.proxy_settings.compression,
    };
    let mut request = Request::builder()
        .method(ctx.method.clone())
        .uri(uri)
        .body(Body::from(ctx.body.clone()))
        .map_err(|e| ForwardError::BadRequest(e.to_string()))?;
    *request.headers_mut() = outbound_headers(&ctx.headers, upstream, identity);

    tracing::debug!(request_id = %ctx.request_id, upstream = %url, "Forwarding request");

    let client = pool.get(&server.proxy_settings);
    let pending = client.request(request);
    let result = match server.proxy_settings.response_header_timeout_secs {
        0 => pending.await,
        secs => tokio::time::timeout(Duration::from_secs(secs), pending)
            .await
            .map_err(|_| ForwardError::HeaderTimeout(secs))?,
    };
    let response = result.map_err(|e| ForwardError::Transport {
        message: error_chain(&e),
        partial_status: None,
    })?;

    let (parts, body) = response.into_parts();
    let body = axum::body::to_bytes(Body::new(body), usize::MAX)
        .await
        .map_err(|e| ForwardError::Body(e.to_string()))?;
    Ok(Upstream {
        status: parts.status,
        headers: parts.headers,
        body,
    })
}

/// `client error (Connect): tcp connect error: Connection refused`
fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

/// Forward the request to `upstream`.
///
/// Unless the outcome is `Forwarded`, the context holds a local response
/// that still needs the static header policy.
pub async fn forward(
    ctx: &mut RequestContext,
    pool: &ClientPool,
    evaluator: &dyn ConditionEvaluator,
    upstream: &str,
) -> ForwardOutcome {
    let server = Arc::clone(&ctx.server);
    let upstream_response = match execute(ctx, &server, pool, upstream).await {
        Ok(response) => response,
        Err(e) => {
            let status = e.status();
            tracing::warn!(
                request_id = %ctx.request_id,
                upstream = %upstream,
                status = status.as_u16(),
                error = %e,
                "Upstream request failed"
            );
            ctx.fail(status, &e.to_string());
            return ForwardOutcome::Failed;
        }
    };

    let options = ctx.is_options();
    let scope = if options {
        HeaderScope::ProxyOptions
    } else {
        HeaderScope::Proxy
    };
    let produced = inbound_headers(&upstream_response.headers);
    ctx.response_headers = server.headers.set(scope).apply(&produced, ctx.origin());
    ctx.status = Some(upstream_response.status);
    ctx.output = upstream_response.body.to_vec();

    if !options && !server.post_processors.is_empty() {
        let before = ctx.output.len();
        if run_processors(&server.post_processors, ctx, evaluator) {
            tracing::debug!(request_id = %ctx.request_id, upstream = %upstream, "Upstream response vetoed");
            ctx.response_headers.clear();
            ctx.output.clear();
            ctx.fail(StatusCode::NOT_FOUND, "Not Found");
            return ForwardOutcome::Vetoed;
        }
        if ctx.output.len() != before {
            ctx.response_headers.remove(header::CONTENT_LENGTH);
        }
    }

    if let Some(domain) = server.domain_name.as_deref() {
        rewrite_set_cookies(&mut ctx.response_headers, domain);
    }
    ForwardOutcome::Forwarded
}

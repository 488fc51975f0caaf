//! Request handling.
//!
//! # Responsibilities
//! - Generate a request ID (UUID v4) when the client sent none
//! - Build the per-request variable environment used by condition slots
//! - Hold everything handlers see and write: `RequestContext`
//!
//! # Design Decisions
//! - Request ID added as early as possible for tracing
//! - The inbound request is kept intact for the forwarder; routing works on
//!   a separate normalized path that rewrites may replace
//! - Handlers write into the context; the response is assembled once at the end

use std::collections::HashMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, Request, StatusCode, Uri};
use tower_http::request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer};
use uuid::Uuid;

use crate::condition::Environment;
use crate::gateway::HostServer;
use crate::http::dispatch::HandledBy;
use crate::http::response::error_body;
use crate::routing::{normalize_path, split_segments};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Request ID generator backed by random UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct MakeRequestUuidV4;

impl MakeRequestId for MakeRequestUuidV4 {
    fn make_request_id<B>(&mut self, _request: &Request<B>) -> Option<RequestId> {
        let id = Uuid::new_v4().to_string();
        HeaderValue::from_str(&id).ok().map(RequestId::new)
    }
}

/// Layer that sets `x-request-id` on requests lacking one.
pub fn set_request_id_layer() -> SetRequestIdLayer<MakeRequestUuidV4> {
    SetRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID), MakeRequestUuidV4)
}

/// Layer that copies `x-request-id` onto the response.
pub fn propagate_request_id_layer() -> PropagateRequestIdLayer {
    PropagateRequestIdLayer::new(HeaderName::from_static(X_REQUEST_ID))
}

/// Upper-case letters and digits kept, everything else becomes '_'.
fn env_key(prefix: &str, name: &str) -> String {
    let mut key = String::with_capacity(prefix.len() + name.len());
    key.push_str(prefix);
    key.extend(name.chars().map(|c| {
        if c.is_ascii_alphanumeric() {
            c.to_ascii_uppercase()
        } else {
            '_'
        }
    }));
    key
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers.get(name).and_then(|v| v.to_str().ok()).unwrap_or("")
}

/// Variables visible to `{{expr}}` conditions for one request.
pub fn build_environment(method: &Method, uri: &Uri, headers: &HeaderMap, is_tls: bool) -> Environment {
    let mut env = Environment::new();
    let host = match header_str(headers, "host") {
        "" => uri.authority().map(|a| a.as_str()).unwrap_or(""),
        host => host,
    };
    let forwarded = ["forwarded", "x-forwarded-for", "x-forwarded-host", "x-forwarded-proto"]
        .iter()
        .map(|name| header_str(headers, name))
        .find(|v| !v.is_empty())
        .unwrap_or("");
    let query = uri.query().unwrap_or("");

    env.insert("HTTP_ACCEPT".into(), header_str(headers, "accept").into());
    env.insert("HTTP_COOKIE".into(), header_str(headers, "cookie").into());
    env.insert("HTTP_FORWARDED".into(), forwarded.into());
    env.insert("HTTP_HOST".into(), host.into());
    env.insert("HTTP_REFERER".into(), header_str(headers, "referer").into());
    env.insert("HTTP_USER_AGENT".into(), header_str(headers, "user-agent").into());
    env.insert("REQUEST_METHOD".into(), method.as_str().into());
    env.insert("REQUEST_URI".into(), uri.path().into());
    env.insert("REQUEST_SCHEME".into(), if is_tls { "https" } else { "http" }.into());
    env.insert("REQUEST_URL_PARAMS".into(), query.into());
    env.insert("SERVER_NAME".into(), host.into());
    env.insert(
        "URL".into(),
        uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/").into(),
    );

    for name in headers.keys() {
        if let Ok(value) = headers[name].to_str() {
            env.entry(env_key("H_", name.as_str())).or_insert_with(|| value.to_string());
        }
    }
    for (name, value) in url::form_urlencoded::parse(query.as_bytes()) {
        env.entry(env_key("G_", &name)).or_insert_with(|| value.into_owned());
    }
    env
}

/// Everything one request carries through the dispatcher.
pub struct RequestContext {
    pub request_id: String,
    pub method: Method,
    /// Inbound uri, unchanged by rewrites.
    pub uri: Uri,
    /// Inbound headers.
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Host used for host-server selection (port stripped when configured).
    pub host: String,
    /// Current normalized routing path.
    pub path: String,
    pub segments: Vec<String>,
    pub lower_segments: Vec<String>,
    pub environment: Arc<Environment>,
    /// Values captured by the mask that selected the running handler.
    pub captures: HashMap<String, String>,
    /// Data of the running handler block.
    pub params: Arc<HashMap<String, String>>,
    pub server: Arc<HostServer>,
    pub handled_by: HandledBy,
    pub status: Option<StatusCode>,
    pub response_headers: HeaderMap,
    pub output: Vec<u8>,
}

impl RequestContext {
    pub fn new(
        method: Method,
        uri: Uri,
        headers: HeaderMap,
        body: Bytes,
        host: String,
        server: Arc<HostServer>,
        environment: Arc<Environment>,
    ) -> Self {
        let request_id = header_str(&headers, X_REQUEST_ID).to_string();
        let mut ctx = Self {
            request_id,
            method,
            uri,
            headers,
            body,
            host,
            path: String::new(),
            segments: Vec::new(),
            lower_segments: Vec::new(),
            environment,
            captures: HashMap::new(),
            params: Arc::new(HashMap::new()),
            server,
            handled_by: HandledBy::NotFound,
            status: None,
            response_headers: HeaderMap::new(),
            output: Vec::new(),
        };
        let path = ctx.uri.path().to_string();
        ctx.set_path(&path);
        ctx
    }

    /// Replace the routing path (after a rewrite) and refresh the segment lists.
    pub fn set_path(&mut self, path: &str) {
        self.path = normalize_path(path);
        self.segments = split_segments(&self.path).into_iter().map(str::to_string).collect();
        self.lower_segments = self.segments.iter().map(|s| s.to_ascii_lowercase()).collect();
    }

    /// Request `Origin`, or `*` when absent.
    pub fn origin(&self) -> &str {
        match header_str(&self.headers, "origin") {
            "" => "*",
            origin => origin,
        }
    }

    pub fn is_options(&self) -> bool {
        self.method == Method::OPTIONS
    }

    pub fn capture(&self, name: &str) -> Option<&str> {
        self.captures.get(name).map(String::as_str)
    }

    pub fn set_status(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    pub fn write(&mut self, data: &[u8]) {
        self.output.extend_from_slice(data);
    }

    pub fn set_header(&mut self, name: &str, value: &str) -> Result<(), axum::http::Error> {
        let name = HeaderName::from_bytes(name.trim().as_bytes())?;
        let value = HeaderValue::from_str(value.trim())?;
        self.response_headers.insert(name, value);
        Ok(())
    }

    /// Replace the output with a JSON error body.
    pub fn fail(&mut self, status: StatusCode, message: &str) {
        self.status = Some(status);
        self.output = error_body(message);
        self.response_headers
            .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    }
}

impl std::fmt::Debug for RequestContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestContext")
            .field("request_id", &self.request_id)
            .field("method", &self.method)
            .field("host", &self.host)
            .field("path", &self.path)
            .field("handled_by", &self.handled_by)
            .field("status", &self.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_keys() {
        let uri: Uri = "/shop/items?page=2&sort-by=name".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("shop.example:8080"));
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));
        headers.insert("x-api-key", HeaderValue::from_static("k1"));

        let env = build_environment(&Method::GET, &uri, &headers, false);
        assert_eq!(env["HTTP_HOST"], "shop.example:8080");
        assert_eq!(env["SERVER_NAME"], "shop.example:8080");
        assert_eq!(env["HTTP_FORWARDED"], "10.0.0.1");
        assert_eq!(env["REQUEST_METHOD"], "GET");
        assert_eq!(env["REQUEST_URI"], "/shop/items");
        assert_eq!(env["REQUEST_SCHEME"], "http");
        assert_eq!(env["REQUEST_URL_PARAMS"], "page=2&sort-by=name");
        assert_eq!(env["URL"], "/shop/items?page=2&sort-by=name");
        assert_eq!(env["H_X_API_KEY"], "k1");
        assert_eq!(env["G_PAGE"], "2");
        assert_eq!(env["G_SORT_BY"], "name");
        assert_eq!(env["HTTP_COOKIE"], "");
    }

    #[test]
    fn test_forwarded_prefers_standard_header() {
        let uri: Uri = "/".parse().unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        let env = build_environment(&Method::GET, &uri, &headers, true);
        assert_eq!(env["HTTP_FORWARDED"], "https");
        assert_eq!(env["REQUEST_SCHEME"], "https");

        headers.insert("forwarded", HeaderValue::from_static("for=1.2.3.4"));
        let env = build_environment(&Method::GET, &uri, &headers, true);
        assert_eq!(env["HTTP_FORWARDED"], "for=1.2.3.4");
    }

    #[test]
    fn test_request_id_generator() {
        let request = Request::new(());
        let id = MakeRequestUuidV4.make_request_id(&request).unwrap();
        let text = id.header_value().to_str().unwrap();
        assert!(Uuid::parse_str(text).is_ok());
    }
}

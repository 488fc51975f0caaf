//! Outbound request and inbound response header rewriting.
//!
//! # Responsibilities
//! - Build the upstream url from the base url and the original request path
//! - Filter inbound headers and apply the Host override
//! - Present the gateway under its proxy identity (Origin, Referer)
//! - Rewrite Set-Cookie domains on the way back

use axum::http::{header, HeaderMap, HeaderName, HeaderValue};

/// Headers meaningful for a single connection only.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-connection",
    "proxy-authenticate",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    HOP_BY_HOP.contains(&name.as_str())
}

/// `base + path [+ "?" + query]`.
pub fn target_url(base: &str, path: &str, query: Option<&str>) -> String {
    let base = base.trim().trim_end_matches('/');
    let mut url = String::with_capacity(base.len() + path.len() + 1);
    url.push_str(base);
    if !path.starts_with('/') {
        url.push('/');
    }
    url.push_str(path);
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Host (and port) part of a url: `http://up:9000/x` → `up:9000`.
pub fn extract_host(url: &str) -> &str {
    let rest = match url.find("//") {
        Some(at) => &url[at + 2..],
        None => url,
    };
    match rest.find('/') {
        Some(at) if at > 0 => &rest[..at],
        _ => rest,
    }
}

/// `https://app.example` under name `gw` → `https://gw`; no scheme → `http://gw`.
pub fn rewrite_origin(origin: &str, proxy_name: &str) -> String {
    match origin.find("//") {
        Some(at) if at > 0 => format!("{}{}", &origin[..at + 2], proxy_name),
        _ => format!("http://{}", proxy_name),
    }
}

/// Swap the host segment of a referer, keeping scheme and path.
/// Returns `None` when the referer has no `//`.
pub fn rewrite_referer(referer: &str, proxy_name: &str) -> Option<String> {
    let start = referer.find("//").filter(|&at| at > 0)? + 2;
    let mut out = String::with_capacity(referer.len() + proxy_name.len());
    out.push_str(&referer[..start]);
    out.push_str(proxy_name);
    if let Some(slash) = referer[start..].find('/') {
        out.push_str(&referer[start + slash..]);
    }
    Some(out)
}

/// Replace the value of a `domain=` attribute, keeping everything else.
pub fn rewrite_cookie_domain(cookie: &str, domain: &str) -> String {
    let mut out = String::with_capacity(cookie.len() + domain.len());
    for (i, attribute) in cookie.split(';').enumerate() {
        if i > 0 {
            out.push(';');
        }
        let trimmed = attribute.trim_start();
        let is_domain = i > 0
            && trimmed.len() >= 7
            && trimmed.as_bytes()[..7].eq_ignore_ascii_case(b"domain=");
        if is_domain {
            let indent = &attribute[..attribute.len() - trimmed.len()];
            out.push_str(indent);
            out.push_str(&trimmed[..7]);
            out.push_str(domain);
        } else {
            out.push_str(attribute);
        }
    }
    out
}

/// Outbound identity settings of one host server.
#[derive(Debug, Clone, Copy)]
pub struct OutboundIdentity<'a> {
    /// "-" means no override, "" derives the host from the upstream url.
    pub host_header: &'a str,
    pub proxy_name: Option<&'a str>,
    pub compression: bool,
}

/// Headers sent upstream.
pub fn outbound_headers(inbound: &HeaderMap, upstream: &str, identity: OutboundIdentity<'_>) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if value.is_empty() || is_hop_by_hop(name) || name == header::HOST {
            continue;
        }
        if !identity.compression && name == header::ACCEPT_ENCODING {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }

    if identity.host_header != "-" {
        let host = if identity.host_header.is_empty() {
            extract_host(upstream)
        } else {
            identity.host_header
        };
        match HeaderValue::from_str(host) {
            Ok(value) => {
                headers.insert(header::HOST, value);
            }
            Err(_) => tracing::warn!(host = %host, "Host override is not a valid header value"),
        }
    }

    if let Some(name) = identity.proxy_name {
        let origin = headers
            .get(header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .map(|origin| rewrite_origin(origin, name));
        if let Some(Ok(value)) = origin.map(|o| HeaderValue::from_str(&o)) {
            headers.insert(header::ORIGIN, value);
        }
        let referer = headers
            .get(header::REFERER)
            .and_then(|v| v.to_str().ok())
            .and_then(|referer| rewrite_referer(referer, name));
        if let Some(Ok(value)) = referer.map(|r| HeaderValue::from_str(&r)) {
            headers.insert(header::REFERER, value);
        }
    }
    headers
}

/// Upstream response headers without hop-by-hop entries.
pub fn inbound_headers(upstream: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(upstream.len());
    for (name, value) in upstream {
        if !is_hop_by_hop(name) {
            headers.append(name.clone(), value.clone());
        }
    }
    headers
}

/// Rewrite the `domain=` attribute of every Set-Cookie header.
pub fn rewrite_set_cookies(headers: &mut HeaderMap, domain: &str) {
    let cookies: Vec<HeaderValue> = headers
        .get_all(header::SET_COOKIE)
        .iter()
        .map(|value| match value.to_str() {
            Ok(cookie) => {
                HeaderValue::from_str(&rewrite_cookie_domain(cookie, domain)).unwrap_or_else(|_| value.clone())
            }
            Err(_) => value.clone(),
        })
        .collect();
    if cookies.is_empty() {
        return;
    }
    headers.remove(header::SET_COOKIE);
    for cookie in cookies {
        headers.append(header::SET_COOKIE, cookie);
    }
}

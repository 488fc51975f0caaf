//! Response header policy.
//!
//! # Responsibilities
//! - Merge produced headers (upstream or handler) with configured headers
//! - Compute CORS attributes from the request origin and configured lists
//!
//! # Design Decisions
//! - Four header sets per host server: static, static OPTIONS, proxy, proxy OPTIONS
//! - Merge order: the weaker side (upstream headers for forwarded responses,
//!   configured headers for local ones), then the stronger side, then computed
//!   attributes
//! - Multi-valued produced headers (Set-Cookie) keep every value

use axum::http::{HeaderMap, HeaderName, HeaderValue};

use crate::config::schema::HostServerConfig;

/// How a computed header derives its value.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SpecialKind {
    /// Merge configured words into the produced comma list without repeats.
    AddToList,
    /// Echo the request origin when it is listed, else keep the produced value.
    SetOrigin,
    /// Always echo the request origin (`*` listed).
    SetOriginAlways,
}

#[derive(Debug, Clone)]
struct SpecialHeader {
    kind: SpecialKind,
    list: Vec<String>,
    plain: String,
}

impl SpecialHeader {
    fn from_list(data: &str) -> Option<Self> {
        let list: Vec<String> = data
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        if list.is_empty() {
            return None;
        }
        let plain = list.join(", ");
        Some(Self {
            kind: SpecialKind::AddToList,
            list,
            plain,
        })
    }

    fn origin(data: &str) -> Option<Self> {
        let mut header = Self::from_list(data)?;
        header.kind = if header.list.iter().any(|o| o == "*") {
            SpecialKind::SetOriginAlways
        } else {
            SpecialKind::SetOrigin
        };
        Some(header)
    }

    fn resolve(&self, produced: Option<&str>, origin: &str) -> Option<String> {
        match self.kind {
            SpecialKind::AddToList => match produced.map(str::trim).filter(|p| !p.is_empty()) {
                Some(current) => {
                    let mut merged = current.to_string();
                    let existing: Vec<&str> = current
                        .split(|c: char| c == ',' || c.is_whitespace())
                        .filter(|s| !s.is_empty())
                        .collect();
                    for word in &self.list {
                        if !existing.iter().any(|e| e.eq_ignore_ascii_case(word)) {
                            merged.push_str(", ");
                            merged.push_str(word);
                        }
                    }
                    Some(merged)
                }
                None => Some(self.plain.clone()),
            },
            SpecialKind::SetOrigin => {
                if self.list.iter().any(|o| o == origin) {
                    Some(origin.to_string())
                } else {
                    produced.map(str::to_string)
                }
            }
            SpecialKind::SetOriginAlways => Some(origin.to_string()),
        }
    }
}

/// One header set: fixed configured values plus computed attributes.
#[derive(Debug, Clone, Default)]
pub struct HeaderSet {
    fixed: HeaderMap,
    special: Vec<(HeaderName, SpecialHeader)>,
}

impl HeaderSet {
    fn with_fixed<'a>(mut self, entries: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        for (name, value) in entries {
            match (
                HeaderName::from_bytes(name.trim().as_bytes()),
                HeaderValue::from_str(value.trim()),
            ) {
                (Ok(name), Ok(value)) => {
                    self.fixed.insert(name, value);
                }
                _ => tracing::warn!(header = %name, "Invalid configured header skipped"),
            }
        }
        self
    }

    fn with_special(mut self, name: &'static str, header: Option<SpecialHeader>) -> Self {
        if let Some(header) = header {
            self.special.push((HeaderName::from_static(name), header));
        }
        self
    }

    fn is_special(&self, name: &HeaderName) -> bool {
        self.special.iter().any(|(n, _)| n == name)
    }

    /// Forwarded responses: configured headers override upstream ones.
    pub fn apply(&self, produced: &HeaderMap, origin: &str) -> HeaderMap {
        self.merge(produced, origin, false)
    }

    /// Local responses: headers set by handlers override configured ones.
    pub fn apply_local(&self, produced: &HeaderMap, origin: &str) -> HeaderMap {
        self.merge(produced, origin, true)
    }

    fn merge(&self, produced: &HeaderMap, origin: &str, produced_wins: bool) -> HeaderMap {
        let (lower, upper) = if produced_wins {
            (&self.fixed, produced)
        } else {
            (produced, &self.fixed)
        };
        let mut out = HeaderMap::with_capacity(produced.len() + self.fixed.len());
        for (name, value) in lower {
            if self.is_special(name) || upper.contains_key(name) {
                continue;
            }
            out.append(name.clone(), value.clone());
        }
        for name in upper.keys() {
            if self.is_special(name) {
                continue;
            }
            for value in upper.get_all(name) {
                out.append(name.clone(), value.clone());
            }
        }
        for (name, header) in &self.special {
            let current = upper
                .get(name)
                .or_else(|| lower.get(name))
                .and_then(|v| v.to_str().ok());
            if let Some(value) = header.resolve(current, origin) {
                match HeaderValue::from_str(&value) {
                    Ok(value) => {
                        out.insert(name.clone(), value);
                    }
                    Err(_) => tracing::debug!(header = %name, "Computed header value is not valid"),
                }
            }
        }
        out
    }
}

/// Which header set a response uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderScope {
    Static,
    StaticOptions,
    Proxy,
    ProxyOptions,
}

#[derive(Debug, Clone, Default)]
pub struct HeaderPolicy {
    static_headers: HeaderSet,
    static_options: HeaderSet,
    proxy: HeaderSet,
    proxy_options: HeaderSet,
}

fn pairs(map: &std::collections::BTreeMap<String, String>) -> impl Iterator<Item = (&str, &str)> {
    map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
}

impl HeaderPolicy {
    pub fn from_config(server: &HostServerConfig) -> Self {
        let max_age = server.access_control_max_age.trim();
        let max_age = if !max_age.is_empty() && max_age.parse::<u64>().is_err() {
            tracing::warn!(value = %max_age, "access_control_max_age must be empty or a number");
            ""
        } else {
            max_age
        };
        let credentials = match server.access_control_allow_credentials.trim() {
            "" | "false" => false,
            "true" => true,
            other => {
                tracing::warn!(value = %other, "access_control_allow_credentials must be empty, true or false");
                false
            }
        };
        let cache_control = server.cache_control.trim();
        let expose = SpecialHeader::from_list(&server.access_control_expose_headers);
        let allow_headers = SpecialHeader::from_list(&server.access_control_allow_headers);
        let allow_methods = SpecialHeader::from_list(&server.access_control_allow_methods);
        let allow_origin = SpecialHeader::origin(&server.access_control_allow_origin);

        let credentials_entry = credentials.then_some(("Access-Control-Allow-Credentials", "true"));
        let cache_entry = (!cache_control.is_empty()).then_some(("Cache-Control", cache_control));
        let max_age_entry = (!max_age.is_empty()).then_some(("Access-Control-Max-Age", max_age));
        let expose_plain = expose.as_ref().map(|e| e.plain.clone()).unwrap_or_default();
        let expose_entry = expose
            .as_ref()
            .map(|_| ("Access-Control-Expose-Headers", expose_plain.as_str()));
        let allow_headers_plain = allow_headers.as_ref().map(|e| e.plain.clone()).unwrap_or_default();
        let allow_headers_entry = allow_headers
            .as_ref()
            .map(|_| ("Access-Control-Allow-Headers", allow_headers_plain.as_str()));

        let static_headers = HeaderSet::default()
            .with_fixed(pairs(&server.headers_static))
            .with_fixed(credentials_entry)
            .with_fixed(cache_entry)
            .with_fixed(expose_entry)
            .with_special("access-control-allow-origin", allow_origin.clone());

        let static_options = HeaderSet::default()
            .with_fixed(pairs(&server.headers_static_options))
            .with_fixed(max_age_entry)
            .with_fixed(credentials_entry)
            .with_fixed(allow_headers_entry)
            .with_special("access-control-allow-headers", allow_headers.clone())
            .with_special("access-control-allow-methods", allow_methods.clone())
            .with_special("access-control-allow-origin", allow_origin.clone());

        let proxy = HeaderSet::default()
            .with_fixed(pairs(&server.headers_proxy))
            .with_fixed(credentials_entry)
            .with_fixed(cache_entry)
            .with_special("access-control-expose-headers", expose)
            .with_special("access-control-allow-origin", allow_origin.clone());

        let proxy_options = HeaderSet::default()
            .with_fixed(pairs(&server.headers_proxy_options))
            .with_fixed(max_age_entry)
            .with_fixed(credentials_entry)
            .with_special("access-control-allow-headers", allow_headers)
            .with_special("access-control-allow-methods", allow_methods)
            .with_special("access-control-allow-origin", allow_origin);

        Self {
            static_headers,
            static_options,
            proxy,
            proxy_options,
        }
    }

    pub fn set(&self, scope: HeaderScope) -> &HeaderSet {
        match scope {
            HeaderScope::Static => &self.static_headers,
            HeaderScope::StaticOptions => &self.static_options,
            HeaderScope::Proxy => &self.proxy,
            HeaderScope::ProxyOptions => &self.proxy_options,
        }
    }
}

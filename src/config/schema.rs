//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the gateway.
//! All types derive Serde traits for deserialization from config files.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::routing::DefaultPolicy;

/// Root configuration for the gateway.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listener configuration (bind address, TLS, host handling).
    pub listener: ListenerConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// Server used when the request host matches no `host_servers` entry.
    pub server: HostServerConfig,

    /// Per-host servers, selected by exact host name.
    pub host_servers: Vec<HostServerConfig>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Drop ":port" from the Host header before host-server lookup.
    pub strip_port_from_host: bool,

    /// Prepend the request host as the first path segment before routing.
    pub host_in_path: bool,

    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            strip_port_from_host: true,
            host_in_path: false,
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: String,

    /// Path to private key file (PEM).
    pub key_path: String,
}

/// Timeout configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Whole-request deadline in seconds. No deadline when unset.
    pub request_secs: Option<u64>,
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

/// Per-request logging detail for one host server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RequestLogLevel {
    #[default]
    None,
    /// Method and path.
    Url,
    /// Also the request body size.
    Input,
    /// Also the response status and size.
    All,
}

/// One rewrite rule.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct RewriteConfig {
    pub from: String,
    pub to: String,
    /// Condition expression; the rule applies only when it is truthy.
    pub condition: String,
    /// Accepted for compatibility; every rewrite is single-shot, so no
    /// option changes the result.
    pub options: String,
}

/// Upstream selected by a mask-list filter.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyServerConfig {
    pub url: String,
    /// Comma/space separated masks.
    pub filter: String,
    pub default_policy: DefaultPolicy,
}

/// Outbound client tuning. Equal settings share one pooled client per host server.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(default)]
pub struct ProxySettings {
    pub keep_alive: bool,
    pub max_idle_connections: usize,
    pub max_idle_connections_per_host: usize,
    /// 0 disables the response-header timeout.
    pub response_header_timeout_secs: u64,
    pub expect_continue_timeout_secs: u64,
    pub idle_connection_timeout_secs: u64,
    pub compression: bool,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            keep_alive: true,
            max_idle_connections: 100,
            max_idle_connections_per_host: 32,
            response_header_timeout_secs: 0,
            expect_continue_timeout_secs: 1,
            idle_connection_timeout_secs: 90,
            compression: true,
        }
    }
}

/// Action or module reference: a registered handler name bound to a mask.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct EndpointConfig {
    pub name: String,
    pub url: String,
    pub params: Vec<String>,
}

/// Processor or post-processor reference: a registered handler name bound to a mask list.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProcessorConfig {
    pub name: String,
    pub urls: String,
    pub params: Vec<String>,
}

/// Settings for one host server (or the default server).
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct HostServerConfig {
    /// Host names served by this entry (space/comma separated).
    pub hosts: String,

    /// Root folder for local static files.
    pub base_folder: String,

    /// Index files probed, in order, when a path resolves to a directory.
    pub directory_index: Vec<String>,

    /// Base rewrites, applied before any handler sees the path.
    pub rewrites: Vec<RewriteConfig>,

    /// Rewrites applied after actions and modules declined.
    pub server_rewrites: Vec<RewriteConfig>,

    /// Second static root tried after server rewrites.
    pub extra_static_folder: String,

    /// Legacy: an http(s) url is the default proxy, anything else an extra static folder.
    pub extra_server: String,

    /// Request host → upstream base url.
    pub proxy_hosts: BTreeMap<String, String>,

    /// Filtered upstreams; the first whose filter matches wins.
    pub proxy_servers: Vec<ProxyServerConfig>,

    /// Default upstream base url.
    pub proxy_server: String,

    pub proxy_settings: ProxySettings,

    /// Identity used for outbound Origin/Referer.
    pub proxy_name: String,

    /// Domain written into Set-Cookie `domain=` attributes.
    pub domain_name: String,

    /// Outbound Host: "-" leaves it to the transport, "" derives it from the upstream url.
    pub host_header: String,

    pub cache_control: String,
    pub access_control_allow_origin: String,
    pub access_control_allow_methods: String,
    pub access_control_allow_headers: String,
    pub access_control_expose_headers: String,
    pub access_control_max_age: String,
    pub access_control_allow_credentials: String,

    pub headers_static: BTreeMap<String, String>,
    pub headers_proxy: BTreeMap<String, String>,
    pub headers_static_options: BTreeMap<String, String>,
    pub headers_proxy_options: BTreeMap<String, String>,

    pub actions: Vec<EndpointConfig>,
    pub modules: Vec<EndpointConfig>,
    pub processors: Vec<ProcessorConfig>,
    pub post_processors: Vec<ProcessorConfig>,

    /// Default case handling for masks without a `<`/`>` modifier.
    pub case_insensitive: bool,

    pub log_level: RequestLogLevel,
}

pub fn default_directory_index() -> Vec<String> {
    vec!["$.html".to_string(), "index.html".to_string(), "index.htm".to_string()]
}

impl Default for HostServerConfig {
    fn default() -> Self {
        Self {
            hosts: String::new(),
            base_folder: String::new(),
            directory_index: default_directory_index(),
            rewrites: Vec::new(),
            server_rewrites: Vec::new(),
            extra_static_folder: String::new(),
            extra_server: String::new(),
            proxy_hosts: BTreeMap::new(),
            proxy_servers: Vec::new(),
            proxy_server: String::new(),
            proxy_settings: ProxySettings::default(),
            proxy_name: String::new(),
            domain_name: String::new(),
            host_header: String::new(),
            cache_control: String::new(),
            access_control_allow_origin: String::new(),
            access_control_allow_methods: String::new(),
            access_control_allow_headers: String::new(),
            access_control_expose_headers: String::new(),
            access_control_max_age: String::new(),
            access_control_allow_credentials: String::new(),
            headers_static: BTreeMap::new(),
            headers_proxy: BTreeMap::new(),
            headers_static_options: BTreeMap::new(),
            headers_proxy_options: BTreeMap::new(),
            actions: Vec::new(),
            modules: Vec::new(),
            processors: Vec::new(),
            post_processors: Vec::new(),
            case_insensitive: false,
            log_level: RequestLogLevel::None,
        }
    }
}

impl HostServerConfig {
    /// True for urls the forwarder can reach.
    pub fn is_http_url(value: &str) -> bool {
        let lower = value.trim().to_ascii_lowercase();
        lower.starts_with("http:") || lower.starts_with("https:")
    }

    /// Default proxy target, honouring the legacy `extra_server` value.
    pub fn effective_proxy_server(&self) -> Option<&str> {
        let direct = self.proxy_server.trim();
        if !direct.is_empty() {
            return Some(direct);
        }
        let legacy = self.extra_server.trim();
        (!legacy.is_empty() && Self::is_http_url(legacy)).then_some(legacy)
    }

    /// Extra static folder, honouring the legacy `extra_server` value.
    pub fn effective_extra_static_folder(&self) -> Option<&str> {
        let direct = self.extra_static_folder.trim();
        if !direct.is_empty() {
            return Some(direct);
        }
        let legacy = self.extra_server.trim();
        (!legacy.is_empty() && !Self::is_http_url(legacy)).then_some(legacy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config: GatewayConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert!(config.listener.strip_port_from_host);
        assert_eq!(config.server.directory_index, default_directory_index());
        assert!(config.timeouts.request_secs.is_none());
        assert!(config.host_servers.is_empty());
    }

    #[test]
    fn test_full_host_server_section() {
        let text = r#"
            [server]
            base_folder = "/srv/www"
            proxy_server = "http://127.0.0.1:9000"
            log_level = "all"

            [[server.rewrites]]
            from = "/old/*"
            to = "/new"

            [[server.proxy_servers]]
            url = "http://api:8000"
            filter = "/api/**, !/api/internal/*"
            default_policy = "infer_or_false"

            [server.proxy_hosts]
            "shop.example" = "http://shop:8000"

            [[host_servers]]
            hosts = "a.example b.example"
            proxy_name = "gateway.example"
        "#;
        let config: GatewayConfig = toml::from_str(text).unwrap();
        assert_eq!(config.server.log_level, RequestLogLevel::All);
        assert_eq!(config.server.rewrites[0].to, "/new");
        assert_eq!(config.server.proxy_servers[0].default_policy, DefaultPolicy::InferOrFalse);
        assert_eq!(config.server.proxy_hosts["shop.example"], "http://shop:8000");
        assert_eq!(config.host_servers[0].proxy_name, "gateway.example");
    }

    #[test]
    fn test_legacy_extra_server() {
        let mut server = HostServerConfig {
            extra_server: "http://legacy:80".into(),
            ..Default::default()
        };
        assert_eq!(server.effective_proxy_server(), Some("http://legacy:80"));
        assert_eq!(server.effective_extra_static_folder(), None);

        server.extra_server = "/var/www/extra".into();
        assert_eq!(server.effective_proxy_server(), None);
        assert_eq!(server.effective_extra_static_folder(), Some("/var/www/extra"));

        server.proxy_server = "http://explicit:80".into();
        assert_eq!(server.effective_proxy_server(), Some("http://explicit:80"));
    }
}

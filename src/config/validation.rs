//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate addresses and upstream urls
//! - Check that every handler reference names something
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: GatewayConfig → Result<(), Vec<ValidationError>>
//! - Bad masks are not validation errors; the compiler degrades them with a warning
//! - Unknown handler names are checked against the registry when the gateway
//!   state is built, since the registry is not part of the file

use std::net::SocketAddr;

use url::Url;

use crate::config::schema::{GatewayConfig, HostServerConfig};

/// One semantic problem, located by a dotted field path.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub fn validate_config(config: &GatewayConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "listener.bind_address",
            format!("'{}' is not a socket address", config.listener.bind_address),
        ));
    }
    if config.listener.max_body_size == 0 {
        errors.push(ValidationError::new("listener.max_body_size", "must be greater than 0"));
    }
    if let Some(tls) = &config.listener.tls {
        if tls.cert_path.trim().is_empty() || tls.key_path.trim().is_empty() {
            errors.push(ValidationError::new(
                "listener.tls",
                "cert_path and key_path are both required",
            ));
        }
    }
    if config.timeouts.request_secs == Some(0) {
        errors.push(ValidationError::new("timeouts.request_secs", "must be greater than 0"));
    }
    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    validate_host_server("server", &config.server, &mut errors);
    for (i, server) in config.host_servers.iter().enumerate() {
        validate_host_server(&format!("host_servers[{}]", i), server, &mut errors);
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_upstream(field: &str, value: &str, errors: &mut Vec<ValidationError>) {
    match Url::parse(value.trim()) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {}
        Ok(_) => errors.push(ValidationError::new(
            field,
            format!("'{}' is not an http url", value),
        )),
        Err(e) => errors.push(ValidationError::new(field, format!("'{}': {}", value, e))),
    }
}

fn validate_host_server(prefix: &str, server: &HostServerConfig, errors: &mut Vec<ValidationError>) {
    if let Some(url) = server.effective_proxy_server() {
        validate_upstream(&format!("{}.proxy_server", prefix), url, errors);
    }
    for (host, url) in &server.proxy_hosts {
        validate_upstream(&format!("{}.proxy_hosts.{}", prefix, host), url, errors);
    }
    for (i, entry) in server.proxy_servers.iter().enumerate() {
        validate_upstream(&format!("{}.proxy_servers[{}].url", prefix, i), &entry.url, errors);
    }
    for (i, rule) in server.rewrites.iter().chain(server.server_rewrites.iter()).enumerate() {
        if rule.from.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("{}.rewrites[{}].from", prefix, i),
                "must not be empty",
            ));
        }
    }

    let endpoints = server
        .actions
        .iter()
        .map(|e| ("actions", &e.name, &e.url))
        .chain(server.modules.iter().map(|e| ("modules", &e.name, &e.url)));
    for (kind, name, url) in endpoints {
        if name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.{}", prefix, kind), "name must not be empty"));
        }
        if url.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("{}.{}.{}", prefix, kind, name),
                "url must not be empty",
            ));
        }
    }
    let processors = server
        .processors
        .iter()
        .map(|p| ("processors", p))
        .chain(server.post_processors.iter().map(|p| ("post_processors", p)));
    for (kind, processor) in processors {
        if processor.name.trim().is_empty() {
            errors.push(ValidationError::new(format!("{}.{}", prefix, kind), "name must not be empty"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::{EndpointConfig, ProxyServerConfig};

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&GatewayConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = GatewayConfig::default();
        config.listener.bind_address = "localhost".into();
        config.server.proxy_server = "ftp://files".into();
        config.server.proxy_servers.push(ProxyServerConfig {
            url: "https://".into(),
            ..Default::default()
        });
        config.server.actions.push(EndpointConfig {
            name: "login".into(),
            ..Default::default()
        });

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<&str> = errors.iter().map(|e| e.field.as_str()).collect();
        assert_eq!(
            fields,
            vec![
                "listener.bind_address",
                "server.proxy_server",
                "server.proxy_servers[0].url",
                "server.actions.login",
            ]
        );
    }

    #[test]
    fn test_https_upstreams_accepted() {
        let mut config = GatewayConfig::default();
        config.server.proxy_server = "https://secure.example:8443/base".into();
        config.server.proxy_servers.push(ProxyServerConfig {
            url: "HTTPS://api.example".into(),
            ..Default::default()
        });
        let mut server = HostServerConfig::default();
        server.extra_server = "https://legacy.example".into();
        config.host_servers.push(server);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_host_server_prefix_in_field() {
        let mut config = GatewayConfig::default();
        let mut server = HostServerConfig::default();
        server.proxy_hosts.insert("x.example".into(), "not a url".into());
        config.host_servers.push(server);
        let errors = validate_config(&config).unwrap_err();
        assert_eq!(errors[0].field, "host_servers[0].proxy_hosts.x.example");
    }
}

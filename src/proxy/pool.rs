//! Pooled outbound clients.
//!
//! # Responsibilities
//! - Create one hyper client per distinct `ProxySettings`, lazily
//! - Share it across requests; hyper owns the connection pool itself
//! - Speak plain HTTP or TLS depending on the upstream url scheme
//!
//! # Design Decisions
//! - The cache outlives configuration reloads, so unchanged settings keep
//!   their warm connections
//! - Creation is guarded by the DashMap shard lock only
//! - TLS upstreams are verified against the bundled webpki roots and
//!   negotiate HTTP/1.1 only

use std::time::Duration;

use axum::body::Body;
use dashmap::DashMap;
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::{connect::HttpConnector, Client};
use hyper_util::rt::TokioExecutor;

use crate::config::ProxySettings;
use crate::observability::metrics;

pub type ProxyClient = Client<HttpsConnector<HttpConnector>, Body>;

#[derive(Debug, Default)]
pub struct ClientPool {
    clients: DashMap<ProxySettings, ProxyClient>,
}

impl ClientPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Client for `settings`, created on first use.
    pub fn get(&self, settings: &ProxySettings) -> ProxyClient {
        if let Some(client) = self.clients.get(settings) {
            return client.clone();
        }
        let client = self
            .clients
            .entry(settings.clone())
            .or_insert_with(|| {
                tracing::debug!(settings = ?settings, "Creating upstream client");
                build_client(settings)
            })
            .clone();
        metrics::record_upstream_clients(self.clients.len());
        client
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

/// Idle connections kept per upstream host.
fn idle_per_host(settings: &ProxySettings) -> usize {
    if !settings.keep_alive {
        return 0;
    }
    match settings.max_idle_connections {
        0 => settings.max_idle_connections_per_host,
        global => settings.max_idle_connections_per_host.min(global),
    }
}

fn build_client(settings: &ProxySettings) -> ProxyClient {
    let mut http = HttpConnector::new();
    http.set_nodelay(true);
    http.enforce_http(false);
    let connector = HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .wrap_connector(http);

    let mut builder = Client::builder(TokioExecutor::new());
    builder.pool_max_idle_per_host(idle_per_host(settings));
    if settings.idle_connection_timeout_secs > 0 {
        builder.pool_idle_timeout(Duration::from_secs(settings.idle_connection_timeout_secs));
    }
    builder.build(connector)
}

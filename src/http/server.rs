//! HTTP server setup.
//!
//! # Responsibilities
//! - Create the Axum router with a single catch-all handler
//! - Wire up middleware (timeout, body limit, request id, tracing)
//! - Buffer the request and hand it to the dispatcher
//! - Swap the compiled gateway state when a new configuration arrives
//! - Serve plain TCP or TLS with graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use axum::{
    body::Body,
    extract::State,
    http::{header, Request, StatusCode},
    response::Response,
    routing::any,
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tower_http::{limit::RequestBodyLimitLayer, timeout::TimeoutLayer, trace::TraceLayer};

use crate::config::GatewayConfig;
use crate::gateway::{GatewayError, GatewayState};
use crate::http::dispatch::dispatch;
use crate::http::request::{build_environment, propagate_request_id_layer, set_request_id_layer, RequestContext};
use crate::http::response::error_response;
use crate::observability::metrics;
use crate::proxy::ClientPool;
use crate::registry::Registry;

/// Grace period for in-flight TLS connections after shutdown.
const TLS_DRAIN_SECS: u64 = 10;

/// Application state injected into the handler.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<ArcSwap<GatewayState>>,
    pub pool: Arc<ClientPool>,
    pub is_tls: bool,
}

/// HTTP server for the gateway.
pub struct HttpServer {
    config: GatewayConfig,
    registry: Arc<Registry>,
    gateway: Arc<ArcSwap<GatewayState>>,
    pool: Arc<ClientPool>,
}

impl HttpServer {
    /// Compile `config` against `registry`. Unknown handler names fail here.
    pub fn new(config: GatewayConfig, registry: Arc<Registry>) -> Result<Self, GatewayError> {
        let state = GatewayState::build(&config, &registry)?;
        Ok(Self {
            config,
            registry,
            gateway: Arc::new(ArcSwap::from_pointee(state)),
            pool: Arc::new(ClientPool::new()),
        })
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(&self, is_tls: bool) -> Router {
        let state = AppState {
            gateway: Arc::clone(&self.gateway),
            pool: Arc::clone(&self.pool),
            is_tls,
        };
        let mut router = Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state);
        if let Some(secs) = self.config.timeouts.request_secs {
            router = router.layer(TimeoutLayer::new(Duration::from_secs(secs)));
        }
        router
            .layer(RequestBodyLimitLayer::new(self.config.listener.max_body_size))
            .layer(propagate_request_id_layer())
            .layer(set_request_id_layer())
            .layer(TraceLayer::new_for_http())
    }

    /// Apply configuration updates until the sender goes away.
    fn spawn_reloader(&self, mut config_updates: mpsc::UnboundedReceiver<GatewayConfig>) {
        let gateway = Arc::clone(&self.gateway);
        let registry = Arc::clone(&self.registry);
        tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                match GatewayState::build(&config, &registry) {
                    Ok(state) => {
                        gateway.store(Arc::new(state));
                        tracing::info!("Configuration reloaded");
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "Rejected configuration update, keeping current state");
                    }
                }
            }
        });
    }

    /// Run the server on a plain TCP listener until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        self.spawn_reloader(config_updates);
        let app = self.build_router(false);

        axum::serve(listener, app.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Run the server with TLS until `shutdown` fires.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        config_updates: mpsc::UnboundedReceiver<GatewayConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, "HTTPS server starting");

        self.spawn_reloader(config_updates);
        let app = self.build_router(true);

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Shutdown signal received, draining connections");
            drain.graceful_shutdown(Some(Duration::from_secs(TLS_DRAIN_SECS)));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(app.into_make_service())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }

    /// Get a reference to the config the server was started with.
    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }
}

/// Catch-all handler: buffer the request and run the dispatcher on the
/// current gateway state.
async fn gateway_handler(State(app): State<AppState>, request: Request<Body>) -> Response {
    let start = Instant::now();
    let gateway = app.gateway.load_full();

    let (parts, body) = request.into_parts();
    let method = parts.method.to_string();
    let body = match axum::body::to_bytes(body, gateway.max_body_size).await {
        Ok(bytes) => bytes,
        Err(e) => {
            tracing::warn!(method = %method, path = %parts.uri.path(), error = %e, "Failed to read request body");
            metrics::record_request(&method, 400, "error", start);
            return error_response(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    let raw_host = parts
        .headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.authority().map(|a| a.as_str().to_string()))
        .unwrap_or_default();
    let host = gateway.host_key(&raw_host);
    let server = gateway.server_for(&host);
    let environment = build_environment(&parts.method, &parts.uri, &parts.headers, app.is_tls);

    let mut ctx = RequestContext::new(
        parts.method,
        parts.uri,
        parts.headers,
        body,
        host,
        server,
        Arc::new(environment),
    );
    let response = dispatch(&gateway, &app.pool, &mut ctx).await;

    tracing::debug!(
        request_id = %ctx.request_id,
        handled_by = %ctx.handled_by,
        status = response.status().as_u16(),
        "Request dispatched"
    );
    metrics::record_request(&method, response.status().as_u16(), ctx.handled_by.as_str(), start);
    response
}

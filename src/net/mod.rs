//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! listener.tls configured?
//!     yes → tls.rs (load PEM pair) → axum-server rustls acceptor
//!     no  → tokio TcpListener → axum::serve
//! ```

pub mod tls;

pub use tls::load_tls_config;

//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request id, body buffering)
//!     → request.rs (RequestContext, request variable environment)
//!     → dispatch.rs (branch chain)
//!         → static_files.rs | registered handlers | proxy forwarder
//!     → headers.rs (header policy)
//!     → response.rs (status, headers, body; JSON errors)
//!     → Send to client
//! ```

pub mod dispatch;
pub mod headers;
pub mod request;
pub mod response;
pub mod server;
pub mod static_files;

pub use dispatch::{dispatch, HandledBy};
pub use request::{RequestContext, X_REQUEST_ID};
pub use server::HttpServer;

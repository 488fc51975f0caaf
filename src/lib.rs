//! Embeddable HTTP gateway: mask-routed local handlers, static files and
//! reverse proxying behind one listener.

pub mod condition;
pub mod config;
pub mod gateway;
pub mod http;
pub mod lifecycle;
pub mod net;
pub mod observability;
pub mod proxy;
pub mod registry;
pub mod routing;

pub use config::schema::GatewayConfig;
pub use gateway::{GatewayError, GatewayState};
pub use http::{HttpServer, RequestContext};
pub use lifecycle::Shutdown;
pub use registry::{Registry, RegistryBuilder};

//! Reverse-proxy subsystem.
//!
//! # Data Flow
//! ```text
//! RequestContext (buffered body, original uri)
//!     → rewrite.rs (target url, header filter, Host / Origin / Referer)
//!     → pool.rs (pooled hyper client for the host server's settings)
//!     → upstream
//!     → rewrite.rs (hop-by-hop removal)
//!     → headers policy (proxy or proxy OPTIONS set)
//!     → post-processors (may veto → not found)
//!     → rewrite.rs (Set-Cookie domain)
//!     → RequestContext output
//! ```
//!
//! # Design Decisions
//! - One client per distinct settings value, created lazily, kept across reloads
//! - Failures become JSON error bodies; nothing is retried

pub mod forward;
pub mod pool;
pub mod rewrite;

pub use forward::{forward, ForwardError, ForwardOutcome};
pub use pool::{ClientPool, ProxyClient};

//! # Waypost HTTP Proxy
//!
//! Forwarding half of the gateway:
//! - Static path rewrite table from external mounts to services
//! - Upstream client with a bounded deadline
//! - Header rewriting and outcome classification

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod client;
pub mod proxy;
pub mod rewrite;

pub use client::HttpClient;
pub use proxy::{ForwardRequest, HttpProxy, ProxyConfig, ProxyOutcome};
pub use rewrite::{Route, RouteMatch, RouteTable};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::HttpClient;
    pub use crate::proxy::{ForwardRequest, HttpProxy, ProxyConfig, ProxyOutcome};
    pub use crate::rewrite::{Route, RouteTable};
}

//! # Waypost Core
//!
//! Foundational pieces shared by every Waypost crate:
//! - The gateway-wide [`Error`] taxonomy and its HTTP mapping
//! - JSON response construction
//! - Header names injected by the gateway

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod error;
pub mod response;

pub use error::{Error, Result};
pub use response::{responses, Body, ErrorBody, ResponseBuilder};

// Re-export commonly used HTTP types
pub use bytes::Bytes;
pub use http::{Method, Request, Response, StatusCode};

/// Version stamped into `X-Gateway-Version`
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Header carrying the gateway name on forwarded requests and on responses
pub const X_GATEWAY: &str = "x-gateway";

/// Header carrying the gateway version on responses
pub const X_GATEWAY_VERSION: &str = "x-gateway-version";

/// Re-export commonly used types
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::response::{Body, ErrorBody, ResponseBuilder};
}

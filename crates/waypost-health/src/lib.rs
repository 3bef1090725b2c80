//! # Waypost Health
//!
//! Fault isolation and liveness for registered services:
//! - Failure-counting circuit breaker per destination
//! - HTTP liveness checks
//! - Background prober feeding results into the registry and breakers

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod checker;
pub mod circuit_breaker;
pub mod prober;

pub use checker::{HealthCheck, HealthCheckResult, HealthStatus, HttpHealthCheck};
pub use circuit_breaker::{
    CallPermit, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState,
};
pub use prober::{HealthProber, ProbeReport, ProberConfig};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::checker::{HealthCheck, HealthCheckResult, HealthStatus, HttpHealthCheck};
    pub use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
    pub use crate::prober::{HealthProber, ProberConfig};
}

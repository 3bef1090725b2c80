//! Configuration types

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Gateway listener and forwarding
    pub gateway: GatewayConfig,

    /// Shared registry store
    pub registry: RegistryConfig,

    /// Health prober
    pub health: HealthConfig,

    /// Circuit breaker
    pub circuit_breaker: CircuitBreakerConfig,

    /// External mounts
    pub routes: Vec<RouteConfig>,

    /// Observability
    pub observability: ObservabilityConfig,
}

/// Gateway configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Listen address
    pub listen: SocketAddr,

    /// Name reported in the `X-Gateway` header and JSON bodies
    pub name: String,

    /// Deadline for a proxied request
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// Deadline for resolving a service in the registry
    #[serde(with = "humantime_serde")]
    pub discover_timeout: Duration,

    /// Graceful shutdown timeout (wait for in-flight requests)
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,

    /// Max request body size (bytes)
    pub max_body_size: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            listen: SocketAddr::from(([0, 0, 0, 0], 3000)),
            name: "api-gateway".to_string(),
            request_timeout: Duration::from_secs(20),
            discover_timeout: Duration::from_secs(2),
            shutdown_timeout: Duration::from_secs(10),
            max_body_size: 10 * 1024 * 1024,
        }
    }
}

/// Registry store configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct RegistryConfig {
    /// Registry document shared by all processes
    pub path: PathBuf,

    /// Records unchecked for longer than this are removed
    #[serde(with = "humantime_serde")]
    pub inactive_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("services-registry.json"),
            inactive_timeout: Duration::from_secs(300),
        }
    }
}

/// Health prober configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    /// Run the background prober
    pub enabled: bool,

    /// Time between probe rounds
    #[serde(with = "humantime_serde")]
    pub interval: Duration,

    /// Deadline for one probe
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,

    /// Liveness path on every service
    pub path: String,

    /// Delay before the first round
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: Duration::from_secs(30),
            timeout: Duration::from_secs(5),
            path: "/health".to_string(),
            initial_delay: Duration::from_secs(3),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open a breaker
    pub failure_threshold: u32,

    /// Open period before a trial request
    #[serde(with = "humantime_serde")]
    pub cooldown: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            cooldown: Duration::from_secs(30),
        }
    }
}

/// One external mount
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RouteConfig {
    /// External path prefix
    pub prefix: String,

    /// Logical service name
    pub service: String,

    /// Internal prefix substituted for `prefix` (defaults to `/`)
    #[serde(default = "default_rewrite")]
    pub rewrite: String,
}

fn default_rewrite() -> String {
    "/".to_string()
}

impl RouteConfig {
    /// Create a new mount
    pub fn new(prefix: &str, service: &str, rewrite: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
            service: service.to_string(),
            rewrite: rewrite.to_string(),
        }
    }
}

/// Observability configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level
    pub level: String,

    /// Log format (json, text)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

impl Config {
    /// Configured mounts, or the built-in table when none are given
    pub fn effective_routes(&self) -> Vec<RouteConfig> {
        if self.routes.is_empty() {
            default_routes()
        } else {
            self.routes.clone()
        }
    }
}

/// Built-in mounts for the user, item and list services
pub fn default_routes() -> Vec<RouteConfig> {
    vec![
        RouteConfig::new("/api/auth", "user-service", "/auth"),
        RouteConfig::new("/api/users", "user-service", "/users"),
        RouteConfig::new("/api/items", "item-service", "/items"),
        RouteConfig::new("/api/lists", "list-service", "/lists"),
    ]
}

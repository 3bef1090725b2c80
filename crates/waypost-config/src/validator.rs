//! Configuration validation

use crate::Config;
use std::collections::HashSet;
use waypost_core::{Error, Result};

/// Validate configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_gateway(config)?;
    validate_health(config)?;
    validate_circuit_breaker(config)?;
    validate_routes(config)?;

    Ok(())
}

fn validate_gateway(config: &Config) -> Result<()> {
    let gateway = &config.gateway;

    if gateway.request_timeout.is_zero() {
        return Err(Error::Config("request_timeout must be > 0".to_string()));
    }

    if gateway.request_timeout.as_secs() > 300 {
        tracing::warn!("request_timeout is very high (>5 minutes)");
    }

    if gateway.discover_timeout.is_zero() {
        return Err(Error::Config("discover_timeout must be > 0".to_string()));
    }

    if gateway.max_body_size == 0 {
        return Err(Error::Config("max_body_size must be > 0".to_string()));
    }

    if gateway.name.trim().is_empty() {
        return Err(Error::Config("gateway name cannot be empty".to_string()));
    }

    Ok(())
}

fn validate_health(config: &Config) -> Result<()> {
    let health = &config.health;

    if health.interval.is_zero() {
        return Err(Error::Config("health interval must be > 0".to_string()));
    }

    if health.timeout.is_zero() {
        return Err(Error::Config("health timeout must be > 0".to_string()));
    }

    if !health.path.starts_with('/') {
        return Err(Error::Config("health path must start with '/'".to_string()));
    }

    if health.timeout >= health.interval {
        tracing::warn!(
            timeout = ?health.timeout,
            interval = ?health.interval,
            "Health timeout is not shorter than the probe interval"
        );
    }

    if config.registry.inactive_timeout.is_zero() {
        return Err(Error::Config("registry inactive_timeout must be > 0".to_string()));
    }

    Ok(())
}

fn validate_circuit_breaker(config: &Config) -> Result<()> {
    if config.circuit_breaker.failure_threshold == 0 {
        return Err(Error::Config(
            "circuit_breaker failure_threshold must be > 0".to_string(),
        ));
    }

    if config.circuit_breaker.cooldown.is_zero() {
        return Err(Error::Config("circuit_breaker cooldown must be > 0".to_string()));
    }

    Ok(())
}

fn validate_routes(config: &Config) -> Result<()> {
    let mut seen = HashSet::new();

    for route in &config.routes {
        if !route.prefix.starts_with('/') {
            return Err(Error::Config(format!(
                "route prefix '{}' must start with '/'",
                route.prefix
            )));
        }

        if route.service.trim().is_empty() {
            return Err(Error::Config(format!(
                "route '{}' has an empty service name",
                route.prefix
            )));
        }

        let normalized = route.prefix.trim_end_matches('/');
        if !seen.insert(normalized.to_string()) {
            return Err(Error::Config(format!(
                "duplicate route prefix '{}'",
                route.prefix
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::*;
    use std::time::Duration;

    #[test]
    fn test_valid_default_config() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_zero_timeout() {
        let mut config = Config::default();
        config.gateway.request_timeout = Duration::ZERO;

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_zero_threshold() {
        let mut config = Config::default();
        config.circuit_breaker.failure_threshold = 0;

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_timeout_longer_than_interval_only_warns() {
        let mut config = Config::default();
        config.health.interval = Duration::from_secs(3);
        config.health.timeout = Duration::from_secs(5);

        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_route_prefix_must_be_absolute() {
        let mut config = Config::default();
        config.routes.push(RouteConfig::new("api/items", "item-service", "/items"));

        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_duplicate_prefix() {
        let mut config = Config::default();
        config.routes = vec![
            RouteConfig::new("/api/items", "item-service", "/items"),
            RouteConfig::new("/api/items/", "other-service", "/"),
        ];

        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn test_empty_service() {
        let mut config = Config::default();
        config.routes.push(RouteConfig::new("/api/x", " ", "/"));

        assert!(validate_config(&config).is_err());
    }
}

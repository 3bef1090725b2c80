//! Configuration loading

use crate::{Config, ConfigFormat};
use regex::Regex;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;
use waypost_core::{Error, Result};

/// Load configuration from a file
pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Config> {
    let path = path.as_ref();

    let content = fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read config file: {e}")))?;

    let format = ConfigFormat::from_path(path)?;

    load_from_str(&content, format)
}

/// Expand environment variables in configuration string
/// Supports syntax: ${VAR} and ${VAR:-default}
fn expand_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(:-([^}]*))?\}")
        .map_err(|e| Error::Config(format!("Invalid regex: {e}")))?;

    let mut result = String::with_capacity(content.len());
    let mut last_match = 0;

    for cap in re.captures_iter(content) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };
        let var_name = var_name.as_str();
        let default_value = cap.get(3).map(|m| m.as_str());

        let value = match (env::var(var_name), default_value) {
            (Ok(val), _) => val,
            (Err(_), Some(default)) => default.to_string(),
            (Err(_), None) => {
                return Err(Error::Config(format!(
                    "Environment variable '{var_name}' not set and no default provided"
                )));
            }
        };

        result.push_str(&content[last_match..full_match.start()]);
        result.push_str(&value);
        last_match = full_match.end();
    }

    result.push_str(&content[last_match..]);

    Ok(result)
}

/// Load configuration from a string
pub fn load_from_str(content: &str, format: ConfigFormat) -> Result<Config> {
    let expanded_content = expand_env_vars(content)?;

    // An empty document means "all defaults"
    if expanded_content.trim().is_empty() {
        return Ok(Config::default());
    }

    let config = match format {
        ConfigFormat::Yaml => serde_yaml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse YAML: {e}")))?,
        ConfigFormat::Toml => toml::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse TOML: {e}")))?,
        ConfigFormat::Json => serde_json::from_str(&expanded_content)
            .map_err(|e| Error::Config(format!("Failed to parse JSON: {e}")))?,
    };

    Ok(config)
}

fn parse_duration(var: &str, value: &str) -> Result<Duration> {
    humantime_serde::deserialize(serde_json::Value::String(value.to_string()))
        .map_err(|e| Error::Config(format!("{var}: invalid duration '{value}': {e}")))
}

/// Apply environment overrides using `lookup` to read variables.
///
/// Recognised: `PORT`, `WAYPOST_LISTEN`, `WAYPOST_HEALTH_INTERVAL`,
/// `WAYPOST_BREAKER_THRESHOLD`, `WAYPOST_BREAKER_COOLDOWN`,
/// `WAYPOST_REGISTRY_PATH`.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(listen) = lookup("WAYPOST_LISTEN") {
        config.gateway.listen = listen
            .parse::<SocketAddr>()
            .map_err(|e| Error::Config(format!("WAYPOST_LISTEN: invalid address '{listen}': {e}")))?;
    }

    if let Some(port) = lookup("PORT") {
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|e| Error::Config(format!("PORT: invalid port '{port}': {e}")))?;
        config.gateway.listen.set_port(port);
    }

    if let Some(interval) = lookup("WAYPOST_HEALTH_INTERVAL") {
        config.health.interval = parse_duration("WAYPOST_HEALTH_INTERVAL", &interval)?;
    }

    if let Some(threshold) = lookup("WAYPOST_BREAKER_THRESHOLD") {
        config.circuit_breaker.failure_threshold = threshold.trim().parse().map_err(|e| {
            Error::Config(format!("WAYPOST_BREAKER_THRESHOLD: invalid count '{threshold}': {e}"))
        })?;
    }

    if let Some(cooldown) = lookup("WAYPOST_BREAKER_COOLDOWN") {
        config.circuit_breaker.cooldown = parse_duration("WAYPOST_BREAKER_COOLDOWN", &cooldown)?;
    }

    if let Some(path) = lookup("WAYPOST_REGISTRY_PATH") {
        config.registry.path = PathBuf::from(path);
    }

    debug!(listen = %config.gateway.listen, "Environment overrides applied");
    Ok(())
}

/// Load, apply environment overrides and validate.
///
/// Without a path the defaults are used.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(path) => load_from_file(path)?,
        None => Config::default(),
    };

    apply_env_overrides(&mut config, |name| env::var(name).ok())?;

    crate::validator::validate_config(&config)?;

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const YAML_CONFIG: &str = r#"
gateway:
  listen: "127.0.0.1:8080"
  request_timeout: "15s"

registry:
  path: "/var/run/waypost/registry.json"

health:
  interval: "3s"

circuit_breaker:
  failure_threshold: 5
  cooldown: "1m"

routes:
  - prefix: "/api/tasks"
    service: "task-service"
    rewrite: "/tasks"

observability:
  logging:
    level: "debug"
    format: "json"
"#;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_load_yaml() {
        let config = load_from_str(YAML_CONFIG, ConfigFormat::Yaml).unwrap();

        assert_eq!(config.gateway.listen.to_string(), "127.0.0.1:8080");
        assert_eq!(config.gateway.request_timeout, Duration::from_secs(15));
        assert_eq!(config.gateway.discover_timeout, Duration::from_secs(2));
        assert_eq!(config.health.interval, Duration::from_secs(3));
        assert_eq!(config.health.timeout, Duration::from_secs(5));
        assert_eq!(config.circuit_breaker.cooldown, Duration::from_secs(60));
        assert_eq!(config.routes[0].service, "task-service");
        assert_eq!(config.observability.logging.format, "json");
    }

    #[test]
    fn test_load_toml() {
        let toml = r#"
[gateway]
listen = "0.0.0.0:4000"

[circuit_breaker]
failure_threshold = 2
"#;
        let config = load_from_str(toml, ConfigFormat::Toml).unwrap();
        assert_eq!(config.gateway.listen.port(), 4000);
        assert_eq!(config.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.circuit_breaker.cooldown, Duration::from_secs(30));
    }

    #[test]
    fn test_empty_document_is_default() {
        let config = load_from_str("  \n", ConfigFormat::Yaml).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_invalid_yaml() {
        let result = load_from_str("gateway: [yaml", ConfigFormat::Yaml);
        assert!(result.is_err());
    }

    #[test]
    fn test_env_var_with_default() {
        env::remove_var("WAYPOST_TEST_UNDEFINED");

        let config = load_from_str(
            "gateway:\n  listen: \"${WAYPOST_TEST_UNDEFINED:-127.0.0.1:9000}\"\n",
            ConfigFormat::Yaml,
        )
        .unwrap();
        assert_eq!(config.gateway.listen.to_string(), "127.0.0.1:9000");
    }

    #[test]
    fn test_env_var_substitution() {
        env::set_var("WAYPOST_TEST_REGISTRY", "/tmp/shared.json");

        let config = load_from_str(
            "registry:\n  path: \"${WAYPOST_TEST_REGISTRY}\"\n",
            ConfigFormat::Yaml,
        )
        .unwrap();
        assert_eq!(config.registry.path, PathBuf::from("/tmp/shared.json"));

        env::remove_var("WAYPOST_TEST_REGISTRY");
    }

    #[test]
    fn test_missing_env_var_no_default() {
        env::remove_var("WAYPOST_TEST_MISSING");

        let result = load_from_str(
            "gateway:\n  name: \"${WAYPOST_TEST_MISSING}\"\n",
            ConfigFormat::Yaml,
        );
        assert!(result.unwrap_err().to_string().contains("WAYPOST_TEST_MISSING"));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            vars(&[
                ("PORT", "8088"),
                ("WAYPOST_HEALTH_INTERVAL", "3s"),
                ("WAYPOST_BREAKER_THRESHOLD", "5"),
                ("WAYPOST_BREAKER_COOLDOWN", "500ms"),
                ("WAYPOST_REGISTRY_PATH", "/srv/registry.json"),
            ]),
        )
        .unwrap();

        assert_eq!(config.gateway.listen.to_string(), "0.0.0.0:8088");
        assert_eq!(config.health.interval, Duration::from_secs(3));
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.circuit_breaker.cooldown, Duration::from_millis(500));
        assert_eq!(config.registry.path, PathBuf::from("/srv/registry.json"));
    }

    #[test]
    fn test_port_applies_after_listen() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            vars(&[("WAYPOST_LISTEN", "127.0.0.1:1000"), ("PORT", "2000")]),
        )
        .unwrap();
        assert_eq!(config.gateway.listen.to_string(), "127.0.0.1:2000");
    }

    #[test]
    fn test_bad_override() {
        let mut config = Config::default();
        let err = apply_env_overrides(&mut config, vars(&[("WAYPOST_BREAKER_COOLDOWN", "soon")]))
            .unwrap_err();
        assert!(err.to_string().contains("WAYPOST_BREAKER_COOLDOWN"));

        let err = apply_env_overrides(&mut config, vars(&[("PORT", "http")])).unwrap_err();
        assert!(err.to_string().contains("PORT"));
    }

    #[test]
    fn test_load_config_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("waypost.yaml");
        fs::write(&path, YAML_CONFIG).unwrap();

        let config = load_from_file(&path).unwrap();
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
    }
}

//! Error types for the Waypost gateway

/// Result type alias using [`Error`]
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Main error type for Waypost
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Name is not present in the registry
    #[error("Service not found: {name}")]
    ServiceNotFound {
        /// Logical service name that was looked up
        name: String,
        /// Names known to the registry at lookup time
        known: Vec<String>,
    },

    /// Name is registered but marked unhealthy
    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Circuit breaker is refusing traffic to the service
    #[error("Circuit breaker is open for service '{0}'")]
    CircuitOpen(String),

    /// Upstream could not be reached
    #[error("Failed to connect to service '{service}': {message}")]
    UpstreamConnection {
        /// Logical service name
        service: String,
        /// Underlying transport error
        message: String,
    },

    /// Upstream did not answer within the deadline
    #[error("Request to service '{0}' timed out")]
    UpstreamTimeout(String),

    /// Registry persistence failure
    #[error("Registry store error: {0}")]
    Store(String),

    /// Invalid HTTP request
    #[error("Invalid HTTP request: {0}")]
    InvalidRequest(String),

    /// Inbound body exceeded the configured limit
    #[error("Request body exceeds {0} bytes")]
    PayloadTooLarge(usize),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Runtime error
    #[error("Runtime error: {0}")]
    Runtime(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP protocol error
    #[error("HTTP error: {0}")]
    Hyper(#[from] hyper::Error),

    /// HTTP builder error
    #[error("HTTP error: {0}")]
    Http(#[from] http::Error),

    /// Internal error (should not happen in production)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Convert error to HTTP status code
    pub fn to_status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::ServiceNotFound { .. }
            | Error::ServiceUnavailable(_)
            | Error::CircuitOpen(_)
            | Error::UpstreamConnection { .. }
            | Error::UpstreamTimeout(_) => StatusCode::SERVICE_UNAVAILABLE,
            Error::InvalidRequest(_) | Error::Hyper(_) => StatusCode::BAD_REQUEST,
            Error::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable code for JSON error bodies
    pub fn code(&self) -> &'static str {
        match self {
            Error::ServiceNotFound { .. } => "SERVICE_NOT_FOUND",
            Error::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            Error::CircuitOpen(_) => "CIRCUIT_OPEN",
            Error::UpstreamConnection { .. } => "ECONNREFUSED",
            Error::UpstreamTimeout(_) => "ETIMEDOUT",
            Error::InvalidRequest(_) | Error::Hyper(_) => "INVALID_REQUEST",
            Error::PayloadTooLarge(_) => "PAYLOAD_TOO_LARGE",
            Error::Store(_) => "REGISTRY_STORE_ERROR",
            Error::Config(_) => "CONFIG_ERROR",
            _ => "INTERNAL_ERROR",
        }
    }

    /// Logical service name the error refers to, if any
    pub fn service(&self) -> Option<&str> {
        match self {
            Error::ServiceNotFound { name, .. } => Some(name),
            Error::ServiceUnavailable(name)
            | Error::CircuitOpen(name)
            | Error::UpstreamTimeout(name) => Some(name),
            Error::UpstreamConnection { service, .. } => Some(service),
            _ => None,
        }
    }

    /// Create a not-found error carrying the currently known names
    pub fn not_found(name: impl Into<String>, known: Vec<String>) -> Self {
        Error::ServiceNotFound {
            name: name.into(),
            known,
        }
    }

    /// Whether the caller should treat this as a discovery miss
    pub fn is_discovery_failure(&self) -> bool {
        matches!(
            self,
            Error::ServiceNotFound { .. } | Error::ServiceUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::StatusCode;

    #[test]
    fn test_error_status_codes() {
        assert_eq!(
            Error::not_found("item-service", vec![]).to_status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::CircuitOpen("item-service".to_string()).to_status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::UpstreamTimeout("item-service".to_string()).to_status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            Error::Internal("boom".to_string()).to_status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::PayloadTooLarge(10).to_status_code(),
            StatusCode::PAYLOAD_TOO_LARGE
        );
    }

    #[test]
    fn test_error_codes() {
        let err = Error::UpstreamConnection {
            service: "list-service".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(err.code(), "ECONNREFUSED");
        assert_eq!(err.service(), Some("list-service"));
        assert!(err.to_string().contains("list-service"));

        assert_eq!(Error::Store("disk full".into()).code(), "REGISTRY_STORE_ERROR");
        assert_eq!(Error::Store("disk full".into()).service(), None);
    }

    #[test]
    fn test_discovery_failure() {
        assert!(Error::not_found("a", vec!["b".into()]).is_discovery_failure());
        assert!(Error::ServiceUnavailable("a".into()).is_discovery_failure());
        assert!(!Error::CircuitOpen("a".into()).is_discovery_failure());
    }
}

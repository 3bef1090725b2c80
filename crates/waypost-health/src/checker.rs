//! Liveness probes against registered services

use async_trait::async_trait;
use bytes::Bytes;
use http::Uri;
use http_body_util::{BodyExt, Empty};
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::{debug, warn};

/// Health check status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Service answered with a 2xx status
    Healthy,
    /// Service failed, timed out or answered non-2xx
    Unhealthy,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check result
#[derive(Debug, Clone)]
pub struct HealthCheckResult {
    /// Health status
    pub status: HealthStatus,
    /// Time taken for the check
    pub duration: Duration,
    /// Error description when unhealthy
    pub message: Option<String>,
    /// Response body, when the service returned JSON
    pub body: Option<serde_json::Value>,
}

impl HealthCheckResult {
    /// Create a healthy result
    pub fn healthy(duration: Duration) -> Self {
        Self {
            status: HealthStatus::Healthy,
            duration,
            message: None,
            body: None,
        }
    }

    /// Create an unhealthy result with a message
    pub fn unhealthy(duration: Duration, message: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Unhealthy,
            duration,
            message: Some(message.into()),
            body: None,
        }
    }

    /// Attach a decoded response body
    pub fn with_body(mut self, body: Option<serde_json::Value>) -> Self {
        self.body = body;
        self
    }

    /// Whether the probe succeeded
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Trait for performing health checks
#[async_trait]
pub trait HealthCheck: Send + Sync + fmt::Debug {
    /// Probe the service reachable at `base_url`
    async fn check(&self, base_url: &str) -> HealthCheckResult;
}

/// HTTP health checker
#[derive(Debug, Clone)]
pub struct HttpHealthCheck {
    path: String,
    timeout_duration: Duration,
    client: Client<HttpConnector, Empty<Bytes>>,
}

impl Default for HttpHealthCheck {
    fn default() -> Self {
        Self::new("/health", Duration::from_secs(5))
    }
}

impl HttpHealthCheck {
    /// Create a checker that issues `GET {base_url}{path}`
    pub fn new(path: impl Into<String>, timeout_duration: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new())
            .http1_title_case_headers(true)
            .build_http();

        Self {
            path: path.into(),
            timeout_duration,
            client,
        }
    }

    /// Probe URL for `base_url`
    pub fn url_for(&self, base_url: &str) -> String {
        let base = base_url.trim_end_matches('/');
        if self.path.starts_with('/') {
            format!("{}{}", base, self.path)
        } else {
            format!("{}/{}", base, self.path)
        }
    }

    async fn probe(&self, uri: Uri) -> Result<(http::StatusCode, Bytes), String> {
        let req = http::Request::get(uri)
            .header(http::header::USER_AGENT, "waypost-health")
            .body(Empty::<Bytes>::new())
            .map_err(|e| format!("Failed to build request: {}", e))?;

        let response = self
            .client
            .request(req)
            .await
            .map_err(|e| format!("Request error: {}", e))?;
        let status = response.status();
        let body = response
            .into_body()
            .collect()
            .await
            .map_err(|e| format!("Body error: {}", e))?
            .to_bytes();

        Ok((status, body))
    }
}

#[async_trait]
impl HealthCheck for HttpHealthCheck {
    async fn check(&self, base_url: &str) -> HealthCheckResult {
        let start = Instant::now();
        let url = self.url_for(base_url);

        debug!(url = %url, "Performing HTTP health check");

        let uri: Uri = match url.parse() {
            Ok(u) => u,
            Err(e) => {
                return HealthCheckResult::unhealthy(
                    start.elapsed(),
                    format!("Invalid URL: {}", e),
                );
            }
        };

        match timeout(self.timeout_duration, self.probe(uri)).await {
            Ok(Ok((status, body))) => {
                let duration = start.elapsed();
                let json = serde_json::from_slice(&body).ok();

                if status.is_success() {
                    debug!(url = %url, status = %status, "Health check passed");
                    HealthCheckResult::healthy(duration).with_body(json)
                } else {
                    warn!(url = %url, status = %status, "Health check failed: unexpected status");
                    HealthCheckResult::unhealthy(
                        duration,
                        format!("Unexpected status code: {}", status),
                    )
                    .with_body(json)
                }
            }
            Ok(Err(e)) => {
                warn!(url = %url, error = %e, "Health check failed: request error");
                HealthCheckResult::unhealthy(start.elapsed(), e)
            }
            Err(_) => {
                warn!(url = %url, "Health check failed: timeout");
                HealthCheckResult::unhealthy(start.elapsed(), "Timeout")
            }
        }
    }
}

//! HTTP client for making requests to upstream services

use bytes::Bytes;
use http::{Request, Response};
use http_body_util::BodyExt;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::debug;
use waypost_core::{Body, Error, Result};

/// HTTP client for upstream requests
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client<HttpConnector, Body>,
    timeout: Duration,
}

impl HttpClient {
    /// Create a new HTTP client with the default 20s deadline
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(20))
    }

    /// Create a new HTTP client with custom timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        let mut connector = HttpConnector::new();
        connector.set_connect_timeout(Some(timeout));

        let client = Client::builder(TokioExecutor::new()).build(connector);

        Self { client, timeout }
    }

    /// Send a request on behalf of `service` and collect the response body.
    ///
    /// The deadline covers the whole exchange, headers and body alike.
    /// Unreachable upstreams map to [`Error::UpstreamConnection`], a missed
    /// deadline to [`Error::UpstreamTimeout`], anything else to
    /// [`Error::Internal`].
    pub async fn send(&self, req: Request<Body>, service: &str) -> Result<Response<Bytes>> {
        let exchange = async {
            let response = self
                .client
                .request(req)
                .await
                .map_err(|e| request_error(e, service))?;

            let (parts, body) = response.into_parts();
            let bytes = body
                .collect()
                .await
                .map_err(|e| Error::UpstreamConnection {
                    service: service.to_string(),
                    message: e.to_string(),
                })?
                .to_bytes();

            Ok(Response::from_parts(parts, bytes))
        };

        match tokio::time::timeout(self.timeout, exchange).await {
            Ok(result) => result,
            Err(_) => {
                debug!(service = %service, timeout = ?self.timeout, "Upstream timed out");
                Err(Error::UpstreamTimeout(service.to_string()))
            }
        }
    }

    /// Get the configured timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

fn request_error(e: hyper_util::client::legacy::Error, service: &str) -> Error {
    if e.is_connect() {
        debug!(service = %service, error = %e, "Upstream connection failed");
        Error::UpstreamConnection {
            service: service.to_string(),
            message: e.to_string(),
        }
    } else {
        Error::Internal(format!("request to service '{}' failed: {}", service, e))
    }
}

impl Default for HttpClient {
    fn default() -> Self {
        Self::new()
    }
}

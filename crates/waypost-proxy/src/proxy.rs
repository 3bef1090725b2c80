//! HTTP proxy implementation

use crate::client::HttpClient;
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Method, Request, Response, StatusCode, Uri};
use http_body_util::Full;
use std::net::IpAddr;
use tracing::debug;
use waypost_core::{Body, Error, Result, X_GATEWAY};

/// Proxy configuration
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Value of the `X-Gateway` header injected upstream
    pub gateway_name: String,

    /// Value of `X-Forwarded-Proto`
    pub forwarded_proto: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            gateway_name: "api-gateway".to_string(),
            forwarded_proto: "http".to_string(),
        }
    }
}

/// A request resolved to a concrete upstream
#[derive(Debug, Clone)]
pub struct ForwardRequest {
    /// Logical service name
    pub service: String,
    /// Service origin from the registry
    pub base_url: String,
    /// Rewritten path plus the inbound query string
    pub path_and_query: String,
    /// Inbound method
    pub method: Method,
    /// Inbound headers
    pub headers: HeaderMap,
    /// Inbound body
    pub body: Bytes,
    /// Address of the inbound client
    pub client_ip: Option<IpAddr>,
}

/// What came back from the upstream
#[derive(Debug)]
pub enum ProxyOutcome {
    /// 1xx, 2xx or 3xx
    Success(Response<Body>),
    /// Upstream answered with 4xx or 5xx; relayed verbatim
    UpstreamError(Response<Body>),
}

impl ProxyOutcome {
    fn classify(response: Response<Body>) -> Self {
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            ProxyOutcome::UpstreamError(response)
        } else {
            ProxyOutcome::Success(response)
        }
    }

    /// Whether the breaker should treat this as a success
    pub fn is_success(&self) -> bool {
        matches!(self, ProxyOutcome::Success(_))
    }

    /// Upstream status code
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyOutcome::Success(r) | ProxyOutcome::UpstreamError(r) => r.status(),
        }
    }

    /// Response to relay to the client
    pub fn into_response(self) -> Response<Body> {
        match self {
            ProxyOutcome::Success(r) | ProxyOutcome::UpstreamError(r) => r,
        }
    }
}

/// Headers that only describe a single connection
pub fn is_hop_by_hop(name: &HeaderName) -> bool {
    matches!(
        name.as_str(),
        "connection"
            | "keep-alive"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "transfer-encoding"
            | "upgrade"
    )
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    // Headers listed in `Connection` are connection-scoped too
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in listed {
        headers.remove(name);
    }

    let hop: Vec<HeaderName> = headers
        .keys()
        .filter(|name| is_hop_by_hop(name))
        .cloned()
        .collect();
    for name in hop {
        headers.remove(name);
    }
}

fn carries_body(method: &Method) -> bool {
    matches!(*method, Method::POST | Method::PUT | Method::PATCH)
}

/// HTTP proxy
#[derive(Debug, Clone)]
pub struct HttpProxy {
    client: HttpClient,
    config: ProxyConfig,
}

impl HttpProxy {
    /// Create a new HTTP proxy
    pub fn new(client: HttpClient, config: ProxyConfig) -> Self {
        Self { client, config }
    }

    /// Forward `req` and collect the upstream response
    pub async fn forward(&self, req: ForwardRequest) -> Result<ProxyOutcome> {
        let uri = Self::build_upstream_uri(&req.base_url, &req.path_and_query)?;
        let mut headers = req.headers;
        self.transform_headers(&mut headers, req.client_ip)?;

        let body = if carries_body(&req.method) {
            req.body
        } else {
            Bytes::new()
        };

        debug!(
            service = %req.service,
            method = %req.method,
            uri = %uri,
            "Forwarding request"
        );

        let mut upstream = Request::builder()
            .method(req.method)
            .uri(uri)
            .body(Full::new(body))?;
        *upstream.headers_mut() = headers;

        let response = self.client.send(upstream, &req.service).await?;
        let (mut parts, body_bytes) = response.into_parts();

        strip_hop_by_hop(&mut parts.headers);
        parts.headers.remove(header::CONTENT_LENGTH);

        Ok(ProxyOutcome::classify(Response::from_parts(
            parts,
            Full::new(body_bytes),
        )))
    }

    /// Join a service origin and a rewritten path
    pub fn build_upstream_uri(base_url: &str, path_and_query: &str) -> Result<Uri> {
        let base = base_url.trim_end_matches('/');
        let path = if path_and_query.starts_with('/') {
            path_and_query.to_string()
        } else {
            format!("/{}", path_and_query)
        };

        format!("{}{}", base, path)
            .parse()
            .map_err(|e| Error::Internal(format!("Invalid upstream URI '{}': {}", base_url, e)))
    }

    /// Rewrite inbound headers for the upstream hop
    pub fn transform_headers(&self, headers: &mut HeaderMap, client_ip: Option<IpAddr>) -> Result<()> {
        strip_hop_by_hop(headers);
        headers.remove(header::HOST);
        headers.remove(header::CONTENT_LENGTH);

        let forwarded_for = HeaderName::from_static("x-forwarded-for");
        if let Some(ip) = client_ip {
            let chain = match headers.get(&forwarded_for).and_then(|v| v.to_str().ok()) {
                Some(existing) if !existing.trim().is_empty() => format!("{}, {}", existing, ip),
                _ => ip.to_string(),
            };
            headers.insert(
                forwarded_for,
                HeaderValue::from_str(&chain)
                    .map_err(|e| Error::InvalidRequest(format!("Invalid forwarded chain: {e}")))?,
            );
        }

        headers.insert(
            HeaderName::from_static("x-forwarded-proto"),
            HeaderValue::from_str(&self.config.forwarded_proto)
                .map_err(|e| Error::Config(format!("Invalid forwarded proto: {e}")))?,
        );
        headers.insert(
            HeaderName::from_static(X_GATEWAY),
            HeaderValue::from_str(&self.config.gateway_name)
                .map_err(|e| Error::Config(format!("Invalid gateway name: {e}")))?,
        );

        Ok(())
    }
}

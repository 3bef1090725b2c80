//! HTTP request handler

use crate::aggregate::Aggregator;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, AUTHORIZATION};
use http::{Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use serde_json::json;
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};
use waypost_core::{
    responses, Body, Error, ErrorBody, ResponseBuilder, Result, VERSION, X_GATEWAY,
    X_GATEWAY_VERSION,
};
use waypost_health::{CallPermit, CircuitBreaker, HealthCheck, HealthStatus};
use waypost_proxy::{ForwardRequest, HttpProxy, RouteTable};
use waypost_registry::ServiceRegistry;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Handler settings taken from the gateway configuration
#[derive(Debug, Clone)]
pub struct HandlerSettings {
    /// Gateway name reported in headers and bodies
    pub gateway_name: String,
    /// Deadline for a registry lookup
    pub discover_timeout: Duration,
    /// Largest accepted inbound body
    pub max_body_size: usize,
    /// Per-service deadline of the dashboard and search fan-outs
    pub aggregate_timeout: Duration,
}

impl Default for HandlerSettings {
    fn default() -> Self {
        Self {
            gateway_name: "api-gateway".to_string(),
            discover_timeout: Duration::from_secs(2),
            max_body_size: 10 * 1024 * 1024,
            aggregate_timeout: Duration::from_secs(5),
        }
    }
}

/// HTTP request handler
#[derive(Clone)]
pub struct RequestHandler {
    registry: Arc<ServiceRegistry>,
    breaker: CircuitBreaker,
    proxy: Arc<HttpProxy>,
    routes: Arc<RouteTable>,
    checker: Arc<dyn HealthCheck>,
    aggregator: Aggregator,
    settings: Arc<HandlerSettings>,
    request_count: Arc<AtomicUsize>,
    started_at: Instant,
}

impl std::fmt::Debug for RequestHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandler")
            .field("settings", &self.settings)
            .field("routes", &self.routes.routes().len())
            .field("request_count", &self.request_count)
            .finish()
    }
}

impl RequestHandler {
    /// Create a new request handler
    pub fn new(
        registry: Arc<ServiceRegistry>,
        breaker: CircuitBreaker,
        proxy: Arc<HttpProxy>,
        routes: Arc<RouteTable>,
        checker: Arc<dyn HealthCheck>,
        settings: HandlerSettings,
    ) -> Self {
        let aggregator = Aggregator::new(Arc::clone(&registry), settings.aggregate_timeout);
        Self {
            registry,
            breaker,
            proxy,
            routes,
            checker,
            aggregator,
            settings: Arc::new(settings),
            request_count: Arc::new(AtomicUsize::new(0)),
            started_at: Instant::now(),
        }
    }

    /// Requests handled so far
    pub fn request_count(&self) -> usize {
        self.request_count.load(Ordering::Relaxed)
    }

    /// Handle one inbound request; every outcome becomes a response
    pub async fn handle<B>(&self, req: Request<B>, client: Option<SocketAddr>) -> Response<Body>
    where
        B: hyper::body::Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        self.request_count.fetch_add(1, Ordering::Relaxed);

        let method = req.method().clone();
        let path = req.uri().path().to_string();
        let start = Instant::now();

        debug!(method = %method, path = %path, "Handling request");

        let mut response = match self.dispatch(req, client).await {
            Ok(response) => response,
            Err(e) => {
                if e.to_status_code().is_server_error() {
                    warn!(method = %method, path = %path, error = %e, "Request failed");
                }
                self.error_response(&e)
            }
        };

        self.stamp(&mut response);

        info!(
            method = %method,
            path = %path,
            status = response.status().as_u16(),
            latency_ms = %start.elapsed().as_millis(),
            "Request completed"
        );
        response
    }

    async fn dispatch<B>(&self, req: Request<B>, client: Option<SocketAddr>) -> Result<Response<Body>>
    where
        B: hyper::body::Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        match (req.method(), req.uri().path()) {
            (&Method::GET, "/") => return self.info(),
            (&Method::GET, "/health") => return self.health().await,
            (&Method::GET, "/registry") => return self.registry_info().await,
            (&Method::GET, "/api/dashboard") => {
                let authorization = req.headers().get(AUTHORIZATION).cloned();
                return self.dashboard(authorization).await;
            }
            (&Method::GET, "/api/search") => {
                let query = search_query(req.uri().query());
                let authorization = req.headers().get(AUTHORIZATION).cloned();
                return self.search(query, authorization).await;
            }
            _ => {}
        }

        let target = self.routes.resolve(req.uri().path()).map(|m| {
            (
                m.service().to_string(),
                m.path_and_query(req.uri().query()),
            )
        });

        match target {
            Some((service, path_and_query)) => {
                self.proxy_request(req, service, path_and_query, client).await
            }
            None => self.not_found(),
        }
    }

    async fn proxy_request<B>(
        &self,
        req: Request<B>,
        service: String,
        path_and_query: String,
        client: Option<SocketAddr>,
    ) -> Result<Response<Body>>
    where
        B: hyper::body::Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let Some(permit) = self.breaker.acquire(&service) else {
            warn!(service = %service, "Circuit breaker open, short-circuiting");
            return Err(Error::CircuitOpen(service));
        };

        let (parts, body) = req.into_parts();
        let body = self.read_body(body).await?;

        let discovered =
            tokio::time::timeout(self.settings.discover_timeout, self.registry.discover(&service))
                .await;
        let record = match discovered {
            Ok(Ok(record)) => record,
            Ok(Err(e)) => return self.discovery_failure(permit, e).await,
            Err(_) => {
                warn!(service = %service, "Service discovery timed out");
                let err = Error::not_found(&service, Vec::new());
                return self.discovery_failure(permit, err).await;
            }
        };

        let forward = ForwardRequest {
            service: service.clone(),
            base_url: record.base_url,
            path_and_query,
            method: parts.method,
            headers: parts.headers,
            body,
            client_ip: client.map(|addr| addr.ip()),
        };

        match self.proxy.forward(forward).await {
            Ok(outcome) if outcome.is_success() => {
                permit.success();
                Ok(outcome.into_response())
            }
            Ok(outcome) => {
                permit.failure();
                debug!(
                    service = %service,
                    status = outcome.status().as_u16(),
                    "Relaying upstream error"
                );
                Ok(outcome.into_response())
            }
            Err(e) => {
                permit.failure();
                error!(service = %service, error = %e, "Proxy error");
                Err(e)
            }
        }
    }

    async fn read_body<B>(&self, body: B) -> Result<Bytes>
    where
        B: hyper::body::Body<Data = Bytes> + Send,
        B::Error: Into<BoxError>,
    {
        let limit = self.settings.max_body_size;
        match Limited::new(body, limit).collect().await {
            Ok(collected) => Ok(collected.to_bytes()),
            Err(e) if e.is::<LengthLimitError>() => Err(Error::PayloadTooLarge(limit)),
            Err(e) => Err(Error::InvalidRequest(format!(
                "Failed to read request body: {}",
                e
            ))),
        }
    }

    async fn discovery_failure(&self, permit: CallPermit, err: Error) -> Result<Response<Body>> {
        let service = permit.service().to_string();
        // Never reached the upstream: no verdict, a half-open trial goes back
        drop(permit);
        let service = service.as_str();

        let known = self.registry.known_names().await.unwrap_or_default();
        let err = if err.is_discovery_failure() {
            err
        } else {
            warn!(service = %service, error = %err, "Service discovery failed");
            Error::not_found(service, known.clone())
        };

        warn!(service = %service, error = %err, "Service not available");
        ErrorBody::from_error(&err, &self.settings.gateway_name)
            .with_available_services(known)
            .into_response(err.to_status_code())
    }

    fn info(&self) -> Result<Response<Body>> {
        let mut endpoints = vec![
            "GET /health".to_string(),
            "GET /registry".to_string(),
            "GET /api/dashboard".to_string(),
            "GET /api/search?q=".to_string(),
        ];
        endpoints.extend(
            self.routes
                .routes()
                .iter()
                .map(|r| format!("{}/* -> {}", r.prefix, r.service)),
        );

        responses::ok_json(&json!({
            "service": self.settings.gateway_name,
            "version": VERSION,
            "description": "API gateway with service registry and circuit breaking",
            "endpoints": endpoints,
            "routes": self.routes.routes(),
        }))
    }

    async fn health(&self) -> Result<Response<Body>> {
        let services = match self.registry.list_services().await {
            Ok(services) => services,
            Err(e) => {
                error!(error = %e, "Health check failed to read registry");
                return ResponseBuilder::new(StatusCode::SERVICE_UNAVAILABLE).json_body(&json!({
                    "service": self.settings.gateway_name,
                    "status": "unhealthy",
                    "error": e.to_string(),
                }));
            }
        };

        let mut probes = JoinSet::new();
        for (name, view) in &services {
            let checker = Arc::clone(&self.checker);
            let name = name.clone();
            let url = view.url.clone();
            probes.spawn(async move {
                let result = checker.check(&url).await;
                (name, url, result)
            });
        }

        let mut checks = BTreeMap::new();
        let mut healthy = 0;
        while let Some(joined) = probes.join_next().await {
            let (name, url, result) = match joined {
                Ok(probe) => probe,
                Err(e) => {
                    warn!(error = %e, "Health probe task failed");
                    continue;
                }
            };

            let entry = match result.status {
                HealthStatus::Healthy => {
                    healthy += 1;
                    json!({ "status": result.status, "url": url, "response": result.body })
                }
                HealthStatus::Unhealthy => {
                    json!({ "status": result.status, "url": url, "error": result.message })
                }
            };
            checks.insert(name, entry);
        }

        let status = if healthy == services.len() {
            "healthy"
        } else {
            "degraded"
        };

        responses::ok_json(&json!({
            "service": self.settings.gateway_name,
            "status": status,
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "uptime": self.started_at.elapsed().as_secs_f64(),
            "version": VERSION,
            "services": checks,
            "totalServices": services.len(),
            "healthyServices": healthy,
        }))
    }

    async fn registry_info(&self) -> Result<Response<Body>> {
        let services = self.registry.list_services().await?;
        let stats = self.registry.get_stats().await?;
        let breakers: BTreeMap<_, _> = self.breaker.snapshots().into_iter().collect();

        responses::ok_json(&json!({
            "success": true,
            "service": self.settings.gateway_name,
            "registry": services,
            "stats": stats,
            "circuitBreakers": breakers,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }))
    }

    async fn dashboard(&self, authorization: Option<HeaderValue>) -> Result<Response<Body>> {
        let authorization = match authorization {
            Some(value) if value.as_bytes().starts_with(b"Bearer ") => value,
            _ => {
                return ResponseBuilder::new(StatusCode::UNAUTHORIZED).json_body(&json!({
                    "success": false,
                    "message": "Bearer token required for dashboard",
                    "service": self.settings.gateway_name,
                }));
            }
        };

        let data = self.aggregator.dashboard(authorization).await;
        responses::ok_json(&json!({
            "success": true,
            "data": data,
            "service": self.settings.gateway_name,
        }))
    }

    async fn search(
        &self,
        query: Option<String>,
        authorization: Option<HeaderValue>,
    ) -> Result<Response<Body>> {
        let Some(query) = query else {
            return ResponseBuilder::new(StatusCode::BAD_REQUEST).json_body(&json!({
                "success": false,
                "message": "Search parameter 'q' is required",
                "service": self.settings.gateway_name,
            }));
        };

        let data = self.aggregator.search(&query, authorization).await;
        responses::ok_json(&json!({
            "success": true,
            "data": data,
            "service": self.settings.gateway_name,
        }))
    }

    fn not_found(&self) -> Result<Response<Body>> {
        let mut endpoints = vec![
            "/health".to_string(),
            "/registry".to_string(),
            "/api/dashboard".to_string(),
            "/api/search".to_string(),
        ];
        endpoints.extend(
            self.routes
                .routes()
                .iter()
                .map(|r| format!("{}/*", r.prefix)),
        );

        ResponseBuilder::new(StatusCode::NOT_FOUND).json_body(&json!({
            "success": false,
            "message": "Endpoint not found",
            "service": self.settings.gateway_name,
            "availableEndpoints": endpoints,
        }))
    }

    fn error_response(&self, err: &Error) -> Response<Body> {
        match responses::error(err, &self.settings.gateway_name) {
            Ok(response) => response,
            Err(e) => {
                error!(error = %e, "Failed to build error response");
                let mut response = Response::new(Full::new(Bytes::from_static(b"Internal error")));
                *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                response
            }
        }
    }

    fn stamp(&self, response: &mut Response<Body>) {
        let headers = response.headers_mut();
        if let Ok(name) = HeaderValue::from_str(&self.settings.gateway_name) {
            headers.insert(HeaderName::from_static(X_GATEWAY), name);
        }
        headers.insert(
            HeaderName::from_static(X_GATEWAY_VERSION),
            HeaderValue::from_static(VERSION),
        );
    }
}

/// Non-empty `q` parameter of a query string
fn search_query(query: Option<&str>) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(key, _)| key == "q")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

//! HTTP server implementation

use crate::handler::{HandlerSettings, RequestHandler};
use crate::shutdown::ShutdownSignal;
use crate::RuntimeState;
use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use waypost_config::{validate_config, Config};
use waypost_core::{Error, Result};
use waypost_health::{
    CircuitBreaker, CircuitBreakerConfig, HealthCheck, HealthProber, HttpHealthCheck,
    ProberConfig,
};
use waypost_proxy::{HttpClient, HttpProxy, ProxyConfig, Route, RouteTable};
use waypost_registry::{FileStore, ServiceRegistry};

/// HTTP server
pub struct Server {
    config: Config,
    registry: Arc<ServiceRegistry>,
    breaker: CircuitBreaker,
    handler: RequestHandler,
    prober: HealthProber,
    state: Arc<RwLock<RuntimeState>>,
    shutdown: ShutdownSignal,
    in_flight: Arc<AtomicUsize>,
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("in_flight", &self.in_flight)
            .finish()
    }
}

/// Decrements the in-flight counter when a request finishes
struct InFlight(Arc<AtomicUsize>);

impl InFlight {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Server {
    /// Create a new server builder
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }

    /// Get the current state
    pub async fn state(&self) -> RuntimeState {
        *self.state.read().await
    }

    /// Configured listen address
    pub fn listen_addr(&self) -> SocketAddr {
        self.config.gateway.listen
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared registry
    pub fn registry(&self) -> &Arc<ServiceRegistry> {
        &self.registry
    }

    /// Circuit breakers of this process
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Request handler
    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    /// Health prober
    pub fn prober(&self) -> &HealthProber {
        &self.prober
    }

    /// Requests currently being handled
    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    /// Get shutdown signal
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown.clone()
    }

    /// Bind the configured address and serve until shutdown
    pub async fn run(&self) -> Result<()> {
        let listener = TcpListener::bind(self.listen_addr()).await.map_err(|e| {
            Error::Runtime(format!("Failed to bind to {}: {}", self.listen_addr(), e))
        })?;
        self.serve(listener).await
    }

    /// Serve connections from `listener` until shutdown
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;

        {
            let mut state = self.state.write().await;
            *state = RuntimeState::Running;
        }

        let prober = if self.config.health.enabled {
            let prober = self.prober.clone();
            let shutdown = self.shutdown.clone();
            Some(tokio::spawn(prober.run(async move {
                shutdown.cancelled().await
            })))
        } else {
            tracing::info!("Background health probing disabled");
            None
        };

        tracing::info!(
            listen = %local_addr,
            gateway = %self.config.gateway.name,
            registry = %self.config.registry.path.display(),
            "Server listening"
        );

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            tracing::trace!("Accepted connection from {}", addr);
                            self.spawn_connection(stream, addr);
                        }
                        Err(e) => {
                            tracing::error!("Failed to accept connection: {}", e);
                        }
                    }
                }
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Shutdown signal received");
                    break;
                }
            }
        }

        {
            let mut state = self.state.write().await;
            *state = RuntimeState::ShuttingDown;
        }

        self.drain().await;

        let released = self.shutdown.release_registrations().await;
        if released > 0 {
            tracing::info!(released, "Released registrations held by this process");
        }

        if let Some(prober) = prober {
            if let Err(e) = prober.await {
                tracing::warn!("Health prober task failed: {}", e);
            }
        }

        {
            let mut state = self.state.write().await;
            *state = RuntimeState::Stopped;
        }

        tracing::info!("Server stopped");
        Ok(())
    }

    fn spawn_connection(&self, stream: tokio::net::TcpStream, addr: SocketAddr) {
        let handler = self.handler.clone();
        let in_flight = Arc::clone(&self.in_flight);

        tokio::spawn(async move {
            let service = hyper::service::service_fn(move |req: Request<Incoming>| {
                let handler = handler.clone();
                let guard = InFlight::enter(&in_flight);
                async move {
                    let response = handler.handle(req, Some(addr)).await;
                    drop(guard);
                    Ok::<_, Infallible>(response)
                }
            });

            if let Err(e) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                tracing::debug!("HTTP connection error: {}", e);
            }
        });
    }

    /// Wait for in-flight requests, bounded by the shutdown timeout
    async fn drain(&self) {
        let shutdown_timeout = self.config.gateway.shutdown_timeout;
        let start = tokio::time::Instant::now();

        tracing::info!(
            timeout_secs = shutdown_timeout.as_secs(),
            "Waiting for in-flight requests to complete"
        );

        loop {
            let active = self.in_flight();
            if active == 0 {
                tracing::info!("All requests completed, shutting down cleanly");
                break;
            }
            if start.elapsed() >= shutdown_timeout {
                tracing::warn!(
                    active_requests = active,
                    "Shutdown timeout reached, forcing shutdown"
                );
                break;
            }
            tracing::debug!(
                active_requests = active,
                elapsed_ms = start.elapsed().as_millis(),
                "Waiting for active requests to complete"
            );
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }
}

/// Server builder
#[derive(Default)]
pub struct ServerBuilder {
    config: Option<Config>,
    registry: Option<Arc<ServiceRegistry>>,
    health_check: Option<Arc<dyn HealthCheck>>,
    shutdown: Option<ShutdownSignal>,
}

impl std::fmt::Debug for ServerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerBuilder")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .finish()
    }
}

impl ServerBuilder {
    /// Create a new server builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set configuration
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Use an existing registry instead of a file store at `registry.path`
    pub fn registry(mut self, registry: Arc<ServiceRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Replace the HTTP liveness check
    pub fn health_check(mut self, check: Arc<dyn HealthCheck>) -> Self {
        self.health_check = Some(check);
        self
    }

    /// Share an existing shutdown signal
    pub fn shutdown_signal(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown = Some(signal);
        self
    }

    /// Build the server
    pub fn build(self) -> Result<Server> {
        let config = self.config.unwrap_or_default();
        validate_config(&config)?;

        let registry = self.registry.unwrap_or_else(|| {
            Arc::new(ServiceRegistry::new(FileStore::new(config.registry.path.clone())))
        });

        let breaker = CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: config.circuit_breaker.failure_threshold,
            cooldown: config.circuit_breaker.cooldown,
        });

        let checker = self.health_check.unwrap_or_else(|| {
            Arc::new(HttpHealthCheck::new(
                config.health.path.clone(),
                config.health.timeout,
            ))
        });

        let proxy = HttpProxy::new(
            HttpClient::with_timeout(config.gateway.request_timeout),
            ProxyConfig {
                gateway_name: config.gateway.name.clone(),
                ..Default::default()
            },
        );

        let routes = RouteTable::new(
            config
                .effective_routes()
                .into_iter()
                .map(|r| Route::new(r.prefix, r.service, r.rewrite))
                .collect(),
        );

        let handler = RequestHandler::new(
            Arc::clone(&registry),
            breaker.clone(),
            Arc::new(proxy),
            Arc::new(routes),
            Arc::clone(&checker),
            HandlerSettings {
                gateway_name: config.gateway.name.clone(),
                discover_timeout: config.gateway.discover_timeout,
                max_body_size: config.gateway.max_body_size,
                ..HandlerSettings::default()
            },
        );

        let prober = HealthProber::new(
            Arc::clone(&registry),
            breaker.clone(),
            checker,
            ProberConfig {
                interval: config.health.interval,
                initial_delay: config.health.initial_delay,
                inactive_timeout: config.registry.inactive_timeout,
            },
        );

        Ok(Server {
            config,
            registry,
            breaker,
            handler,
            prober,
            state: Arc::new(RwLock::new(RuntimeState::Initializing)),
            shutdown: self.shutdown.unwrap_or_default(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waypost_registry::{InMemoryStore, ServiceInfo};

    fn in_memory() -> Arc<ServiceRegistry> {
        Arc::new(ServiceRegistry::new(InMemoryStore::new()))
    }

    #[tokio::test]
    async fn test_builder_defaults() {
        let server = Server::builder().registry(in_memory()).build().unwrap();
        assert_eq!(server.state().await, RuntimeState::Initializing);
        assert_eq!(server.listen_addr().port(), 3000);
        assert_eq!(server.breaker().config().failure_threshold, 3);
        assert_eq!(server.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_builder_rejects_invalid_config() {
        let mut config = Config::default();
        config.circuit_breaker.failure_threshold = 0;
        assert!(Server::builder()
            .config(config)
            .registry(in_memory())
            .build()
            .is_err());
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let mut config = Config::default();
        config.health.enabled = false;
        let server = Arc::new(
            Server::builder()
                .config(config)
                .registry(in_memory())
                .build()
                .unwrap(),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();

        let running = Arc::clone(&server);
        let task = tokio::spawn(async move { running.serve(listener).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(server.state().await, RuntimeState::Running);

        server.shutdown_signal().trigger();
        task.await.unwrap().unwrap();
        assert_eq!(server.state().await, RuntimeState::Stopped);
    }

    #[tokio::test]
    async fn test_shutdown_releases_held_registrations() {
        let mut config = Config::default();
        config.health.enabled = false;
        let registry = in_memory();
        let server = Arc::new(
            Server::builder()
                .config(config)
                .registry(Arc::clone(&registry))
                .build()
                .unwrap(),
        );

        let registration = registry
            .register_scoped("item-service", ServiceInfo::new("http://localhost:3002"))
            .await
            .unwrap();
        server.shutdown_signal().hold(registration).await;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let running = Arc::clone(&server);
        let task = tokio::spawn(async move { running.serve(listener).await });

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(registry.known_names().await.unwrap().len(), 1);

        server.shutdown_signal().trigger();
        task.await.unwrap().unwrap();
        assert!(registry.known_names().await.unwrap().is_empty());
        assert_eq!(server.shutdown_signal().held().await, 0);
    }
}

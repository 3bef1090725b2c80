//! Background health prober

use crate::checker::HealthCheck;
use crate::circuit_breaker::CircuitBreaker;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use waypost_registry::{ServiceRegistry, DEFAULT_INACTIVE_TIMEOUT};

/// Prober timing
#[derive(Debug, Clone)]
pub struct ProberConfig {
    /// Time between probe rounds
    pub interval: Duration,
    /// Delay before the first round
    pub initial_delay: Duration,
    /// Records unchecked for longer than this are removed after each round
    pub inactive_timeout: Duration,
}

impl Default for ProberConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            initial_delay: Duration::from_secs(3),
            inactive_timeout: DEFAULT_INACTIVE_TIMEOUT,
        }
    }
}

/// Outcome of one probe round
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProbeReport {
    /// Services probed
    pub checked: usize,
    /// Probes that succeeded
    pub healthy: usize,
    /// Probes that failed or timed out
    pub unhealthy: usize,
    /// Records removed by the inactivity sweep
    pub removed: usize,
}

/// Periodically probes every registered service.
///
/// Success marks the record healthy and resets its circuit breaker. Failure
/// marks it unhealthy but never opens the breaker.
#[derive(Debug, Clone)]
pub struct HealthProber {
    registry: Arc<ServiceRegistry>,
    breaker: CircuitBreaker,
    checker: Arc<dyn HealthCheck>,
    config: ProberConfig,
}

impl HealthProber {
    /// Create a new prober
    pub fn new(
        registry: Arc<ServiceRegistry>,
        breaker: CircuitBreaker,
        checker: Arc<dyn HealthCheck>,
        config: ProberConfig,
    ) -> Self {
        Self {
            registry,
            breaker,
            checker,
            config,
        }
    }

    /// Run one round over a snapshot of the registry
    pub async fn probe_all(&self) -> ProbeReport {
        let mut report = ProbeReport::default();

        let services = match self.registry.list_services().await {
            Ok(services) => services,
            Err(e) => {
                warn!(error = %e, "Failed to list services for probing");
                return report;
            }
        };

        for (name, view) in services {
            report.checked += 1;
            let result = self.checker.check(&view.url).await;
            let healthy = result.is_healthy();

            if healthy {
                report.healthy += 1;
                self.breaker.reset(&name);
            } else {
                report.unhealthy += 1;
                warn!(
                    service = %name,
                    url = %view.url,
                    error = result.message.as_deref().unwrap_or("unknown"),
                    "Service probe failed"
                );
            }

            if let Err(e) = self.registry.update_health(&name, healthy).await {
                warn!(service = %name, error = %e, "Failed to record probe result");
            }
        }

        match self
            .registry
            .cleanup_inactive(self.config.inactive_timeout)
            .await
        {
            Ok(removed) => report.removed = removed,
            Err(e) => warn!(error = %e, "Inactive service cleanup failed"),
        }

        debug!(
            checked = report.checked,
            healthy = report.healthy,
            unhealthy = report.unhealthy,
            removed = report.removed,
            "Probe round complete"
        );
        report
    }

    /// Probe until `shutdown` fires
    pub async fn run(self, shutdown: impl Future<Output = ()>) {
        info!(interval = ?self.config.interval, "Health prober started");
        tokio::pin!(shutdown);

        tokio::select! {
            _ = tokio::time::sleep(self.config.initial_delay) => {}
            _ = &mut shutdown => {
                info!("Health prober stopped");
                return;
            }
        }

        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.probe_all().await;
                }
                _ = &mut shutdown => {
                    break;
                }
            }
        }

        info!("Health prober stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checker::HttpHealthCheck;
    use crate::circuit_breaker::CircuitState;
    use waypost_registry::{InMemoryStore, ServiceInfo};
    use wiremock::matchers::path;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn prober(registry: Arc<ServiceRegistry>, breaker: CircuitBreaker) -> HealthProber {
        HealthProber::new(
            registry,
            breaker,
            Arc::new(HttpHealthCheck::new("/health", Duration::from_secs(1))),
            ProberConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_success_marks_healthy_and_resets_breaker() {
        let server = MockServer::start().await;
        Mock::given(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let registry = Arc::new(ServiceRegistry::new(InMemoryStore::new()));
        registry
            .register("item-service", ServiceInfo::new(server.uri()))
            .await
            .unwrap();
        registry.update_health("item-service", false).await.unwrap();

        let breaker = CircuitBreaker::default();
        for _ in 0..3 {
            breaker.record_failure("item-service");
        }
        assert_eq!(breaker.state("item-service"), CircuitState::Open);

        let report = prober(registry.clone(), breaker.clone()).probe_all().await;
        assert_eq!(report.healthy, 1);
        assert_eq!(breaker.state("item-service"), CircuitState::Closed);
        assert!(registry.discover("item-service").await.is_ok());
    }

    #[tokio::test]
    async fn test_failure_marks_unhealthy_without_opening_breaker() {
        let server = MockServer::start().await;
        Mock::given(path("/health"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let registry = Arc::new(ServiceRegistry::new(InMemoryStore::new()));
        registry
            .register("list-service", ServiceInfo::new(server.uri()))
            .await
            .unwrap();

        let breaker = CircuitBreaker::default();
        let prober = prober(registry.clone(), breaker.clone());
        for _ in 0..5 {
            prober.probe_all().await;
        }

        assert!(registry.discover("list-service").await.is_err());
        assert!(!breaker.is_open("list-service"));
        assert!(breaker.snapshot("list-service").is_none());
    }

    #[tokio::test]
    async fn test_round_sweeps_inactive() {
        let registry = Arc::new(ServiceRegistry::new(InMemoryStore::new()));
        let prober = HealthProber::new(
            registry.clone(),
            CircuitBreaker::default(),
            Arc::new(HttpHealthCheck::default()),
            ProberConfig {
                inactive_timeout: Duration::ZERO,
                ..Default::default()
            },
        );

        registry
            .register("user-service", ServiceInfo::new("http://127.0.0.1:1"))
            .await
            .unwrap();

        let report = prober.probe_all().await;
        assert_eq!(report.checked, 1);
        assert_eq!(report.unhealthy, 1);
        assert_eq!(report.removed, 1);
        assert!(registry.list_services().await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let registry = Arc::new(ServiceRegistry::new(InMemoryStore::new()));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(prober(registry, CircuitBreaker::default()).run(async {
            let _ = rx.await;
        }));

        tokio::time::advance(Duration::from_secs(10)).await;
        tx.send(()).unwrap();
        handle.await.unwrap();
    }
}

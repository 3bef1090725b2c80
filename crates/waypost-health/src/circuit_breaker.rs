//! Per-service circuit breaker

use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, requests pass through normally
    Closed,
    /// Circuit is open, all requests fail immediately
    Open,
    /// Cooldown elapsed, a single trial request is let through
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "closed"),
            CircuitState::Open => write!(f, "open"),
            CircuitState::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Circuit breaker configuration
#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the circuit
    pub failure_threshold: u32,
    /// Time since the last failure before a trial request is allowed
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

/// Point-in-time view of one breaker
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CircuitSnapshot {
    /// Current state
    pub state: CircuitState,
    /// Failures since the last reset
    pub failure_count: u32,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    last_failure_at: Option<Instant>,
    trial_in_flight: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Admission {
    Allowed,
    Trial,
    Rejected,
}

/// Breaker for a single destination
#[derive(Debug)]
struct CircuitBreakerInstance {
    inner: parking_lot::Mutex<BreakerState>,
}

impl CircuitBreakerInstance {
    fn new() -> Self {
        Self {
            inner: parking_lot::Mutex::new(BreakerState {
                state: CircuitState::Closed,
                failure_count: 0,
                last_failure_at: None,
                trial_in_flight: false,
            }),
        }
    }

    fn admit(&self, name: &str, config: &CircuitBreakerConfig) -> Admission {
        let mut inner = self.inner.lock();
        let state = inner.state;

        match state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                let cooled = inner
                    .last_failure_at
                    .map_or(true, |at| at.elapsed() > config.cooldown);
                if cooled {
                    inner.state = CircuitState::HalfOpen;
                    inner.trial_in_flight = true;
                    info!(service = %name, "Circuit breaker transitioned to HALF-OPEN");
                    Admission::Trial
                } else {
                    Admission::Rejected
                }
            }
            CircuitState::HalfOpen => {
                if inner.trial_in_flight {
                    Admission::Rejected
                } else {
                    inner.trial_in_flight = true;
                    Admission::Trial
                }
            }
        }
    }

    fn record_failure(&self, name: &str, config: &CircuitBreakerConfig) {
        let mut inner = self.inner.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_at = Some(Instant::now());
        inner.trial_in_flight = false;

        let trip = match inner.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => inner.failure_count >= config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            inner.state = CircuitState::Open;
            warn!(
                service = %name,
                failures = inner.failure_count,
                "Circuit breaker transitioned to OPEN"
            );
        } else {
            debug!(
                service = %name,
                state = %inner.state,
                failures = inner.failure_count,
                "Circuit breaker recorded failure"
            );
        }
    }

    fn reset(&self, name: &str) {
        let mut inner = self.inner.lock();
        let previous = inner.state;
        inner.state = CircuitState::Closed;
        inner.failure_count = 0;
        inner.last_failure_at = None;
        inner.trial_in_flight = false;

        if previous != CircuitState::Closed {
            info!(service = %name, from = %previous, "Circuit breaker reset");
        }
    }

    fn release_trial(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CircuitState::HalfOpen {
            inner.trial_in_flight = false;
        }
    }

    fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.inner.lock();
        CircuitSnapshot {
            state: inner.state,
            failure_count: inner.failure_count,
        }
    }
}

/// Failure-counting breakers keyed by destination service name.
///
/// State is private to this process; clones share it.
#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    instances: Arc<DashMap<String, Arc<CircuitBreakerInstance>>>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    /// Create a new circuit breaker manager
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            instances: Arc::new(DashMap::new()),
        }
    }

    /// Active configuration
    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn get(&self, name: &str) -> Option<Arc<CircuitBreakerInstance>> {
        self.instances.get(name).map(|entry| Arc::clone(entry.value()))
    }

    fn get_or_create(&self, name: &str) -> Arc<CircuitBreakerInstance> {
        self.instances
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreakerInstance::new()))
            .clone()
    }

    /// Whether calls to `name` must be short-circuited.
    ///
    /// Once the cooldown has elapsed this admits exactly one trial request
    /// and keeps returning `true` for everyone else until the trial's
    /// outcome is recorded.
    pub fn is_open(&self, name: &str) -> bool {
        self.admission(name) == Admission::Rejected
    }

    /// Ask to call `name`; `None` means short-circuit.
    ///
    /// A permit that is dropped without [`CallPermit::success`] or
    /// [`CallPermit::failure`] hands a half-open trial back, so an abandoned
    /// call never leaves the breaker waiting on a verdict.
    pub fn acquire(&self, name: &str) -> Option<CallPermit> {
        match self.admission(name) {
            Admission::Rejected => None,
            admission => Some(CallPermit {
                breaker: self.clone(),
                name: name.to_string(),
                trial: admission == Admission::Trial,
            }),
        }
    }

    fn admission(&self, name: &str) -> Admission {
        self.get(name)
            .map_or(Admission::Allowed, |instance| instance.admit(name, &self.config))
    }

    /// Record a failed call to `name`
    pub fn record_failure(&self, name: &str) {
        self.get_or_create(name).record_failure(name, &self.config);
    }

    /// Close the breaker for `name` and clear its failure count
    pub fn reset(&self, name: &str) {
        if let Some(instance) = self.get(name) {
            instance.reset(name);
        }
    }

    /// Give back a half-open trial that ended without reaching the upstream
    pub fn release_trial(&self, name: &str) {
        if let Some(instance) = self.get(name) {
            instance.release_trial();
        }
    }

    /// Current state of `name` (closed when never seen)
    pub fn state(&self, name: &str) -> CircuitState {
        self.get(name)
            .map_or(CircuitState::Closed, |instance| instance.snapshot().state)
    }

    /// Snapshot of `name`, if a breaker exists for it
    pub fn snapshot(&self, name: &str) -> Option<CircuitSnapshot> {
        self.get(name).map(|instance| instance.snapshot())
    }

    /// Snapshots of every known breaker
    pub fn snapshots(&self) -> Vec<(String, CircuitSnapshot)> {
        let mut all: Vec<_> = self
            .instances
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().snapshot()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }
}

/// Right to make one call through a [`CircuitBreaker`]
#[derive(Debug)]
pub struct CallPermit {
    breaker: CircuitBreaker,
    name: String,
    trial: bool,
}

impl CallPermit {
    /// Destination the permit was issued for
    pub fn service(&self) -> &str {
        &self.name
    }

    /// Whether this call is the half-open trial
    pub fn is_trial(&self) -> bool {
        self.trial
    }

    /// The call succeeded; closes the breaker
    pub fn success(mut self) {
        self.trial = false;
        self.breaker.reset(&self.name);
    }

    /// The call failed; counts towards opening the breaker
    pub fn failure(mut self) {
        self.trial = false;
        self.breaker.record_failure(&self.name);
    }
}

impl Drop for CallPermit {
    fn drop(&mut self) {
        if self.trial {
            debug!(service = %self.name, "Half-open trial abandoned, releasing");
            self.breaker.release_trial(&self.name);
        }
    }
}

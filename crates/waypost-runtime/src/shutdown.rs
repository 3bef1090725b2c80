//! Process lifecycle: the shutdown notification and the registrations this
//! process releases on its way out

use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};
use waypost_registry::Registration;

/// Shared shutdown state.
///
/// Cloning is cheap; every clone observes the same trigger. Registrations
/// handed to [`ShutdownSignal::hold`] are released by the server once
/// in-flight requests have drained. If the process dies first they expire
/// through the prober's inactive cleanup instead.
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    inner: Arc<Lifecycle>,
}

#[derive(Debug)]
struct Lifecycle {
    triggered: watch::Sender<bool>,
    held: Mutex<Vec<Registration>>,
}

impl ShutdownSignal {
    /// Create a new shutdown signal
    pub fn new() -> Self {
        let (triggered, _) = watch::channel(false);
        Self {
            inner: Arc::new(Lifecycle {
                triggered,
                held: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Trigger shutdown; later calls are no-ops
    pub fn trigger(&self) {
        if !self.inner.triggered.send_replace(true) {
            info!("Shutdown signal triggered");
        }
    }

    /// Check if shutdown was triggered
    pub fn is_triggered(&self) -> bool {
        *self.inner.triggered.borrow()
    }

    /// Resolves once shutdown is triggered, immediately if it already was
    pub async fn cancelled(&self) {
        let mut rx = self.inner.triggered.subscribe();
        // Errors only if the sender is gone, and `self` keeps it alive
        let _ = rx.wait_for(|triggered| *triggered).await;
    }

    /// Keep `registration` until shutdown
    pub async fn hold(&self, registration: Registration) {
        debug!(service = %registration.name(), "Holding registration until shutdown");
        self.inner.held.lock().await.push(registration);
    }

    /// Number of registrations waiting for release
    pub async fn held(&self) -> usize {
        self.inner.held.lock().await.len()
    }

    /// Release every held registration and return how many records were
    /// actually removed. Records re-registered by another process are kept.
    pub async fn release_registrations(&self) -> usize {
        let held = std::mem::take(&mut *self.inner.held.lock().await);
        let mut removed = 0;

        for registration in held {
            let name = registration.name().to_string();
            match registration.release().await {
                Ok(true) => {
                    removed += 1;
                    info!(service = %name, "Registration released");
                }
                Ok(false) => debug!(service = %name, "Registration taken over, keeping record"),
                Err(e) => warn!(service = %name, error = %e, "Failed to release registration"),
            }
        }
        removed
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Turns SIGINT/SIGTERM (Ctrl+C elsewhere) into a shutdown trigger
#[derive(Debug)]
pub struct SignalHandler {
    signal: ShutdownSignal,
}

impl SignalHandler {
    /// Create a new signal handler
    pub fn new(signal: ShutdownSignal) -> Self {
        Self { signal }
    }

    /// Wait for an OS signal or an internal trigger, whichever comes first
    pub async fn run(self) {
        tokio::select! {
            received = os_signal() => match received {
                Ok(name) => {
                    info!(signal = name, "Received signal");
                    self.signal.trigger();
                }
                Err(e) => tracing::error!("Failed to install signal handlers: {}", e),
            },
            _ = self.signal.cancelled() => {}
        }
    }
}

#[cfg(unix)]
async fn os_signal() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;
    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        _ = sigint.recv() => Ok("SIGINT"),
    }
}

#[cfg(not(unix))]
async fn os_signal() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await?;
    Ok("Ctrl+C")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use waypost_registry::{InMemoryStore, ServiceInfo, ServiceRegistry};

    #[tokio::test]
    async fn test_trigger_reaches_every_clone() {
        let signal = ShutdownSignal::new();
        let observer = signal.clone();
        assert!(!observer.is_triggered());

        let waiting = tokio::spawn(async move { observer.cancelled().await });
        signal.trigger();
        signal.trigger();

        tokio::time::timeout(Duration::from_secs(1), waiting)
            .await
            .unwrap()
            .unwrap();
        assert!(signal.is_triggered());
    }

    #[tokio::test]
    async fn test_cancelled_after_trigger_is_immediate() {
        let signal = ShutdownSignal::new();
        signal.trigger();
        tokio::time::timeout(Duration::from_millis(100), signal.cancelled())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_signal_handler_exits_on_internal_trigger() {
        let signal = ShutdownSignal::new();
        let handler = tokio::spawn(SignalHandler::new(signal.clone()).run());
        signal.trigger();
        tokio::time::timeout(Duration::from_secs(1), handler)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_release_registrations() {
        let store = InMemoryStore::new();
        let ours = Arc::new(ServiceRegistry::new(store.clone()));
        let theirs = ServiceRegistry::new(store);
        let signal = ShutdownSignal::new();

        for (name, url) in [
            ("item-service", "http://localhost:3002"),
            ("list-service", "http://localhost:3004"),
        ] {
            let registration = ours
                .register_scoped(name, ServiceInfo::new(url))
                .await
                .unwrap();
            signal.hold(registration).await;
        }
        assert_eq!(signal.held().await, 2);

        // Another process takes over list-service before we exit
        theirs
            .register("list-service", ServiceInfo::new("http://localhost:4004"))
            .await
            .unwrap();

        assert_eq!(signal.release_registrations().await, 1);
        assert_eq!(signal.held().await, 0);
        assert_eq!(
            ours.known_names().await.unwrap(),
            vec!["list-service".to_string()]
        );
    }
}

//! Scoped service registration

use crate::record::ServiceRecord;
use crate::registry::ServiceRegistry;
use std::sync::Arc;
use tracing::warn;
use waypost_core::Result;

/// Handle to a record registered by this process.
///
/// Call [`Registration::release`] on shutdown. Only the record this process
/// wrote is removed; if another process has re-registered the name since,
/// its record is left alone. A guard dropped without release leaves the
/// record to expire through `cleanup_inactive`.
#[derive(Debug)]
pub struct Registration {
    registry: Arc<ServiceRegistry>,
    record: ServiceRecord,
    released: bool,
}

impl Registration {
    pub(crate) fn new(registry: Arc<ServiceRegistry>, record: ServiceRecord) -> Self {
        Self {
            registry,
            record,
            released: false,
        }
    }

    /// Registered service name
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Record as written at registration
    pub fn record(&self) -> &ServiceRecord {
        &self.record
    }

    /// Remove the record if this process still owns it
    pub async fn release(mut self) -> Result<bool> {
        self.released = true;
        self.registry.unregister_owned(&self.record.name).await
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        if !self.released {
            warn!(
                service = %self.record.name,
                "Registration dropped without release; record will expire"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::memory::InMemoryStore;
    use crate::record::ServiceInfo;
    use crate::registry::ServiceRegistry;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_release_removes_own_record() {
        let registry = Arc::new(ServiceRegistry::new(InMemoryStore::new()));
        let registration = registry
            .register_scoped("list-service", ServiceInfo::new("http://localhost:3004"))
            .await
            .unwrap();
        assert_eq!(registration.name(), "list-service");

        assert!(registration.release().await.unwrap());
        assert!(registry.list_services().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_release_after_takeover_keeps_record() {
        let store = InMemoryStore::new();
        let ours = Arc::new(ServiceRegistry::new(store.clone()));
        let theirs = ServiceRegistry::new(store);

        let registration = ours
            .register_scoped("list-service", ServiceInfo::new("http://old"))
            .await
            .unwrap();
        theirs
            .register("list-service", ServiceInfo::new("http://new"))
            .await
            .unwrap();

        assert!(!registration.release().await.unwrap());
        assert_eq!(
            ours.discover("list-service").await.unwrap().base_url,
            "http://new"
        );
    }

    #[tokio::test]
    async fn test_drop_leaves_record() {
        let registry = Arc::new(ServiceRegistry::new(InMemoryStore::new()));
        let registration = registry
            .register_scoped("a", ServiceInfo::new("http://a"))
            .await
            .unwrap();
        drop(registration);

        assert!(registry.discover("a").await.is_ok());
    }
}

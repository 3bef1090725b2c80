//! Service registry API layered on a [`RegistryStore`]

use crate::record::{RegistryStats, RegistryTable, ServiceInfo, ServiceRecord, ServiceView};
use crate::registration::Registration;
use crate::store::RegistryStore;
use chrono::Utc;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info};
use waypost_core::{Error, Result};

/// Default age after which an unchecked record is considered dead
pub const DEFAULT_INACTIVE_TIMEOUT: Duration = Duration::from_secs(300);

/// Register, discover and expire services in a shared table.
///
/// Every operation is a whole-table read-modify-write against the store.
/// Mutations from this instance are serialised; writers in other processes
/// remain last-writer-wins.
pub struct ServiceRegistry {
    store: Arc<dyn RegistryStore>,
    owner_id: String,
    write_lock: Mutex<()>,
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("store", &self.store.describe())
            .field("owner_id", &self.owner_id)
            .finish()
    }
}

impl ServiceRegistry {
    /// Create a registry over `store`
    pub fn new(store: impl RegistryStore) -> Self {
        Self::with_store(Arc::new(store))
    }

    /// Create a registry over a shared store handle
    pub fn with_store(store: Arc<dyn RegistryStore>) -> Self {
        let owner_id = format!("{}-{}", std::process::id(), uuid::Uuid::new_v4().simple());
        Self {
            store,
            owner_id,
            write_lock: Mutex::new(()),
        }
    }

    /// Identifier stamped into records registered by this instance
    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Register `name`, overwriting any previous record of that name
    pub async fn register(&self, name: &str, info: ServiceInfo) -> Result<ServiceRecord> {
        if info.base_url.trim().is_empty() {
            return Err(Error::InvalidRequest(format!(
                "service '{}' registered without a base URL",
                name
            )));
        }

        let record = ServiceRecord::new(name, info, self.owner_id.clone(), Utc::now());
        let stored = record.clone();

        self.mutate(move |table| {
            table.insert(stored.name.clone(), stored);
            ((), true)
        })
        .await?;

        info!(service = %name, url = %record.base_url, "Service registered");
        Ok(record)
    }

    /// Register `name` and return a guard that releases it on shutdown
    pub async fn register_scoped(
        self: &Arc<Self>,
        name: &str,
        info: ServiceInfo,
    ) -> Result<Registration> {
        let record = self.register(name, info).await?;
        Ok(Registration::new(Arc::clone(self), record))
    }

    /// Resolve `name` to a healthy record
    pub async fn discover(&self, name: &str) -> Result<ServiceRecord> {
        let table = self.store.load().await?;

        match table.get(name) {
            None => Err(Error::not_found(name, table.keys().cloned().collect())),
            Some(record) if !record.healthy => Err(Error::ServiceUnavailable(name.to_string())),
            Some(record) => Ok(record.clone()),
        }
    }

    /// Diagnostic projection of every record
    pub async fn list_services(&self) -> Result<BTreeMap<String, ServiceView>> {
        let now = Utc::now();
        Ok(self
            .store
            .load()
            .await?
            .iter()
            .map(|(name, record)| (name.clone(), record.view(now)))
            .collect())
    }

    /// Raw snapshot of the table
    pub async fn records(&self) -> Result<RegistryTable> {
        self.store.load().await
    }

    /// Names currently present in the table
    pub async fn known_names(&self) -> Result<Vec<String>> {
        Ok(self.store.load().await?.into_keys().collect())
    }

    /// Record a probe result; returns `false` when `name` is unknown
    pub async fn update_health(&self, name: &str, healthy: bool) -> Result<bool> {
        let now = Utc::now();
        let updated = self
            .mutate(|table| match table.get_mut(name) {
                Some(record) => {
                    record.healthy = healthy;
                    record.last_health_check_at = now;
                    (true, true)
                }
                None => (false, false),
            })
            .await?;

        if updated {
            debug!(service = %name, healthy, "Health updated");
        }
        Ok(updated)
    }

    /// Remove `name` regardless of who registered it
    pub async fn unregister(&self, name: &str) -> Result<bool> {
        let removed = self
            .mutate(|table| {
                let removed = table.remove(name).is_some();
                (removed, removed)
            })
            .await?;

        if removed {
            info!(service = %name, "Service unregistered");
        }
        Ok(removed)
    }

    /// Remove `name` only if this instance registered the current record
    pub async fn unregister_owned(&self, name: &str) -> Result<bool> {
        let owner = self.owner_id.as_str();
        let removed = self
            .mutate(|table| {
                let owned = table
                    .get(name)
                    .is_some_and(|record| record.owner_process_id == owner);
                if owned {
                    table.remove(name);
                }
                (owned, owned)
            })
            .await?;

        if removed {
            info!(service = %name, "Service unregistered");
        } else {
            debug!(service = %name, "Record not owned by this process, left in place");
        }
        Ok(removed)
    }

    /// Remove records unchecked for longer than `timeout`; returns the count.
    ///
    /// A zero timeout removes every record.
    pub async fn cleanup_inactive(&self, timeout: Duration) -> Result<usize> {
        let now = Utc::now();
        let removed: Vec<String> = self
            .mutate(|table| {
                let stale: Vec<String> = table
                    .iter()
                    .filter(|(_, record)| record.is_inactive(now, timeout))
                    .map(|(name, _)| name.clone())
                    .collect();
                for name in &stale {
                    table.remove(name);
                }
                let changed = !stale.is_empty();
                (stale, changed)
            })
            .await?;

        for name in &removed {
            info!(service = %name, "Removed inactive service");
        }
        Ok(removed.len())
    }

    /// Aggregate statistics over the current table
    pub async fn get_stats(&self) -> Result<RegistryStats> {
        let table = self.store.load().await?;
        Ok(RegistryStats::from_table(&table, Utc::now()))
    }

    async fn mutate<T>(&self, f: impl FnOnce(&mut RegistryTable) -> (T, bool)) -> Result<T> {
        let _guard = self.write_lock.lock().await;
        let mut table = self.store.load().await?;
        let (out, changed) = f(&mut table);
        if changed {
            self.store.save(&table).await?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::file::FileStore;
    use crate::memory::InMemoryStore;
    use tempfile::TempDir;

    fn registry() -> ServiceRegistry {
        ServiceRegistry::new(InMemoryStore::new())
    }

    #[tokio::test]
    async fn test_register_then_discover() {
        let registry = registry();
        registry
            .register("item-service", ServiceInfo::new("http://localhost:3003"))
            .await
            .unwrap();

        let record = registry.discover("item-service").await.unwrap();
        assert_eq!(record.base_url, "http://localhost:3003");
        assert!(record.healthy);
        assert_eq!(record.owner_process_id, registry.owner_id());
    }

    #[tokio::test]
    async fn test_register_requires_base_url() {
        let err = registry()
            .register("x", ServiceInfo::new(" "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_reregister_overwrites() {
        let registry = registry();
        registry
            .register("a", ServiceInfo::new("http://old"))
            .await
            .unwrap();
        registry.update_health("a", false).await.unwrap();
        let first = registry.records().await.unwrap()["a"].registered_at;

        tokio::time::sleep(Duration::from_millis(5)).await;
        registry
            .register("a", ServiceInfo::new("http://new"))
            .await
            .unwrap();

        let record = registry.discover("a").await.unwrap();
        assert_eq!(record.base_url, "http://new");
        assert!(record.healthy);
        assert!(record.registered_at > first);
        assert_eq!(registry.known_names().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_discover_failures_have_no_side_effects() {
        let registry = registry();
        registry
            .register("list-service", ServiceInfo::new("http://l"))
            .await
            .unwrap();
        registry
            .register("user-service", ServiceInfo::new("http://u"))
            .await
            .unwrap();
        registry.update_health("user-service", false).await.unwrap();

        for _ in 0..3 {
            match registry.discover("cart-service").await.unwrap_err() {
                Error::ServiceNotFound { name, known } => {
                    assert_eq!(name, "cart-service");
                    assert_eq!(known, vec!["list-service", "user-service"]);
                }
                other => panic!("unexpected error: {other}"),
            }
            assert!(matches!(
                registry.discover("user-service").await.unwrap_err(),
                Error::ServiceUnavailable(_)
            ));
        }
        assert_eq!(registry.get_stats().await.unwrap().unhealthy_count, 1);
    }

    #[tokio::test]
    async fn test_update_health_unknown_is_noop() {
        let registry = registry();
        assert!(!registry.update_health("ghost", true).await.unwrap());
        assert!(registry.list_services().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_health_touches_only_health() {
        let registry = registry();
        let info = ServiceInfo::new("http://a").version("1.2.0");
        let before = registry.register("a", info).await.unwrap();

        tokio::time::sleep(Duration::from_millis(5)).await;
        registry.update_health("a", false).await.unwrap();

        let after = registry.records().await.unwrap().remove("a").unwrap();
        assert!(!after.healthy);
        assert!(after.last_health_check_at > before.last_health_check_at);
        assert_eq!(after.registered_at, before.registered_at);
        assert_eq!(after.metadata, before.metadata);
        assert_eq!(after.base_url, before.base_url);
    }

    #[tokio::test]
    async fn test_unregister() {
        let registry = registry();
        registry.register("a", ServiceInfo::new("http://a")).await.unwrap();

        assert!(registry.unregister("a").await.unwrap());
        assert!(!registry.unregister("a").await.unwrap());
        assert!(registry.discover("a").await.is_err());
    }

    #[tokio::test]
    async fn test_cleanup_zero_removes_everything() {
        let registry = registry();
        registry.register("a", ServiceInfo::new("http://a")).await.unwrap();
        registry.register("b", ServiceInfo::new("http://b")).await.unwrap();
        registry.update_health("b", false).await.unwrap();

        assert_eq!(registry.cleanup_inactive(Duration::ZERO).await.unwrap(), 2);
        assert_eq!(registry.get_stats().await.unwrap().total, 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_stale() {
        let store = InMemoryStore::new();
        let registry = ServiceRegistry::new(store.clone());
        registry.register("fresh", ServiceInfo::new("http://f")).await.unwrap();
        registry.register("stale", ServiceInfo::new("http://s")).await.unwrap();

        let mut table = store.load().await.unwrap();
        let record = table.get_mut("stale").unwrap();
        record.last_health_check_at = Utc::now() - chrono::Duration::seconds(600);
        store.save(&table).await.unwrap();

        assert_eq!(
            registry
                .cleanup_inactive(DEFAULT_INACTIVE_TIMEOUT)
                .await
                .unwrap(),
            1
        );
        assert_eq!(registry.known_names().await.unwrap(), vec!["fresh"]);
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let registry = registry();
        assert!(registry.list_services().await.unwrap().is_empty());
        assert_eq!(registry.get_stats().await.unwrap().total, 0);
        assert_eq!(registry.cleanup_inactive(Duration::ZERO).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unregister_owned_spares_other_processes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("registry.json");
        let ours = ServiceRegistry::new(FileStore::new(&path));
        let theirs = ServiceRegistry::new(FileStore::new(&path));

        ours.register("item-service", ServiceInfo::new("http://a"))
            .await
            .unwrap();
        theirs
            .register("item-service", ServiceInfo::new("http://b"))
            .await
            .unwrap();

        assert!(!ours.unregister_owned("item-service").await.unwrap());
        assert_eq!(
            ours.discover("item-service").await.unwrap().base_url,
            "http://b"
        );
        assert!(theirs.unregister_owned("item-service").await.unwrap());
    }

    #[tokio::test]
    async fn test_concurrent_registrations_in_one_process() {
        let registry = Arc::new(registry());
        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                registry
                    .register(&format!("svc-{i}"), ServiceInfo::new(format!("http://h{i}")))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.get_stats().await.unwrap().total, 16);
    }
}

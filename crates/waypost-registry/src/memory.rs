//! In-memory registry store

use crate::record::RegistryTable;
use crate::store::RegistryStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::sync::Arc;
use waypost_core::Result;

/// Registry store that lives only as long as the process.
///
/// Clones share the same table, which makes it convenient for tests and for
/// running several components inside one binary.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    table: Arc<RwLock<RegistryTable>>,
}

impl InMemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store pre-populated with `table`
    pub fn with_table(table: RegistryTable) -> Self {
        Self {
            table: Arc::new(RwLock::new(table)),
        }
    }
}

#[async_trait]
impl RegistryStore for InMemoryStore {
    async fn load(&self) -> Result<RegistryTable> {
        Ok(self.table.read().clone())
    }

    async fn save(&self, table: &RegistryTable) -> Result<()> {
        *self.table.write() = table.clone();
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

//! Registry store trait definition

use crate::record::RegistryTable;
use async_trait::async_trait;
use waypost_core::Result;

/// Persistent home of the registry table.
///
/// Every process sharing a store sees the same table. Callers perform whole
/// table read-modify-write cycles; implementations only have to make a single
/// `save` atomic with respect to concurrent `load`s.
#[async_trait]
pub trait RegistryStore: Send + Sync + std::fmt::Debug + 'static {
    /// Load the current table.
    ///
    /// A missing or unreadable backing medium yields an empty table.
    async fn load(&self) -> Result<RegistryTable>;

    /// Replace the stored table with `table`
    async fn save(&self, table: &RegistryTable) -> Result<()>;

    /// Short description for logs
    fn describe(&self) -> String;
}

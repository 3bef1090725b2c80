//! Shared service registry for Waypost
//!
//! A table of logical service name to [`ServiceRecord`], persisted through a
//! [`RegistryStore`] so that independently started processes can find each
//! other. The default store is a JSON file on a shared filesystem, written
//! atomically.

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    missing_debug_implementations,
    rust_2018_idioms,
    unreachable_pub
)]

pub mod file;
pub mod memory;
pub mod record;
pub mod registration;
pub mod registry;
pub mod store;

pub use file::FileStore;
pub use memory::InMemoryStore;
pub use record::{
    RegistryStats, RegistryTable, ServiceInfo, ServiceMetadata, ServiceRecord, ServiceStats,
    ServiceView,
};
pub use registration::Registration;
pub use registry::{ServiceRegistry, DEFAULT_INACTIVE_TIMEOUT};
pub use store::RegistryStore;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        FileStore, InMemoryStore, Registration, RegistryStats, RegistryStore, ServiceInfo,
        ServiceRecord, ServiceRegistry,
    };
}

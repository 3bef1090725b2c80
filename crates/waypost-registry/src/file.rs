//! JSON file registry store

use crate::record::RegistryTable;
use crate::store::RegistryStore;
use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use waypost_core::{Error, Result};

/// Registry store backed by a single JSON document on a shared filesystem.
///
/// Writes go to a sibling temporary file which is then renamed over the
/// target, so readers in other processes observe either the old or the new
/// table and never a torn one.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    /// Create a store for `path`; the file need not exist yet
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the registry document
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "registry".into());
        name.push(format!(
            ".{}.{}.tmp",
            std::process::id(),
            uuid::Uuid::new_v4().simple()
        ));
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl RegistryStore for FileStore {
    async fn load(&self) -> Result<RegistryTable> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Registry file absent, starting empty");
                return Ok(RegistryTable::new());
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Failed to read registry file");
                return Ok(RegistryTable::new());
            }
        };

        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(RegistryTable::new());
        }

        match serde_json::from_slice(&bytes) {
            Ok(table) => Ok(table),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Registry file is not a valid table");
                Ok(RegistryTable::new())
            }
        }
    }

    async fn save(&self, table: &RegistryTable) -> Result<()> {
        let json = serde_json::to_vec_pretty(table)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Store(format!("{}: {}", parent.display(), e)))?;
        }

        let tmp = self.temp_path();
        if let Err(e) = tokio::fs::write(&tmp, &json).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Store(format!("{}: {}", tmp.display(), e)));
        }

        if let Err(e) = tokio::fs::rename(&tmp, &self.path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Store(format!("{}: {}", self.path.display(), e)));
        }

        debug!(path = %self.path.display(), services = table.len(), "Registry file written");
        Ok(())
    }

    fn describe(&self) -> String {
        format!("file:{}", self.path.display())
    }
}

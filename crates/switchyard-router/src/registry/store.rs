//! Registry snapshot on disk
//!
//! The snapshot is a JSON object keyed by model id. Entries for models the
//! registry already knows are overlaid field by field, so a snapshot written
//! by an older build (or edited by hand) only needs the fields it changes.

use super::descriptor::ModelDescriptor;
use crate::error::{Error, Result};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default snapshot location under the home directory
const DEFAULT_SNAPSHOT: &str = ".switchyard/models.json";

/// Reads and writes the registry snapshot
#[derive(Debug, Clone)]
pub struct RegistryStore {
    path: PathBuf,
}

impl RegistryStore {
    /// Store at `~/.switchyard/models.json`
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Persistence("home directory not found".into()))?;
        Ok(Self::with_path(home.join(DEFAULT_SNAPSHOT)))
    }

    /// Store at a custom path
    #[must_use]
    pub fn with_path(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Snapshot file path
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Overlay the snapshot onto `models`
    ///
    /// A missing file leaves `models` untouched. Entries that fail to parse are
    /// warned and skipped.
    pub fn load_into(&self, models: &mut BTreeMap<String, ModelDescriptor>) -> Result<()> {
        if !self.path.exists() {
            debug!(path = ?self.path, "No registry snapshot, using built-in catalogue");
            return Ok(());
        }

        let content = std::fs::read_to_string(&self.path)
            .map_err(|e| Error::Persistence(format!("read {:?}: {}", self.path, e)))?;
        let entries: Map<String, Value> = serde_json::from_str(&content)
            .map_err(|e| Error::Persistence(format!("parse {:?}: {}", self.path, e)))?;

        for (model_id, overlay) in entries {
            let merged = match models.get(&model_id) {
                Some(existing) => merge_entry(existing, overlay),
                None => serde_json::from_value::<ModelDescriptor>(overlay)
                    .map_err(|e| Error::Persistence(e.to_string())),
            };

            match merged {
                Ok(mut descriptor) => {
                    descriptor.model_id.clone_from(&model_id);
                    models.insert(model_id, descriptor);
                }
                Err(e) => warn!(model = %model_id, error = %e, "Skipping snapshot entry"),
            }
        }
        Ok(())
    }

    /// Write the snapshot (temp file, then rename)
    pub async fn save(&self, models: &BTreeMap<String, ModelDescriptor>) -> Result<()> {
        let body = serde_json::to_vec_pretty(models)
            .map_err(|e| Error::Persistence(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Persistence(format!("create {:?}: {}", parent, e)))?;
        }

        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body)
            .await
            .map_err(|e| Error::Persistence(format!("write {:?}: {}", tmp, e)))?;
        tokio::fs::rename(&tmp, &self.path)
            .await
            .map_err(|e| Error::Persistence(format!("rename {:?}: {}", tmp, e)))?;

        debug!(path = ?self.path, models = models.len(), "Registry snapshot written");
        Ok(())
    }
}

fn merge_entry(existing: &ModelDescriptor, overlay: Value) -> Result<ModelDescriptor> {
    let Value::Object(fields) = overlay else {
        return Err(Error::Persistence("snapshot entry is not an object".into()));
    };

    let mut base = serde_json::to_value(existing).map_err(|e| Error::Persistence(e.to_string()))?;
    if let Value::Object(base_fields) = &mut base {
        for (key, value) in fields {
            base_fields.insert(key, value);
        }
    }

    let mut merged: ModelDescriptor =
        serde_json::from_value(base).map_err(|e| Error::Persistence(e.to_string()))?;
    // credentials are never persisted
    merged.api_key.clone_from(&existing.api_key);
    Ok(merged)
}

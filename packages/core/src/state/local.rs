//! State records kept on the operator machine
//!
//! One JSON file per host namespace, saved with a `.bak` of the previous
//! version like the inventory and config files.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use super::{StateError, StateRecord, StateStore, StateValue};
use crate::host::file_stem;

pub struct LocalStateStore {
    path: PathBuf,
    record: StateRecord,
}

impl LocalStateStore {
    /// Open (or start) the record for `namespace` under `dir`
    pub fn open(dir: &Path, namespace: &str) -> Result<Self, StateError> {
        let path = dir.join(format!("{}.json", file_stem(namespace)));
        let record = if path.exists() {
            let text = fs::read_to_string(&path).map_err(|e| StateError::Io {
                host: namespace.to_string(),
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;
            serde_json::from_str(&text).map_err(|e| StateError::Corrupt {
                host: namespace.to_string(),
                path: path.display().to_string(),
                reason: e.to_string(),
            })?
        } else {
            StateRecord::new(namespace)
        };
        Ok(Self { path, record })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn save(&self) -> Result<(), StateError> {
        let io = |e: std::io::Error| StateError::Io {
            host: self.record.host.clone(),
            path: self.path.display().to_string(),
            reason: e.to_string(),
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(io)?;
        }
        if self.path.exists() {
            fs::copy(&self.path, self.path.with_extension("json.bak")).map_err(io)?;
        }
        let json = self.record.to_json().map_err(|e| StateError::Io {
            host: self.record.host.clone(),
            path: self.path.display().to_string(),
            reason: e.to_string(),
        })?;
        fs::write(&self.path, json).map_err(io)?;
        tracing::debug!("Saved state for {} to {}", self.record.host, self.path.display());
        Ok(())
    }
}

impl StateStore for LocalStateStore {
    fn namespace(&self) -> &str {
        &self.record.host
    }

    fn get(&self, key: &str) -> Result<Option<StateValue>, StateError> {
        Ok(self.record.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: StateValue) -> Result<(), StateError> {
        if self.record.entries.get(key) == Some(&value) {
            return Ok(());
        }
        self.record.set(key, value);
        self.save()
    }

    fn delete(&mut self, key: &str) -> Result<bool, StateError> {
        if !self.record.remove(key) {
            return Ok(false);
        }
        self.save()?;
        Ok(true)
    }

    fn entries(&self) -> Result<BTreeMap<String, StateValue>, StateError> {
        Ok(self.record.entries.clone())
    }
}

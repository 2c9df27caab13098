//! State record kept on the managed host itself
//!
//! The record lives in one JSON document under /var/local, so any operator
//! machine sees the same history for a host.

use std::cell::RefCell;
use std::collections::BTreeMap;

use super::{StateError, StateRecord, StateStore, StateValue};
use crate::remote::{Privilege, Remote, shell_quote};

pub const REMOTE_STATE_DIR: &str = "/var/local/hostkeep";
pub const REMOTE_STATE_PATH: &str = "/var/local/hostkeep/state.json";

/// Store backed by [`REMOTE_STATE_PATH`] on the connected host
///
/// The record is read once per store and cached; writes go straight through.
pub struct RemoteStateStore<'a> {
    remote: &'a dyn Remote,
    namespace: String,
    cache: RefCell<Option<StateRecord>>,
}

impl<'a> RemoteStateStore<'a> {
    pub fn new(remote: &'a dyn Remote) -> Self {
        Self {
            namespace: remote.identity().namespace().to_string(),
            remote,
            cache: RefCell::new(None),
        }
    }

    fn host(&self) -> String {
        self.remote.identity().to_string()
    }

    fn load(&self) -> Result<StateRecord, StateError> {
        if let Some(record) = self.cache.borrow().as_ref() {
            return Ok(record.clone());
        }

        let record = match self.remote.read_file(REMOTE_STATE_PATH, Privilege::User)? {
            None => StateRecord::new(self.namespace.clone()),
            Some(text) if text.trim().is_empty() => StateRecord::new(self.namespace.clone()),
            Some(text) => {
                let record: StateRecord =
                    serde_json::from_str(&text).map_err(|e| StateError::Corrupt {
                        host: self.host(),
                        path: REMOTE_STATE_PATH.to_string(),
                        reason: e.to_string(),
                    })?;
                if record.host != self.namespace {
                    // same machine reached under another name
                    tracing::warn!(
                        "[{}] state record was written for '{}'",
                        self.host(),
                        record.host
                    );
                }
                record
            }
        };

        *self.cache.borrow_mut() = Some(record.clone());
        Ok(record)
    }

    fn save(&self, record: StateRecord) -> Result<(), StateError> {
        let json = record.to_json().map_err(|e| StateError::Io {
            host: self.host(),
            path: REMOTE_STATE_PATH.to_string(),
            reason: e.to_string(),
        })?;
        if !self.remote.exists(REMOTE_STATE_DIR, Privilege::User)? {
            self.remote.sudo(&format!(
                "mkdir -p -- {}",
                shell_quote(REMOTE_STATE_DIR)
            ))?;
        }
        self.remote
            .write_file(REMOTE_STATE_PATH, &json, Privilege::Root)?;
        *self.cache.borrow_mut() = Some(record);
        Ok(())
    }
}

impl StateStore for RemoteStateStore<'_> {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn get(&self, key: &str) -> Result<Option<StateValue>, StateError> {
        Ok(self.load()?.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: StateValue) -> Result<(), StateError> {
        let mut record = self.load()?;
        if record.entries.get(key) == Some(&value) {
            return Ok(());
        }
        record.set(key, value);
        tracing::debug!("[{}] state {} recorded", self.host(), key);
        self.save(record)
    }

    fn delete(&mut self, key: &str) -> Result<bool, StateError> {
        let mut record = self.load()?;
        if !record.remove(key) {
            return Ok(false);
        }
        tracing::debug!("[{}] state {} deleted", self.host(), key);
        self.save(record)?;
        Ok(true)
    }

    fn entries(&self) -> Result<BTreeMap<String, StateValue>, StateError> {
        Ok(self.load()?.entries)
    }
}

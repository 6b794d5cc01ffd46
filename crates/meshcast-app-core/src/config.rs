// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Preference persistence: a JSON codec over a pluggable byte store.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use thiserror::Error;

/// Byte-level storage behind [`ConfigService`], addressed by preference key
/// (`"viewer"`, `"host"`).
pub trait ConfigStore {
    /// Raw bytes stored under `key`, or [`ConfigError::NotFound`].
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Replace the bytes stored under `key`.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Preference load/save failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Nothing stored under the key yet.
    #[error("no stored preferences for this key")]
    NotFound,
    /// Backing file could not be read or written.
    #[error("preference i/o failed: {0}")]
    Io(#[from] std::io::Error),
    /// Stored bytes are not valid JSON for the requested type.
    #[error("malformed preferences: {0}")]
    Serde(#[from] serde_json::Error),
    /// The store itself is unusable (no config dir, poisoned lock).
    #[error("preference store unavailable: {0}")]
    Unavailable(String),
}

/// JSON codec in front of a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Wrap `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }
}

impl<S: ConfigStore> ConfigService<S> {
    /// Decode the value stored under `key`. Missing and empty entries are
    /// `Ok(None)`; unreadable ones are errors.
    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, ConfigError> {
        let bytes = match self.store.load_raw(key) {
            Err(ConfigError::NotFound) => return Ok(None),
            other => other?,
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Encode `value` as pretty JSON under `key`.
    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), ConfigError> {
        self.store.save_raw(key, &serde_json::to_vec_pretty(value)?)
    }
}

/// In-process store, for tests and ephemeral tools.
#[derive(Debug, Default)]
pub struct MemoryConfigStore {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryConfigStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<MutexGuard<'_, HashMap<String, Vec<u8>>>, ConfigError> {
        self.entries
            .lock()
            .map_err(|_| ConfigError::Unavailable("memory store lock poisoned".into()))
    }
}

impl ConfigStore for MemoryConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        self.entries()?.get(key).cloned().ok_or(ConfigError::NotFound)
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        self.entries()?.insert(key.to_owned(), data.to_vec());
        Ok(())
    }
}

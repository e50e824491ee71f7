// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Storage port for configuration blobs and the JSON service layered on it.

use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use crate::domain::{DomainConfig, DOMAIN_KEY};

/// Raw blob storage keyed by logical name (`"domain"`, ...).
pub trait ConfigStore {
    /// Returns the blob for `key`, or `ConfigError::NotFound`.
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError>;
    /// Replaces the blob for `key`.
    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError>;
}

/// Configuration failures.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Key not present in store.
    #[error("not found")]
    NotFound,
    /// Store I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// JSON (de)serialization failed.
    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),
    /// Two resource-manager properties share a key.
    #[error("duplicate resource property key: {0}")]
    DuplicateProperty(String),
    /// Two resources share a name.
    #[error("duplicate resource name: {0}")]
    DuplicateResource(String),
    /// Store-specific failure.
    #[error("other: {0}")]
    Other(String),
}

/// JSON (de)serialization on top of a [`ConfigStore`].
pub struct ConfigService<S> {
    store: S,
}

impl<S> ConfigService<S> {
    /// Wraps `store`.
    pub fn new(store: S) -> Self {
        Self { store }
    }

    /// Returns the wrapped store.
    pub fn into_inner(self) -> S {
        self.store
    }
}

impl<S> ConfigService<S>
where
    S: ConfigStore,
{
    /// Loads `key`; a missing or empty blob is `Ok(None)`.
    pub fn load<T>(&self, key: &str) -> Result<Option<T>, ConfigError>
    where
        T: DeserializeOwned,
    {
        let bytes = match self.store.load_raw(key) {
            Ok(bytes) => bytes,
            Err(ConfigError::NotFound) => return Ok(None),
            Err(e) => return Err(e),
        };
        if bytes.is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Stores `value` as pretty JSON under `key`.
    pub fn save<T>(&self, key: &str, value: &T) -> Result<(), ConfigError>
    where
        T: Serialize,
    {
        let data = serde_json::to_vec_pretty(value)?;
        self.store.save_raw(key, &data)
    }

    /// Loads the domain configuration, falling back to an empty domain.
    pub fn load_domain(&self) -> Result<DomainConfig, ConfigError> {
        Ok(self.load(DOMAIN_KEY)?.unwrap_or_default())
    }

    /// Stores the domain configuration.
    pub fn save_domain(&self, domain: &DomainConfig) -> Result<(), ConfigError> {
        self.save(DOMAIN_KEY, domain)
    }
}

impl DomainConfig {
    /// Reads a domain configuration from an explicit JSON file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Filesystem-backed `ConfigStore` (platform config dir) and the default
//! transaction log location (platform data dir).

use directories::ProjectDirs;
use std::fs;
use std::path::{Path, PathBuf};
use xatm_config::{ConfigError, ConfigStore};

fn project() -> Result<ProjectDirs, ConfigError> {
    ProjectDirs::from("dev", "flyingrobots", "xatm")
        .ok_or_else(|| ConfigError::Other("could not resolve config dir".into()))
}

/// Stores each key as `<key>.json` under a base directory.
pub struct FsConfigStore {
    base: PathBuf,
}

impl FsConfigStore {
    /// Store rooted at the user config directory (e.g. `~/.config/xatm`).
    pub fn new() -> Result<Self, ConfigError> {
        Self::at(project()?.config_dir())
    }

    /// Store rooted at `base`, created if missing.
    pub fn at(base: &Path) -> Result<Self, ConfigError> {
        fs::create_dir_all(base)?;
        Ok(Self {
            base: base.to_path_buf(),
        })
    }

    /// Directory the store writes to.
    pub fn base(&self) -> &Path {
        &self.base
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base.join(format!("{key}.json"))
    }
}

impl ConfigStore for FsConfigStore {
    fn load_raw(&self, key: &str) -> Result<Vec<u8>, ConfigError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(ConfigError::NotFound),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn save_raw(&self, key: &str, data: &[u8]) -> Result<(), ConfigError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, data)?;
        Ok(())
    }
}

/// Default transaction log path: `<data dir>/transaction/log.jsonl`.
pub fn default_log_path() -> Result<PathBuf, ConfigError> {
    let dir = project()?.data_dir().join("transaction");
    fs::create_dir_all(&dir)?;
    Ok(dir.join("log.jsonl"))
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn missing_key_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsConfigStore::at(dir.path()).unwrap();
        assert!(matches!(store.load_raw("domain"), Err(ConfigError::NotFound)));
    }

    #[test]
    fn saved_blob_lands_in_key_json() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsConfigStore::at(&dir.path().join("nested")).unwrap();
        store.save_raw("domain", b"{}").unwrap();
        assert!(store.base().join("domain.json").exists());
        assert_eq!(store.load_raw("domain").unwrap(), b"{}");
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]

use xatm_config::{ConfigError, ConfigService, DomainConfig, DOMAIN_KEY};
use xatm_dry_tests::{fixtures, InMemoryConfigStore};

#[test]
fn missing_domain_loads_as_empty() {
    let store = InMemoryConfigStore::new();
    let service = ConfigService::new(store.clone());
    assert_eq!(service.load_domain().unwrap(), DomainConfig::default());
    assert_eq!(store.load_count(), 1);
}

#[test]
fn domain_survives_save_and_load() {
    let store = InMemoryConfigStore::new();
    let service = ConfigService::new(store.clone());
    let domain = fixtures::domain(&[("rm-a", 2), ("rm-b", 1)]);
    service.save_domain(&domain).unwrap();
    assert!(store.contains_key(DOMAIN_KEY));
    assert_eq!(service.load_domain().unwrap(), domain);
}

#[test]
fn store_failures_surface() {
    let store = InMemoryConfigStore::new();
    store.set_fail_on_load(true);
    let service = ConfigService::new(store);
    assert!(matches!(service.load_domain(), Err(ConfigError::Other(_))));
}

#[test]
fn explicit_file_is_read() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("domain.json");
    let domain = fixtures::domain(&[("rm-a", 3)]);
    std::fs::write(&path, serde_json::to_vec(&domain).unwrap()).unwrap();
    assert_eq!(DomainConfig::from_file(&path).unwrap(), domain);
    assert!(matches!(
        DomainConfig::from_file(&dir.path().join("absent.json")),
        Err(ConfigError::Io(_))
    ));
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Configuration for the transaction manager: the domain model, the storage
//! port and the serde service on top of it.

pub mod config;
pub mod domain;

pub use config::{ConfigError, ConfigService, ConfigStore};
pub use domain::{
    expand, DomainConfig, ResolvedResource, ResourceConfig, ResourceProblem, ResourceProperty,
    TransactionConfig, DOMAIN_KEY,
};

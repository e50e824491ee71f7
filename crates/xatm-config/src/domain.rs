// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Domain configuration: resources the transaction manager coordinates and the
//! resource-manager property table they refer to.

use std::collections::BTreeSet;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use xatm_proto::ResourceId;

use crate::ConfigError;

/// Store key for the domain configuration.
pub const DOMAIN_KEY: &str = "domain";

/// Top-level configuration of one domain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainConfig {
    /// Transaction manager section.
    pub transaction: TransactionConfig,
    /// Resource-manager properties, keyed by [`ResourceProperty::key`].
    pub properties: Vec<ResourceProperty>,
}

/// Transaction manager section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Transaction log file; empty selects the platform data directory.
    pub log: PathBuf,
    /// Resources in id order.
    pub resources: Vec<ResourceConfig>,
}

/// One configured resource proxy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Unique resource name.
    pub name: String,
    /// Resource-manager property key.
    pub key: String,
    /// Number of proxy instances.
    #[serde(default = "default_instances")]
    pub instances: usize,
    /// `xa_open` info; `${VAR}` is expanded from the environment.
    #[serde(default)]
    pub openinfo: String,
    /// `xa_close` info; `${VAR}` is expanded from the environment.
    #[serde(default)]
    pub closeinfo: String,
    /// Free-form operator note.
    #[serde(default)]
    pub note: String,
}

const fn default_instances() -> usize {
    1
}

/// Resource-manager property: how to reach a kind of resource manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceProperty {
    /// Key resources refer to.
    pub key: String,
    /// Registered switch implementation.
    pub switch: String,
    /// Name of the XA switch structure exported by the resource manager.
    #[serde(default)]
    pub xa_struct_name: String,
    /// Proxy server that hosts the switch.
    #[serde(default)]
    pub server: String,
}

/// Why a resource is unavailable.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ResourceProblem {
    /// No property with the resource's key.
    #[error("unknown resource key '{0}'")]
    UnknownKey(String),
    /// `openinfo`/`closeinfo` references an unset environment variable.
    #[error("environment variable '{0}' is not set")]
    UnsetVariable(String),
    /// The property names a switch the host does not provide.
    #[error("no switch named '{0}'")]
    UnknownSwitch(String),
}

/// A resource after validation and `${VAR}` expansion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedResource {
    /// Assigned id (1-based, configuration order).
    pub id: ResourceId,
    /// Configuration with expanded info strings.
    pub config: ResourceConfig,
    /// Property the key resolved to.
    pub property: Option<ResourceProperty>,
    /// Set when the resource must not take work.
    pub problem: Option<ResourceProblem>,
}

impl ResolvedResource {
    /// True when the resource can take work.
    pub fn available(&self) -> bool {
        self.problem.is_none()
    }
}

impl DomainConfig {
    /// Validates and expands the resource list against the process environment.
    pub fn resolve(&self) -> Result<Vec<ResolvedResource>, ConfigError> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    /// Validates and expands the resource list using `lookup` for `${VAR}`.
    ///
    /// Duplicate property keys and duplicate resource names are hard errors.
    /// A resource with an unknown key or an unset variable is returned with
    /// its `problem` set.
    pub fn resolve_with<F>(&self, lookup: F) -> Result<Vec<ResolvedResource>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut keys = BTreeSet::new();
        for property in &self.properties {
            if !keys.insert(property.key.as_str()) {
                return Err(ConfigError::DuplicateProperty(property.key.clone()));
            }
        }
        let mut names = BTreeSet::new();
        for resource in &self.transaction.resources {
            if !names.insert(resource.name.as_str()) {
                return Err(ConfigError::DuplicateResource(resource.name.clone()));
            }
        }

        let mut resolved = Vec::with_capacity(self.transaction.resources.len());
        for (index, resource) in self.transaction.resources.iter().enumerate() {
            let id = ResourceId::Local(u32::try_from(index + 1).map_err(|_| {
                ConfigError::Other(format!("too many resources: {}", index + 1))
            })?);
            let property = self
                .properties
                .iter()
                .find(|p| p.key == resource.key)
                .cloned();
            let mut config = resource.clone();
            let mut problem = None;
            if property.is_none() {
                problem = Some(ResourceProblem::UnknownKey(resource.key.clone()));
            }
            match (
                expand(&resource.openinfo, &lookup),
                expand(&resource.closeinfo, &lookup),
            ) {
                (Ok(open), Ok(close)) => {
                    config.openinfo = open;
                    config.closeinfo = close;
                }
                (Err(e), _) | (_, Err(e)) => {
                    problem.get_or_insert(e);
                }
            }
            resolved.push(ResolvedResource {
                id,
                config,
                property,
                problem,
            });
        }
        Ok(resolved)
    }
}

/// Expands `${VAR}` references in `text`.
///
/// An unterminated `${` is copied literally.
pub fn expand<F>(text: &str, lookup: F) -> Result<String, ResourceProblem>
where
    F: Fn(&str) -> Option<String>,
{
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            out.push_str(&rest[start..]);
            return Ok(out);
        };
        let name = &after[..end];
        let value = lookup(name).ok_or_else(|| ResourceProblem::UnsetVariable(name.to_string()))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    fn env(name: &str) -> Option<String> {
        match name {
            "DB_USER" => Some("casual".into()),
            "DB_NAME" => Some("orders".into()),
            _ => None,
        }
    }

    fn resource(name: &str, key: &str, openinfo: &str) -> ResourceConfig {
        ResourceConfig {
            name: name.into(),
            key: key.into(),
            instances: 2,
            openinfo: openinfo.into(),
            closeinfo: String::new(),
            note: String::new(),
        }
    }

    fn property(key: &str) -> ResourceProperty {
        ResourceProperty {
            key: key.into(),
            switch: "mockup".into(),
            xa_struct_name: "xatm_mockup_xa_switch_static".into(),
            server: String::new(),
        }
    }

    #[test]
    fn expands_variables() {
        assert_eq!(
            expand("user=${DB_USER} db=${DB_NAME}", env).unwrap(),
            "user=casual db=orders"
        );
        assert_eq!(expand("plain", env).unwrap(), "plain");
        assert_eq!(expand("open ${DB_USER", env).unwrap(), "open ${DB_USER");
        assert_eq!(
            expand("${MISSING}", env),
            Err(ResourceProblem::UnsetVariable("MISSING".into()))
        );
    }

    #[test]
    fn duplicate_property_keys_are_rejected() {
        let domain = DomainConfig {
            properties: vec![property("rm"), property("rm")],
            ..DomainConfig::default()
        };
        assert!(matches!(
            domain.resolve_with(env),
            Err(ConfigError::DuplicateProperty(key)) if key == "rm"
        ));
    }

    #[test]
    fn bad_resources_are_marked_unavailable_not_fatal() {
        let domain = DomainConfig {
            transaction: TransactionConfig {
                log: PathBuf::new(),
                resources: vec![
                    resource("good", "rm", "--user ${DB_USER}"),
                    resource("no-key", "nope", ""),
                    resource("no-env", "rm", "${MISSING}"),
                ],
            },
            properties: vec![property("rm")],
        };
        let resolved = domain.resolve_with(env).unwrap();
        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved[0].id, ResourceId::Local(1));
        assert!(resolved[0].available());
        assert_eq!(resolved[0].config.openinfo, "--user casual");
        assert_eq!(
            resolved[1].problem,
            Some(ResourceProblem::UnknownKey("nope".into()))
        );
        assert_eq!(
            resolved[2].problem,
            Some(ResourceProblem::UnsetVariable("MISSING".into()))
        );
        assert_eq!(resolved[2].id, ResourceId::Local(3));
    }

    #[test]
    fn instances_default_to_one() {
        let json = r#"{"name":"a","key":"rm"}"#;
        let parsed: ResourceConfig = serde_json::from_str(json).unwrap();
        assert_eq!(parsed.instances, 1);
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Domain configurations and resolved resources.

use xatm_config::{DomainConfig, ResolvedResource, ResourceConfig, ResourceProblem, ResourceProperty};
use xatm_proto::ResourceId;

/// Property key every fixture resource uses.
pub const KEY: &str = "mockup-rm";

/// Property mapping [`KEY`] to the bundled mock-up switch.
pub fn property() -> ResourceProperty {
    ResourceProperty {
        key: KEY.into(),
        switch: "mockup".into(),
        xa_struct_name: "mockup_xa_switch".into(),
        server: "xatm-resource-proxy".into(),
    }
}

/// A mock-up resource named `name`.
pub fn resource(name: &str, instances: usize) -> ResourceConfig {
    ResourceConfig {
        name: name.into(),
        key: KEY.into(),
        instances,
        openinfo: String::new(),
        closeinfo: String::new(),
        note: format!("fixture {name}"),
    }
}

/// Domain with one mock-up resource per `(name, instances)`.
pub fn domain(resources: &[(&str, usize)]) -> DomainConfig {
    let mut domain = DomainConfig::default();
    domain.properties.push(property());
    domain.transaction.resources = resources
        .iter()
        .map(|(name, instances)| resource(name, *instances))
        .collect();
    domain
}

/// Resolved, available resources with ids `Local(1..)`.
pub fn resolved(resources: &[(&str, usize)]) -> Vec<ResolvedResource> {
    resources
        .iter()
        .zip(1..)
        .map(|((name, instances), id)| ResolvedResource {
            id: ResourceId::Local(id),
            config: resource(name, *instances),
            property: Some(property()),
            problem: None,
        })
        .collect()
}

/// Marks `resource` unavailable because of an unknown key.
pub fn unavailable(mut resource: ResolvedResource) -> ResolvedResource {
    resource.property = None;
    resource.problem = Some(ResourceProblem::UnknownKey(resource.config.key.clone()));
    resource
}

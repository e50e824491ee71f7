// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Process and resource identities.

use serde::{Deserialize, Serialize};

/// Process identity. Every message is addressed to one.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Pid(pub u32);

impl core::fmt::Display for Pid {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of a transaction participant.
///
/// `Local` ids name configured resource proxies. `Domain` ids are handed out
/// by the coordinator to remote-domain gateways the first time they enlist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceId {
    /// Configured resource proxy.
    Local(u32),
    /// Remote domain reached through a gateway process.
    Domain(u32),
}

impl ResourceId {
    /// True for configured resource proxies.
    pub const fn is_local(self) -> bool {
        matches!(self, Self::Local(_))
    }

    /// True for remote-domain participants.
    pub const fn is_domain(self) -> bool {
        matches!(self, Self::Domain(_))
    }
}

impl core::fmt::Display for ResourceId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Local(id) => write!(f, "rm:{id}"),
            Self::Domain(id) => write!(f, "domain:{id}"),
        }
    }
}

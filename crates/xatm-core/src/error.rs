// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Errors raised by registry and pool bookkeeping.
//!
//! These never reach an owner as XA codes; the coordinator answers them with
//! an `error` message instead.

use thiserror::Error;
use xatm_proto::{Pid, ResourceId, Xid};

/// Bookkeeping failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StateError {
    /// No resource with this id is configured (or known as a domain).
    #[error("unknown resource {0}")]
    UnknownResource(ResourceId),
    /// The resource failed validation at boot, or none of its instances
    /// could open it.
    #[error("resource {resource} unavailable: {reason}")]
    ResourceUnavailable {
        /// Resource id.
        resource: ResourceId,
        /// Why the resource is unavailable.
        reason: String,
    },
    /// No resource-proxy instance runs as this process.
    #[error("unknown resource instance {0}")]
    UnknownInstance(Pid),
    /// The null xid carries no transaction.
    #[error("null xid")]
    NullXid,
    /// New participants cannot join once commit or rollback has started.
    #[error("transaction {0} is already completing")]
    Completing(Xid),
    /// The coordinator is shutting down.
    #[error("shutting down")]
    ShuttingDown,
}

impl StateError {
    /// Stable error name used in `error` messages.
    pub fn name(&self) -> &'static str {
        match self {
            Self::UnknownResource(_) => "E_UNKNOWN_RESOURCE",
            Self::ResourceUnavailable { .. } => "E_RESOURCE_UNAVAILABLE",
            Self::UnknownInstance(_) => "E_UNKNOWN_INSTANCE",
            Self::NullXid => "E_NULL_XID",
            Self::Completing(_) => "E_TRANSACTION_COMPLETING",
            Self::ShuttingDown => "E_SHUTDOWN",
        }
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! XA switch contract.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use xatm_proto::{XaCode, XaFlags, Xid};

use crate::MockupSwitch;

/// One XA call against a resource-manager session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// `xa_open`; called once when the instance starts.
    Open {
        /// Expanded open string.
        info: String,
        /// Flags.
        flags: XaFlags,
    },
    /// `xa_close`; called once when the instance stops.
    Close {
        /// Expanded close string.
        info: String,
        /// Flags.
        flags: XaFlags,
    },
    /// `xa_start`
    Start {
        /// Branch.
        xid: Xid,
        /// Flags.
        flags: XaFlags,
    },
    /// `xa_end`
    End {
        /// Branch.
        xid: Xid,
        /// Flags.
        flags: XaFlags,
    },
    /// `xa_prepare`
    Prepare {
        /// Branch.
        xid: Xid,
        /// Flags.
        flags: XaFlags,
    },
    /// `xa_commit`
    Commit {
        /// Branch.
        xid: Xid,
        /// Flags (`ONE_PHASE` for a one-phase commit).
        flags: XaFlags,
    },
    /// `xa_rollback`
    Rollback {
        /// Branch.
        xid: Xid,
        /// Flags.
        flags: XaFlags,
    },
    /// `xa_recover`; lists branches the resource holds prepared.
    Recover {
        /// Scan flags.
        flags: XaFlags,
    },
    /// `xa_forget`
    Forget {
        /// Branch.
        xid: Xid,
        /// Flags.
        flags: XaFlags,
    },
}

impl Operation {
    /// XA entry point name, for logs.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Open { .. } => "xa_open",
            Self::Close { .. } => "xa_close",
            Self::Start { .. } => "xa_start",
            Self::End { .. } => "xa_end",
            Self::Prepare { .. } => "xa_prepare",
            Self::Commit { .. } => "xa_commit",
            Self::Rollback { .. } => "xa_rollback",
            Self::Recover { .. } => "xa_recover",
            Self::Forget { .. } => "xa_forget",
        }
    }

    /// Branch the call is about, if it is transaction-scoped.
    pub const fn xid(&self) -> Option<&Xid> {
        match self {
            Self::Start { xid, .. }
            | Self::End { xid, .. }
            | Self::Prepare { xid, .. }
            | Self::Commit { xid, .. }
            | Self::Rollback { xid, .. }
            | Self::Forget { xid, .. } => Some(xid),
            Self::Open { .. } | Self::Close { .. } | Self::Recover { .. } => None,
        }
    }
}

/// Result of a switch call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    /// XA return code.
    pub code: XaCode,
    /// Branches reported by `xa_recover`; empty for every other call.
    pub xids: Vec<Xid>,
}

impl Outcome {
    /// An outcome carrying only a code.
    pub const fn code(code: XaCode) -> Self {
        Self {
            code,
            xids: Vec::new(),
        }
    }
}

/// An XA resource-manager session.
///
/// Implementations are called from one instance worker at a time and may
/// block.
pub trait Switch: Send {
    /// Performs one XA call.
    fn dispatch(&mut self, operation: Operation) -> Outcome;
}

/// Builds a fresh switch session.
pub type SwitchFactory = Arc<dyn Fn() -> Box<dyn Switch> + Send + Sync>;

/// Switch lookup failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwitchError {
    /// No switch registered under this name.
    #[error("no switch registered as '{0}'")]
    Unknown(String),
}

/// Switch implementations by name.
#[derive(Clone, Default)]
pub struct SwitchRegistry {
    factories: BTreeMap<String, SwitchFactory>,
}

impl SwitchRegistry {
    /// Registry holding the bundled switches (`mockup`).
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register(
            "mockup",
            Arc::new(|| -> Box<dyn Switch> { Box::new(MockupSwitch::default()) }),
        );
        registry
    }

    /// Registers (or replaces) a switch under `name`.
    pub fn register(&mut self, name: impl Into<String>, factory: SwitchFactory) {
        self.factories.insert(name.into(), factory);
    }

    /// True when `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Opens a new session of the switch registered as `name`.
    pub fn create(&self, name: &str) -> Result<Box<dyn Switch>, SwitchError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| SwitchError::Unknown(name.to_string()))
    }
}

impl std::fmt::Debug for SwitchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SwitchRegistry")
            .field("switches", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scripted XA switch that records its calls.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};

use xatm_proto::{XaCode, Xid};
use xatm_resource::{Operation, Outcome, Switch};

/// Shared record of the calls a [`ScriptedSwitch`] received.
#[derive(Clone, Default)]
pub struct SwitchCalls(Arc<Mutex<Vec<Operation>>>);

impl SwitchCalls {
    fn push(&self, operation: Operation) {
        self.0
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(operation);
    }

    /// Every call, in order.
    pub fn all(&self) -> Vec<Operation> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// XA entry point names, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.all().iter().map(Operation::name).collect()
    }
}

/// Switch answering from a per-entry-point script; unscripted calls get
/// `XA_OK`.
#[derive(Default)]
pub struct ScriptedSwitch {
    script: BTreeMap<&'static str, VecDeque<Outcome>>,
    calls: SwitchCalls,
}

impl ScriptedSwitch {
    /// Switch answering `XA_OK` to everything.
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle on the calls this switch will record.
    pub fn calls(&self) -> SwitchCalls {
        self.calls.clone()
    }

    /// Queues `code` as the next answer of entry point `call`
    /// (e.g. `"xa_prepare"`).
    pub fn then(mut self, call: &'static str, code: XaCode) -> Self {
        self.script
            .entry(call)
            .or_default()
            .push_back(Outcome::code(code));
        self
    }

    /// Queues an `xa_recover` answer listing `xids`.
    pub fn recovering(mut self, xids: Vec<Xid>) -> Self {
        self.script
            .entry("xa_recover")
            .or_default()
            .push_back(Outcome {
                code: XaCode::Ok,
                xids,
            });
        self
    }
}

impl Switch for ScriptedSwitch {
    fn dispatch(&mut self, operation: Operation) -> Outcome {
        let outcome = self
            .script
            .get_mut(operation.name())
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Outcome::code(XaCode::Ok));
        self.calls.push(operation);
        outcome
    }
}

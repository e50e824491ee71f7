// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Mock-up resource manager.
//!
//! Every call succeeds unless `openinfo` says otherwise:
//!
//! ```text
//! --prepare XA_RDONLY --commit XAER_RMERR --rollback -3
//! ```
//!
//! Options are `--open`, `--close`, `--start`, `--end`, `--prepare`,
//! `--commit` and `--rollback`; each takes an `xa.h` name or numeric value.
//! The mock-up remembers the branches it prepared, reports them from
//! `xa_recover`, and answers `XAER_PROTO` to a second prepare of the same
//! branch.

use std::collections::BTreeSet;

use tracing::{debug, warn};
use xatm_proto::{XaCode, Xid};

use crate::{Operation, Outcome, Switch};

/// Scripted results of a mock-up session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockupResults {
    /// `xa_open`
    pub open: XaCode,
    /// `xa_close`
    pub close: XaCode,
    /// `xa_start`
    pub start: XaCode,
    /// `xa_end`
    pub end: XaCode,
    /// `xa_prepare`
    pub prepare: XaCode,
    /// `xa_commit`
    pub commit: XaCode,
    /// `xa_rollback`
    pub rollback: XaCode,
}

impl Default for MockupResults {
    fn default() -> Self {
        Self {
            open: XaCode::Ok,
            close: XaCode::Ok,
            start: XaCode::Ok,
            end: XaCode::Ok,
            prepare: XaCode::Ok,
            commit: XaCode::Ok,
            rollback: XaCode::Ok,
        }
    }
}

impl MockupResults {
    /// Parses an open string. Unknown options and bad codes are skipped with
    /// a warning.
    pub fn parse(info: &str) -> Self {
        let mut results = Self::default();
        let mut words = info.split_whitespace();
        while let Some(option) = words.next() {
            let slot = match option {
                "--open" => &mut results.open,
                "--close" => &mut results.close,
                "--start" => &mut results.start,
                "--end" => &mut results.end,
                "--prepare" => &mut results.prepare,
                "--commit" => &mut results.commit,
                "--rollback" => &mut results.rollback,
                other => {
                    warn!(option = other, "mockup: unknown openinfo option");
                    continue;
                }
            };
            match words.next().map(str::parse::<XaCode>) {
                Some(Ok(code)) => *slot = code,
                Some(Err(err)) => warn!(option, %err, "mockup: bad openinfo value"),
                None => warn!(option, "mockup: openinfo option without value"),
            }
        }
        results
    }
}

/// In-memory resource manager with scripted results.
#[derive(Debug, Default)]
pub struct MockupSwitch {
    results: MockupResults,
    prepared: BTreeSet<Xid>,
}

impl MockupSwitch {
    /// A session that will answer with `results` from the first call.
    pub fn with_results(results: MockupResults) -> Self {
        Self {
            results,
            prepared: BTreeSet::new(),
        }
    }

    /// Branches currently held prepared.
    pub fn prepared(&self) -> impl Iterator<Item = &Xid> {
        self.prepared.iter()
    }
}

impl Switch for MockupSwitch {
    fn dispatch(&mut self, operation: Operation) -> Outcome {
        debug!(call = operation.name(), xid = ?operation.xid(), "mockup");
        let code = match operation {
            Operation::Open { info, .. } => {
                self.results = MockupResults::parse(&info);
                self.results.open
            }
            Operation::Close { .. } => self.results.close,
            Operation::Start { .. } => self.results.start,
            Operation::End { .. } => self.results.end,
            Operation::Prepare { xid, .. } => {
                if self.prepared.contains(&xid) {
                    XaCode::Protocol
                } else {
                    let code = self.results.prepare;
                    if code == XaCode::Ok {
                        self.prepared.insert(xid);
                    }
                    code
                }
            }
            Operation::Commit { xid, .. } => {
                self.prepared.remove(&xid);
                self.results.commit
            }
            Operation::Rollback { xid, .. } => {
                self.prepared.remove(&xid);
                self.results.rollback
            }
            Operation::Recover { .. } => {
                return Outcome {
                    code: XaCode::Ok,
                    xids: self.prepared.iter().cloned().collect(),
                }
            }
            Operation::Forget { xid, .. } => {
                self.prepared.remove(&xid);
                XaCode::Ok
            }
        };
        Outcome::code(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use xatm_proto::XaFlags;

    #[test]
    fn openinfo_scripts_results() {
        let results = MockupResults::parse("--prepare XA_RDONLY --commit -3 --bogus --rollback nope");
        assert_eq!(results.prepare, XaCode::ReadOnly);
        assert_eq!(results.commit, XaCode::ResourceError);
        assert_eq!(results.rollback, XaCode::Ok);
        assert_eq!(results.open, XaCode::Ok);
    }

    #[test]
    fn second_prepare_is_a_protocol_error_and_recover_lists_it() {
        let mut rm = MockupSwitch::default();
        let xid = Xid::create();
        let prepare = || Operation::Prepare {
            xid: xid.clone(),
            flags: XaFlags::NO_FLAGS,
        };
        assert_eq!(rm.dispatch(prepare()).code, XaCode::Ok);
        assert_eq!(rm.dispatch(prepare()).code, XaCode::Protocol);
        let recovered = rm.dispatch(Operation::Recover {
            flags: XaFlags::START_SCAN | XaFlags::END_SCAN,
        });
        assert_eq!(recovered.xids, vec![xid.clone()]);

        rm.dispatch(Operation::Commit {
            xid,
            flags: XaFlags::NO_FLAGS,
        });
        assert_eq!(rm.prepared().count(), 0);
    }

    #[test]
    fn failed_open_is_reported() {
        let mut rm = MockupSwitch::default();
        let outcome = rm.dispatch(Operation::Open {
            info: "--open XAER_RMERR".into(),
            flags: XaFlags::NO_FLAGS,
        });
        assert_eq!(outcome.code, XaCode::ResourceError);
    }
}

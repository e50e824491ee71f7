// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Serving an upstream domain.
//!
//! An upstream coordinator treats this whole domain as one resource: its
//! gateway forwards prepare, commit and rollback requests here and the
//! coordinator answers with the aggregate outcome of its own participants.

use std::time::Duration;

use tracing::{debug, info, warn};
use uuid::Uuid;
use xatm_proto::{Message, Phase, RequestKind, ResourceReply, ResourceRequest, Stage, XaCode, XaFlags};

use crate::transaction::Role;
use crate::{Coordinator, TransactionLog};

impl<L: TransactionLog> Coordinator<L> {
    /// Answers a remote request directly, without touching any record.
    fn answer(&mut self, correlation: Uuid, kind: RequestKind, request: &ResourceRequest, state: XaCode) {
        let reply = Message::resource_reply(
            kind,
            ResourceReply {
                trid: request.trid.clone(),
                process: self.pid,
                resource: request.resource,
                state,
                elapsed: Duration::ZERO,
            },
        );
        self.send(request.process, correlation, reply);
    }

    pub(crate) fn remote_prepare(&mut self, correlation: Uuid, request: ResourceRequest) {
        let kind = RequestKind::Prepare;
        let Some(mut tx) = self.registry.remove(&request.trid.global()) else {
            debug!(trid = %request.trid, "remote prepare for unknown transaction");
            self.answer(correlation, kind, &request, XaCode::ReadOnly);
            return;
        };
        if tx.phase != Phase::Involved {
            warn!(trid = %request.trid, phase = ?tx.phase, "remote prepare while completing");
            self.registry.insert(tx);
            self.answer(correlation, kind, &request, XaCode::ReadOnly);
            return;
        }
        if tx.participants.is_empty() {
            self.answer(correlation, kind, &request, XaCode::ReadOnly);
            return;
        }
        info!(trid = %request.trid, upstream = %request.process, "remote prepare");
        tx.role = Role::Remote {
            reply_to: request.process,
            resource: request.resource,
            kind,
        };
        tx.trid = request.trid;
        tx.correlation = correlation;
        tx.phase = Phase::Preparing;
        self.request(&mut tx, kind, XaFlags::NO_FLAGS, |p| p.stage == Stage::Involved);
        self.registry.insert(tx);
    }

    pub(crate) fn remote_commit(&mut self, correlation: Uuid, request: ResourceRequest) {
        let kind = RequestKind::Commit;
        let Some(mut tx) = self.registry.remove(&request.trid.global()) else {
            debug!(trid = %request.trid, "remote commit for unknown transaction");
            self.answer(correlation, kind, &request, XaCode::ReadOnly);
            return;
        };
        let one_phase = request.flags.contains(XaFlags::ONE_PHASE);
        let expected = if one_phase {
            Phase::Involved
        } else {
            Phase::Prepared
        };
        if tx.phase != expected {
            warn!(trid = %request.trid, phase = ?tx.phase, one_phase, "remote commit out of order");
            self.registry.insert(tx);
            self.answer(correlation, kind, &request, XaCode::Protocol);
            return;
        }
        if tx.participants.is_empty() {
            self.answer(correlation, kind, &request, XaCode::Ok);
            return;
        }
        info!(trid = %request.trid, upstream = %request.process, one_phase, "remote commit");
        tx.role = Role::Remote {
            reply_to: request.process,
            resource: request.resource,
            kind,
        };
        tx.trid = request.trid;
        tx.correlation = correlation;

        if !one_phase {
            self.commit_prepared(tx);
        } else if tx.participants.len() == 1 {
            tx.one_phase = true;
            tx.phase = Phase::Committing;
            self.request(&mut tx, kind, XaFlags::ONE_PHASE, |_| true);
            self.registry.insert(tx);
        } else {
            tx.phase = Phase::Preparing;
            self.request(&mut tx, RequestKind::Prepare, XaFlags::NO_FLAGS, |p| {
                p.stage == Stage::Involved
            });
            self.registry.insert(tx);
        }
    }

    pub(crate) fn remote_rollback(&mut self, correlation: Uuid, request: ResourceRequest) {
        let kind = RequestKind::Rollback;
        let Some(mut tx) = self.registry.remove(&request.trid.global()) else {
            debug!(trid = %request.trid, "remote rollback for unknown transaction");
            self.answer(correlation, kind, &request, XaCode::Ok);
            return;
        };
        if !matches!(tx.phase, Phase::Involved | Phase::Prepared) {
            warn!(trid = %request.trid, phase = ?tx.phase, "remote rollback out of order");
            self.registry.insert(tx);
            self.answer(correlation, kind, &request, XaCode::Protocol);
            return;
        }
        info!(trid = %request.trid, upstream = %request.process, "remote rollback");
        tx.role = Role::Remote {
            reply_to: request.process,
            resource: request.resource,
            kind,
        };
        tx.trid = request.trid;
        tx.correlation = correlation;
        tx.failure = None;
        self.start_rollback(tx, |p| {
            matches!(p.stage, Stage::Involved | Stage::PrepareReplied)
        });
    }
}

// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Reaction to process exits.

use tracing::{info, warn};
use xatm_proto::{Phase, ProcessExit, Stage};

use crate::transaction::Role;
use crate::{Coordinator, TransactionLog};

impl<L: TransactionLog> Coordinator<L> {
    /// A process the coordinator knows about went away.
    ///
    /// A dead resource instance hands its in-flight request to the queue and
    /// is replaced. Transactions owned by the dead process lose their reply
    /// address: an undecided one is rolled back, one being prepared can only
    /// roll back, and one already deciding runs to completion silently.
    pub(crate) fn process_exit(&mut self, event: &ProcessExit) {
        if let Some((resource, out)) = self.pool.exit(event.pid) {
            self.out.extend(out);
            let short = self.pool.deficits().iter().any(|(id, _)| *id == resource);
            if short && !self.stopping {
                info!(%resource, instance = %event.pid, reason = ?event.reason, "replacing instance");
                self.queue_spawns(resource, 1);
            }
            return;
        }

        for global in self.registry.owned_by(event.pid) {
            let Some(mut tx) = self.registry.remove(&global) else {
                continue;
            };
            tx.owner_dead = true;
            match (tx.phase, &tx.role) {
                (Phase::Involved, Role::Owner) => {
                    warn!(trid = %tx.trid, owner = %event.pid, reason = ?event.reason, "owner died; rolling back");
                    self.start_rollback(tx, |p| p.stage == Stage::Involved);
                }
                (Phase::Preparing, _) => {
                    warn!(trid = %tx.trid, owner = %event.pid, "owner died during prepare; outcome is rollback");
                    tx.rollback_only = true;
                    self.registry.insert(tx);
                }
                _ => {
                    info!(trid = %tx.trid, owner = %event.pid, phase = ?tx.phase, "owner died; completing without reply");
                    self.registry.insert(tx);
                }
            }
        }
    }
}

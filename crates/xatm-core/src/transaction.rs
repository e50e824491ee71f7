// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transaction registry and involvement tracking.
//!
//! Records live in an arena keyed by the global part of the xid. Each record
//! holds a flat list of participant entries keyed by `(participant, branch)`;
//! there are no back-references between records, participants and requests.

use std::collections::BTreeMap;
use std::time::Instant;

use uuid::Uuid;
use xatm_proto::{
    GlobalId, ParticipantView, Phase, Pid, RequestKind, ResourceId, Stage, TransactionView, XaCode,
    Xid,
};

use crate::StateError;

/// One participant entry: a resource (or remote domain) under one branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    /// Participant identity.
    pub id: ResourceId,
    /// Branch the participant did its work under.
    pub branch: Xid,
    /// Protocol stage.
    pub stage: Stage,
    /// Last reported result.
    pub result: XaCode,
}

impl Participant {
    fn new(id: ResourceId, branch: Xid) -> Self {
        Self {
            id,
            branch,
            stage: Stage::Involved,
            result: XaCode::Ok,
        }
    }
}

/// Who drives the outcome of a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    /// A local owner process asked for commit or rollback.
    Owner,
    /// An upstream domain asked, through its gateway, for the transaction to
    /// be completed as if this coordinator were a single resource.
    Remote {
        /// Gateway that sent the request; the aggregated reply goes here.
        reply_to: Pid,
        /// Participant id the upstream coordinator assigned to this domain.
        resource: ResourceId,
        /// Request being served.
        kind: RequestKind,
    },
}

/// A transaction record.
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Coordinating xid (as given by the commit/rollback request, or the
    /// first xid seen).
    pub trid: Xid,
    /// Owner process: reply routing and death detection.
    pub owner: Pid,
    /// Involved participants, in enlistment order.
    pub participants: Vec<Participant>,
    /// Coordinator phase.
    pub phase: Phase,
    /// Outcome driver.
    pub role: Role,
    /// Correlation of the request that started completion.
    pub correlation: Uuid,
    /// Owner (or upstream gateway) went away; replies are dropped.
    pub owner_dead: bool,
    /// The outcome can only be rollback.
    pub rollback_only: bool,
    /// Code to report once a rollback forced by a failed prepare completes.
    pub failure: Option<XaCode>,
    /// A commit decision was written to the log.
    pub logged: bool,
    /// Completing with a single one-phase commit.
    pub one_phase: bool,
    /// When the record was created.
    pub started: Instant,
}

impl Transaction {
    /// A fresh record with no participants.
    pub fn new(trid: Xid, owner: Pid) -> Self {
        Self {
            trid,
            owner,
            participants: Vec::new(),
            phase: Phase::Involved,
            role: Role::Owner,
            correlation: Uuid::nil(),
            owner_dead: false,
            rollback_only: false,
            failure: None,
            logged: false,
            one_phase: false,
            started: Instant::now(),
        }
    }

    /// Participants enlisted under `branch`.
    pub fn involved_under(&self, branch: &Xid) -> Vec<ResourceId> {
        self.participants
            .iter()
            .filter(|p| &p.branch == branch)
            .map(|p| p.id)
            .collect()
    }

    /// Looks up a participant entry.
    pub fn participant_mut(&mut self, id: ResourceId, branch: &Xid) -> Option<&mut Participant> {
        self.participants
            .iter_mut()
            .find(|p| p.id == id && &p.branch == branch)
    }

    /// Transaction stage: the least advanced participant stage.
    pub fn stage(&self) -> Stage {
        self.participants
            .iter()
            .map(|p| p.stage)
            .min()
            .unwrap_or(Stage::NotInvolved)
    }

    /// Worst result among participants at `stage`, `ReadOnly` if none.
    pub fn results(&self, stage: Stage) -> XaCode {
        XaCode::worst_of(
            self.participants
                .iter()
                .filter(|p| p.stage == stage)
                .map(|p| p.result),
        )
    }

    /// One-phase commit applies: a single local resource enlisted under the
    /// coordinating xid itself.
    pub fn one_phase_eligible(&self) -> bool {
        match self.participants.as_slice() {
            [only] => only.id.is_local() && only.branch == self.trid,
            _ => false,
        }
    }

    /// Read-only snapshot for the admin interface.
    pub fn view(&self) -> TransactionView {
        TransactionView {
            global: self.trid.global(),
            trid: self.trid.clone(),
            owner: self.owner,
            phase: self.phase,
            remote: matches!(self.role, Role::Remote { .. }),
            participants: self
                .participants
                .iter()
                .map(|p| ParticipantView {
                    resource: p.id,
                    branch: p.branch.clone(),
                    stage: p.stage,
                    result: p.result,
                })
                .collect(),
            age: self.started.elapsed(),
        }
    }
}

/// Authoritative map from global transaction id to record.
#[derive(Debug, Default)]
pub struct Registry {
    transactions: BTreeMap<GlobalId, Transaction>,
}

impl Registry {
    /// Registers `participants` under `branch`.
    ///
    /// Creates the record if the global id is unknown. Returns every
    /// participant that was already enlisted under `branch` before this call.
    /// Repeating a call is a no-op apart from the returned set. New
    /// participants are refused once completion has started.
    pub fn involve(
        &mut self,
        branch: &Xid,
        owner: Pid,
        participants: &[ResourceId],
    ) -> Result<Vec<ResourceId>, StateError> {
        if branch.is_null() {
            return Err(StateError::NullXid);
        }
        let transaction = self
            .transactions
            .entry(branch.global())
            .or_insert_with(|| Transaction::new(branch.clone(), owner));

        let already = transaction.involved_under(branch);
        let fresh: Vec<ResourceId> = participants
            .iter()
            .copied()
            .filter(|id| !already.contains(id))
            .collect();
        if fresh.is_empty() {
            return Ok(already);
        }
        if transaction.phase != Phase::Involved {
            return Err(StateError::Completing(transaction.trid.clone()));
        }
        for id in fresh {
            if !transaction.involved_under(branch).contains(&id) {
                transaction
                    .participants
                    .push(Participant::new(id, branch.clone()));
            }
        }
        Ok(already)
    }

    /// The record for `global`, if any.
    pub fn lookup(&self, global: &GlobalId) -> Option<&Transaction> {
        self.transactions.get(global)
    }

    /// Removes a record. Callers only remove records whose phase is `Done`
    /// or that are being worked on outside the registry.
    pub fn remove(&mut self, global: &GlobalId) -> Option<Transaction> {
        self.transactions.remove(global)
    }

    /// Puts a record (back) into the registry.
    pub fn insert(&mut self, transaction: Transaction) {
        self.transactions
            .insert(transaction.trid.global(), transaction);
    }

    /// Global ids of transactions whose outcome waits on `pid`.
    pub fn owned_by(&self, pid: Pid) -> Vec<GlobalId> {
        self.transactions
            .iter()
            .filter(|(_, t)| match t.role {
                Role::Owner => t.owner == pid,
                Role::Remote { reply_to, .. } => reply_to == pid,
            })
            .map(|(g, _)| g.clone())
            .collect()
    }

    /// All records in global-id order.
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.transactions.values()
    }

    /// Number of open transactions.
    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    /// True when no transaction is open.
    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

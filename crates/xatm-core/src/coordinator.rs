// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Commit/rollback coordinator.
//!
//! The coordinator is a synchronous state machine: every inbound message is
//! applied to the registry and pool and yields the messages to send. A
//! transaction waiting for participant replies is just a record in the
//! registry, so any number of 2PC rounds can be outstanding while other
//! messages are handled.

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;
use xatm_config::ResolvedResource;
use xatm_proto::{
    CommitReply, CommitRequest, CommitStage, ExternalView, InvolvedReply, InvolvedRequest, Message,
    Phase, Pid, RequestKind, ResourceId, ResourceReply, ResourceRequest, RollbackReply,
    RollbackRequest, Stage, StateReply, XaCode, XaFlags, Xid,
};

use crate::pool::{Pool, Request};
use crate::transaction::{Participant, Registry, Role, Transaction};
use crate::{StateError, TransactionLog};

/// A message delivered to the coordinator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Sending process.
    pub from: Pid,
    /// Correlation chosen by the sender.
    pub correlation: Uuid,
    /// Message body.
    pub message: Message,
}

impl Inbound {
    /// Builds an inbound message.
    pub fn new(from: Pid, correlation: Uuid, message: Message) -> Self {
        Self {
            from,
            correlation,
            message,
        }
    }
}

/// A message the coordinator wants delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    /// Destination process.
    pub to: Pid,
    /// Correlation to send with.
    pub correlation: Uuid,
    /// Message body.
    pub message: Message,
}

/// Remote-domain gateways enlisted as participants.
#[derive(Debug, Default)]
pub struct Externals {
    by_process: BTreeMap<Pid, u32>,
}

impl Externals {
    /// Participant id of `process`, assigned on first sight and stable for
    /// the coordinator's lifetime.
    pub fn assign(&mut self, process: Pid) -> ResourceId {
        let next = u32::try_from(self.by_process.len() + 1).unwrap_or(u32::MAX);
        ResourceId::Domain(*self.by_process.entry(process).or_insert(next))
    }

    /// Gateway behind a domain participant id.
    pub fn process(&self, id: ResourceId) -> Option<Pid> {
        match id {
            ResourceId::Domain(n) => self
                .by_process
                .iter()
                .find_map(|(pid, assigned)| (*assigned == n).then_some(*pid)),
            ResourceId::Local(_) => None,
        }
    }

    /// Admin snapshot.
    pub fn views(&self) -> Vec<ExternalView> {
        self.by_process
            .iter()
            .map(|(pid, n)| ExternalView {
                id: ResourceId::Domain(*n),
                process: *pid,
            })
            .collect()
    }
}

/// The commit/rollback coordinator of one domain.
pub struct Coordinator<L> {
    pub(crate) pid: Pid,
    pub(crate) registry: Registry,
    pub(crate) pool: Pool,
    pub(crate) externals: Externals,
    pub(crate) log: L,
    pub(crate) stopping: bool,
    spawns: Vec<ResourceId>,
    inbox: VecDeque<Inbound>,
    pub(crate) out: Vec<Outbound>,
}

/// Code reported for a one-phase commit outcome.
fn one_phase_code(code: XaCode) -> XaCode {
    match code {
        XaCode::Ok | XaCode::ReadOnly | XaCode::NotA => XaCode::Ok,
        c if c.is_rollback() || c.is_heuristic() => c,
        _ => XaCode::RbOther,
    }
}

/// Code reported when a failed prepare forces rollback.
fn prepare_failure_code(code: XaCode) -> XaCode {
    if code.is_rollback() {
        code
    } else {
        XaCode::RbOther
    }
}

/// Code reported for a rollback round.
fn rollback_code(code: XaCode) -> XaCode {
    match code {
        XaCode::Ok | XaCode::ReadOnly | XaCode::NotA => XaCode::Ok,
        c => c,
    }
}

pub(crate) fn commit_reply(tx: &Transaction, state: XaCode, stage: CommitStage) -> Message {
    Message::CommitReply(CommitReply {
        trid: tx.trid.clone(),
        state,
        stage,
    })
}

const fn replied(kind: RequestKind) -> Stage {
    match kind {
        RequestKind::Prepare => Stage::PrepareReplied,
        RequestKind::Commit => Stage::CommitReplied,
        RequestKind::Rollback => Stage::RollbackReplied,
    }
}

const fn requested(kind: RequestKind) -> Stage {
    match kind {
        RequestKind::Prepare => Stage::PrepareRequested,
        RequestKind::Commit => Stage::CommitRequested,
        RequestKind::Rollback => Stage::RollbackRequested,
    }
}

impl<L: TransactionLog> Coordinator<L> {
    /// Builds a coordinator running as `pid` over the resolved resources.
    ///
    /// Every available resource asks for its configured number of instances;
    /// see [`Coordinator::take_spawns`].
    pub fn new(pid: Pid, resources: &[ResolvedResource], log: L) -> Self {
        let mut spawns = Vec::new();
        for resource in resources {
            match &resource.problem {
                Some(problem) => error!(
                    resource = %resource.id,
                    name = %resource.config.name,
                    %problem,
                    "resource unavailable"
                ),
                None => spawns.extend(std::iter::repeat_n(resource.id, resource.config.instances)),
            }
        }
        Self {
            pid,
            registry: Registry::default(),
            pool: Pool::new(pid, resources),
            externals: Externals::default(),
            log,
            stopping: false,
            spawns,
            inbox: VecDeque::new(),
            out: Vec::new(),
        }
    }

    /// Process identity of the coordinator.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Transaction registry (read-only).
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Resource proxy pool (read-only).
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// Transaction log.
    pub fn log(&self) -> &L {
        &self.log
    }

    /// True once shutdown was requested.
    pub fn stopping(&self) -> bool {
        self.stopping
    }

    /// Resource instances the host should start, one entry per instance.
    pub fn take_spawns(&mut self) -> Vec<ResourceId> {
        std::mem::take(&mut self.spawns)
    }

    /// Records an instance the host started for `resource`.
    pub fn instance_started(&mut self, resource: ResourceId, pid: Pid) -> Result<(), StateError> {
        self.pool.started(resource, pid)
    }

    /// Applies one message and returns what to send.
    #[instrument(
        level = "debug",
        skip_all,
        fields(op = inbound.message.op_name(), from = %inbound.from)
    )]
    pub fn handle(&mut self, inbound: Inbound) -> Vec<Outbound> {
        self.inbox.push_back(inbound);
        while let Some(next) = self.inbox.pop_front() {
            self.apply(next);
        }
        std::mem::take(&mut self.out)
    }

    fn apply(&mut self, inbound: Inbound) {
        let Inbound {
            from,
            correlation,
            message,
        } = inbound;
        match message {
            Message::Involved(request) => self.involved(correlation, request),
            Message::ExternalInvolved(request) => {
                let id = self.externals.assign(request.process);
                if let Err(err) = self
                    .registry
                    .involve(&request.trid, request.process, &[id])
                {
                    warn!(trid = %request.trid, %err, "external involvement refused");
                    self.send(request.process, correlation, Message::error(err.name(), err.to_string()));
                }
            }
            Message::Commit(request) => self.commit(correlation, request),
            Message::Rollback(request) => self.rollback(correlation, request),
            Message::ResourcePrepare(request) => self.remote_prepare(correlation, request),
            Message::ResourceCommit(request) => self.remote_commit(correlation, request),
            Message::ResourceRollback(request) => self.remote_rollback(correlation, request),
            Message::ResourcePrepareReply(reply) => self.participant_reply(RequestKind::Prepare, reply),
            Message::ResourceCommitReply(reply) => self.participant_reply(RequestKind::Commit, reply),
            Message::ResourceRollbackReply(reply) => {
                self.participant_reply(RequestKind::Rollback, reply);
            }
            Message::ResourceConnect(connect) => match self.pool.connect(&connect) {
                Ok(opened) => {
                    self.out.extend(opened.sent);
                    for request in opened.failed {
                        self.fail_request(
                            connect.resource,
                            request.kind,
                            request.trid,
                            request.correlation,
                        );
                    }
                }
                Err(err) => warn!(%err, instance = %connect.process, "connect from unknown instance"),
            },
            Message::Lookup(request) => self.lookup(from, correlation, &request),
            Message::ProcessExit(event) => self.process_exit(&event),
            Message::State => {
                let state = self.state();
                self.send(from, correlation, Message::StateReply(Box::new(state)));
            }
            Message::Scale(request) => self.scale(from, correlation, &request),
            Message::Shutdown => self.shutdown(),
            Message::Hello(_) => {}
            Message::Error(payload) => {
                warn!(name = %payload.name, message = %payload.message, "error from peer");
            }
            other @ (Message::InvolvedReply(_)
            | Message::CommitReply(_)
            | Message::RollbackReply(_)
            | Message::LookupReply(_)
            | Message::StateReply(_)
            | Message::ScaleReply(_)) => {
                warn!(op = other.op_name(), %from, "unexpected message; ignored");
            }
        }
    }

    pub(crate) fn send(&mut self, to: Pid, correlation: Uuid, message: Message) {
        self.out.push(Outbound {
            to,
            correlation,
            message,
        });
    }

    /// Answers the party driving `tx`, unless it went away.
    pub(crate) fn reply(&mut self, tx: &Transaction, message: Message) {
        if tx.owner_dead {
            debug!(trid = %tx.trid, op = message.op_name(), "reply dropped; requester is gone");
            return;
        }
        let to = match tx.role {
            Role::Owner => tx.owner,
            Role::Remote { reply_to, .. } => reply_to,
        };
        self.send(to, tx.correlation, message);
    }

    /// Aggregated reply to an upstream coordinator.
    pub(crate) fn upstream(&self, tx: &Transaction, kind: RequestKind, state: XaCode) -> Message {
        let resource = match tx.role {
            Role::Remote { resource, .. } => resource,
            Role::Owner => ResourceId::Domain(0),
        };
        Message::resource_reply(
            kind,
            ResourceReply {
                trid: tx.trid.clone(),
                process: self.pid,
                resource,
                state,
                elapsed: tx.started.elapsed(),
            },
        )
    }

    /// Answers a request `resource` can never serve with `rm_fail`, as if
    /// the participant had replied.
    fn fail_request(
        &mut self,
        resource: ResourceId,
        kind: RequestKind,
        trid: Xid,
        correlation: Uuid,
    ) {
        self.inbox.push_back(Inbound::new(
            self.pid,
            correlation,
            Message::resource_reply(
                kind,
                ResourceReply {
                    trid,
                    process: self.pid,
                    resource,
                    state: XaCode::ResourceFail,
                    elapsed: Duration::ZERO,
                },
            ),
        ));
    }

    fn check(&self, involved: &[ResourceId]) -> Result<(), StateError> {
        if self.stopping {
            return Err(StateError::ShuttingDown);
        }
        for id in involved {
            match id {
                ResourceId::Local(_) => self.pool.check(*id)?,
                ResourceId::Domain(_) => {
                    self.externals
                        .process(*id)
                        .ok_or(StateError::UnknownResource(*id))?;
                }
            }
        }
        Ok(())
    }

    fn involved(&mut self, correlation: Uuid, request: InvolvedRequest) {
        let result = self.check(&request.involved).and_then(|()| {
            self.registry
                .involve(&request.trid, request.process, &request.involved)
        });
        match result {
            Ok(already) => {
                debug!(trid = %request.trid, involved = ?request.involved, ?already, "involved");
                self.send(
                    request.process,
                    correlation,
                    Message::InvolvedReply(InvolvedReply {
                        trid: request.trid,
                        involved_already: already,
                    }),
                );
            }
            Err(err) => {
                warn!(trid = %request.trid, %err, "involvement refused");
                self.send(request.process, correlation, Message::error(err.name(), err.to_string()));
            }
        }
    }

    /// Sends `kind` to every participant matching `filter`, moving it to the
    /// requested stage. Returns the number of participants addressed.
    pub(crate) fn request<F>(
        &mut self,
        tx: &mut Transaction,
        kind: RequestKind,
        flags: XaFlags,
        filter: F,
    ) -> usize
    where
        F: Fn(&Participant) -> bool,
    {
        let mut sent = 0;
        for participant in tx.participants.iter_mut().filter(|p| filter(p)) {
            participant.stage = requested(kind);
            sent += 1;
            let delivered = match participant.id {
                ResourceId::Local(_) => self
                    .pool
                    .dispatch(
                        participant.id,
                        Request {
                            kind,
                            trid: participant.branch.clone(),
                            flags,
                            correlation: tx.correlation,
                        },
                    )
                    .map(|out| self.out.extend(out)),
                ResourceId::Domain(_) => match self.externals.process(participant.id) {
                    Some(gateway) => {
                        self.out.push(Outbound {
                            to: gateway,
                            correlation: tx.correlation,
                            message: Message::resource_request(
                                kind,
                                ResourceRequest {
                                    trid: participant.branch.clone(),
                                    process: self.pid,
                                    resource: participant.id,
                                    flags,
                                },
                            ),
                        });
                        Ok(())
                    }
                    None => Err(StateError::UnknownResource(participant.id)),
                },
            };
            if let Err(err) = delivered {
                error!(trid = %participant.branch, resource = %participant.id, %err, kind = %kind, "participant unreachable");
                self.fail_request(
                    participant.id,
                    kind,
                    participant.branch.clone(),
                    tx.correlation,
                );
            }
        }
        debug!(trid = %tx.trid, kind = %kind, participants = sent, "requests sent");
        sent
    }

    #[instrument(level = "info", skip_all, fields(trid = %request.trid))]
    fn commit(&mut self, correlation: Uuid, request: CommitRequest) {
        let refuse = |state| {
            Message::CommitReply(CommitReply {
                trid: request.trid.clone(),
                state,
                stage: CommitStage::Error,
            })
        };
        if request.trid.is_null() {
            self.send(request.process, correlation, refuse(XaCode::Protocol));
            return;
        }
        if !request.involved.is_empty() {
            if let Err(err) = self.check(&request.involved).and_then(|()| {
                self.registry
                    .involve(&request.trid, request.process, &request.involved)
            }) {
                warn!(%err, "commit refused");
                self.send(request.process, correlation, Message::error(err.name(), err.to_string()));
                return;
            }
        }
        let Some(mut tx) = self.registry.remove(&request.trid.global()) else {
            debug!("nothing involved; commit is a no-op");
            self.send(
                request.process,
                correlation,
                Message::CommitReply(CommitReply {
                    trid: request.trid.clone(),
                    state: XaCode::Ok,
                    stage: CommitStage::Commit,
                }),
            );
            return;
        };
        if tx.phase != Phase::Involved || !matches!(tx.role, Role::Owner) {
            warn!(phase = ?tx.phase, "commit for a transaction already completing");
            self.registry.insert(tx);
            self.send(request.process, correlation, refuse(XaCode::Protocol));
            return;
        }
        tx.owner = request.process;
        tx.correlation = correlation;
        tx.trid = request.trid.clone();

        if tx.participants.is_empty() {
            tx.phase = Phase::Done;
            let message = commit_reply(&tx, XaCode::Ok, CommitStage::Commit);
            self.reply(&tx, message);
            return;
        }
        if tx.one_phase_eligible() {
            info!(resource = %tx.participants[0].id, "one-phase commit");
            tx.one_phase = true;
            tx.phase = Phase::Committing;
            self.request(&mut tx, RequestKind::Commit, XaFlags::ONE_PHASE, |_| true);
        } else {
            info!(participants = tx.participants.len(), "prepare");
            tx.phase = Phase::Preparing;
            self.request(&mut tx, RequestKind::Prepare, XaFlags::NO_FLAGS, |p| {
                p.stage == Stage::Involved
            });
        }
        self.registry.insert(tx);
    }

    #[instrument(level = "info", skip_all, fields(trid = %request.trid))]
    fn rollback(&mut self, correlation: Uuid, request: RollbackRequest) {
        let answer = |state| {
            Message::RollbackReply(RollbackReply {
                trid: request.trid.clone(),
                state,
            })
        };
        if request.trid.is_null() {
            self.send(request.process, correlation, answer(XaCode::Protocol));
            return;
        }
        if !request.involved.is_empty() {
            if let Err(err) = self.check(&request.involved).and_then(|()| {
                self.registry
                    .involve(&request.trid, request.process, &request.involved)
            }) {
                warn!(%err, "rollback refused");
                self.send(request.process, correlation, Message::error(err.name(), err.to_string()));
                return;
            }
        }
        let Some(mut tx) = self.registry.remove(&request.trid.global()) else {
            self.send(request.process, correlation, answer(XaCode::Ok));
            return;
        };
        match (tx.phase, &tx.role) {
            (Phase::Involved, Role::Owner) => {}
            (Phase::Preparing, Role::Owner) => {
                // The commit in flight answers rb_rollback once prepare
                // replies are in and the participants are rolled back.
                info!("rollback while preparing; outcome is rollback");
                tx.rollback_only = true;
                self.registry.insert(tx);
                self.send(request.process, correlation, answer(XaCode::Ok));
                return;
            }
            _ => {
                warn!(phase = ?tx.phase, "rollback for a transaction already completing");
                self.registry.insert(tx);
                self.send(request.process, correlation, answer(XaCode::Protocol));
                return;
            }
        }
        tx.owner = request.process;
        tx.correlation = correlation;
        tx.trid = request.trid.clone();
        self.start_rollback(tx, |p| p.stage == Stage::Involved);
    }

    /// Moves `tx` to `rolling_back` and sends rollback to the matching
    /// participants; completes at once when there are none.
    pub(crate) fn start_rollback<F>(&mut self, mut tx: Transaction, filter: F)
    where
        F: Fn(&Participant) -> bool,
    {
        tx.phase = Phase::RollingBack;
        if self.request(&mut tx, RequestKind::Rollback, XaFlags::NO_FLAGS, filter) == 0 {
            self.rolled_back(&mut tx);
            return;
        }
        self.registry.insert(tx);
    }

    fn participant_reply(&mut self, kind: RequestKind, reply: ResourceReply) {
        if reply.resource.is_local() {
            match self.pool.reply(reply.process, reply.elapsed) {
                Ok(next) => self.out.extend(next),
                Err(err) if reply.process == self.pid => {
                    debug!(%err, "synthetic reply");
                }
                Err(err) => warn!(%err, "reply from a process that is not an instance"),
            }
        }
        let Some(mut tx) = self.registry.remove(&reply.trid.global()) else {
            warn!(trid = %reply.trid, kind = %kind, "reply for unknown transaction; ignored");
            return;
        };
        let Some(participant) = tx.participant_mut(reply.resource, &reply.trid) else {
            warn!(trid = %reply.trid, resource = %reply.resource, "reply from a participant that is not involved");
            self.registry.insert(tx);
            return;
        };
        if participant.stage != requested(kind) {
            warn!(
                trid = %reply.trid,
                resource = %reply.resource,
                stage = ?participant.stage,
                kind = %kind,
                "unexpected reply; ignored"
            );
            self.registry.insert(tx);
            return;
        }
        participant.result = reply.state;
        participant.stage = if kind == RequestKind::Prepare && reply.state == XaCode::ReadOnly {
            Stage::NotInvolved
        } else {
            replied(kind)
        };
        debug!(trid = %reply.trid, resource = %reply.resource, state = %reply.state, kind = %kind, "participant replied");

        if tx.stage() < replied(kind) {
            self.registry.insert(tx);
            return;
        }
        match kind {
            RequestKind::Prepare => self.prepared(tx),
            RequestKind::Commit => self.committed(&mut tx),
            RequestKind::Rollback => self.rolled_back(&mut tx),
        }
    }

    /// Every participant answered prepare.
    fn prepared(&mut self, mut tx: Transaction) {
        let result = tx.results(Stage::PrepareReplied);
        if result == XaCode::ReadOnly {
            info!(trid = %tx.trid, "all participants read-only");
            tx.phase = Phase::Done;
            let message = match tx.role {
                Role::Owner => commit_reply(&tx, XaCode::Ok, CommitStage::Commit),
                Role::Remote { kind: RequestKind::Prepare, .. } => {
                    self.upstream(&tx, RequestKind::Prepare, XaCode::ReadOnly)
                }
                Role::Remote { kind, .. } => self.upstream(&tx, kind, XaCode::Ok),
            };
            self.reply(&tx, message);
            return;
        }

        let mut failure = (result != XaCode::Ok).then(|| prepare_failure_code(result));
        if failure.is_none() && tx.rollback_only {
            failure = Some(XaCode::RbRollback);
        }
        if failure.is_none() {
            if let Err(err) = self.log.prepare(&tx.trid) {
                error!(trid = %tx.trid, %err, "commit decision could not be logged; rolling back");
                failure = Some(XaCode::RbOther);
            }
        }
        if let Some(code) = failure {
            warn!(trid = %tx.trid, worst = %result, reply = %code, "prepare failed; rolling back");
            tx.failure = Some(code);
            self.start_rollback(tx, |p| p.stage == Stage::PrepareReplied);
            return;
        }

        tx.logged = true;
        match tx.role {
            Role::Owner => {
                let message = commit_reply(&tx, XaCode::Ok, CommitStage::Prepare);
                self.reply(&tx, message);
                self.commit_prepared(tx);
            }
            Role::Remote { kind: RequestKind::Prepare, .. } => {
                tx.phase = Phase::Prepared;
                let message = self.upstream(&tx, RequestKind::Prepare, XaCode::Ok);
                self.reply(&tx, message);
                self.registry.insert(tx);
            }
            Role::Remote { .. } => self.commit_prepared(tx),
        }
    }

    /// Sends commit to every participant that prepared ok.
    pub(crate) fn commit_prepared(&mut self, mut tx: Transaction) {
        tx.phase = Phase::Committing;
        let sent = self.request(&mut tx, RequestKind::Commit, XaFlags::NO_FLAGS, |p| {
            p.stage == Stage::PrepareReplied && p.result == XaCode::Ok
        });
        if sent == 0 {
            self.committed(&mut tx);
            return;
        }
        self.registry.insert(tx);
    }

    /// Every participant answered commit.
    fn committed(&mut self, tx: &mut Transaction) {
        tx.phase = Phase::Done;
        let results: Vec<XaCode> = tx
            .participants
            .iter()
            .filter(|p| p.stage == Stage::CommitReplied)
            .map(|p| p.result)
            .collect();
        let code = if tx.one_phase {
            one_phase_code(XaCode::worst_of(results.iter().copied()))
        } else if results.iter().all(|c| c.is_success()) {
            if let Err(err) = self.log.remove(&tx.trid) {
                error!(trid = %tx.trid, %err, "could not log completion");
            }
            XaCode::Ok
        } else {
            let code = if results.iter().any(|c| c.is_success()) {
                XaCode::HeuristicHazard
            } else {
                XaCode::worst_of(results.iter().copied())
            };
            error!(trid = %tx.trid, ?results, reply = %code, "participants disagree after commit decision");
            if let Err(err) = self.log.hazard(&tx.trid, code) {
                error!(trid = %tx.trid, %err, "could not log hazard");
            }
            code
        };
        info!(trid = %tx.trid, state = %code, one_phase = tx.one_phase, "commit done");
        let message = match tx.role {
            Role::Owner => commit_reply(tx, code, CommitStage::Commit),
            Role::Remote { .. } => self.upstream(tx, RequestKind::Commit, code),
        };
        self.reply(tx, message);
    }

    /// Every addressed participant answered rollback.
    pub(crate) fn rolled_back(&mut self, tx: &mut Transaction) {
        tx.phase = Phase::Done;
        let code = rollback_code(tx.results(Stage::RollbackReplied));
        if tx.logged {
            if let Err(err) = self.log.remove(&tx.trid) {
                error!(trid = %tx.trid, %err, "could not log completion");
            }
        }
        info!(trid = %tx.trid, state = %code, "rollback done");
        let message = match (tx.failure, &tx.role) {
            (Some(failure), Role::Owner) => commit_reply(tx, failure, CommitStage::Error),
            (Some(failure), Role::Remote { kind, .. }) => self.upstream(tx, *kind, failure),
            (None, Role::Owner) => Message::RollbackReply(RollbackReply {
                trid: tx.trid.clone(),
                state: code,
            }),
            (None, Role::Remote { .. }) => self.upstream(tx, RequestKind::Rollback, code),
        };
        self.reply(tx, message);
    }

    /// Full admin snapshot.
    pub fn state(&self) -> StateReply {
        StateReply {
            resources: self.pool.proxies().map(|p| p.view()).collect(),
            transactions: self.registry.iter().map(Transaction::view).collect(),
            pending: self.pool.pending_views(),
            externals: self.externals.views(),
            log: self.log.stats(),
        }
    }

    pub(crate) fn queue_spawns(&mut self, resource: ResourceId, count: usize) {
        self.spawns.extend(std::iter::repeat_n(resource, count));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn one_phase_errors_become_rollback_class() {
        assert_eq!(one_phase_code(XaCode::Ok), XaCode::Ok);
        assert_eq!(one_phase_code(XaCode::ReadOnly), XaCode::Ok);
        assert_eq!(one_phase_code(XaCode::NotA), XaCode::Ok);
        assert_eq!(one_phase_code(XaCode::RbDeadlock), XaCode::RbDeadlock);
        assert_eq!(one_phase_code(XaCode::ResourceError), XaCode::RbOther);
        assert_eq!(one_phase_code(XaCode::Protocol), XaCode::RbOther);
        assert_eq!(one_phase_code(XaCode::HeuristicMix), XaCode::HeuristicMix);
    }

    #[test]
    fn rollback_treats_unknown_and_read_only_as_done() {
        assert_eq!(rollback_code(XaCode::NotA), XaCode::Ok);
        assert_eq!(rollback_code(XaCode::ReadOnly), XaCode::Ok);
        assert_eq!(rollback_code(XaCode::ResourceFail), XaCode::ResourceFail);
    }

    #[test]
    fn externals_keep_their_ids() {
        let mut externals = Externals::default();
        let a = externals.assign(Pid(100));
        let b = externals.assign(Pid(200));
        assert_eq!(a, ResourceId::Domain(1));
        assert_eq!(b, ResourceId::Domain(2));
        assert_eq!(externals.assign(Pid(100)), a);
        assert_eq!(externals.process(b), Some(Pid(200)));
        assert_eq!(externals.process(ResourceId::Local(1)), None);
    }
}

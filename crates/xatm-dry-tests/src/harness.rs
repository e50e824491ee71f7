// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Coordinator driven by hand.
//!
//! The harness plays every other process: owners, resource instances and
//! gateways. Tests feed messages in and answer the resource requests that
//! come out.

use std::collections::BTreeMap;
use std::time::Duration;

use uuid::Uuid;
use xatm_config::ResolvedResource;
use xatm_core::{Coordinator, Inbound, MemoryLog, Outbound};
use xatm_proto::{
    CommitRequest, ExitReason, InvolvedRequest, Message, Pid, ProcessExit, RequestKind,
    ResourceConnect, ResourceId, ResourceReply, ResourceRequest, RollbackRequest, XaCode, XaFlags,
    Xid,
};

use crate::fixtures;

/// Process identity of the coordinator under test.
pub const TM: Pid = Pid(1);
/// Default owner process.
pub const OWNER: Pid = Pid(100);
const FIRST_INSTANCE: u32 = 1000;

/// A coordinator with fake resource instances.
pub struct Harness {
    coordinator: Coordinator<MemoryLog>,
    next_pid: u32,
    instances: BTreeMap<Pid, ResourceId>,
}

impl Harness {
    /// Coordinator over mock-up resources `(name, instances)`, every
    /// instance started and connected.
    pub fn new(resources: &[(&str, usize)]) -> Self {
        Self::with_resources(&fixtures::resolved(resources))
    }

    /// Coordinator over `resources`, every requested instance started and
    /// connected.
    pub fn with_resources(resources: &[ResolvedResource]) -> Self {
        Self::with_resources_failing(resources, &[])
    }

    /// Like [`Harness::new`], but every instance of a resource in `failing`
    /// reports a failed `xa_open`.
    pub fn with_failing_open(resources: &[(&str, usize)], failing: &[ResourceId]) -> Self {
        Self::with_resources_failing(&fixtures::resolved(resources), failing)
    }

    /// Coordinator over `resources`; instances of resources in `failing`
    /// report a failed `xa_open`, the rest connect.
    pub fn with_resources_failing(resources: &[ResolvedResource], failing: &[ResourceId]) -> Self {
        let mut harness = Self {
            coordinator: Coordinator::new(TM, resources, MemoryLog::default()),
            next_pid: FIRST_INSTANCE,
            instances: BTreeMap::new(),
        };
        harness.start_spawns_failing(failing);
        harness
    }

    /// Starts and connects every instance the coordinator asked for.
    pub fn start_spawns(&mut self) -> Vec<Outbound> {
        self.start_spawns_failing(&[])
    }

    /// Starts every instance the coordinator asked for. Instances of
    /// resources in `failing` answer `xa_open` with `rm_error`.
    pub fn start_spawns_failing(&mut self, failing: &[ResourceId]) -> Vec<Outbound> {
        let mut out = Vec::new();
        for resource in self.coordinator.take_spawns() {
            let pid = Pid(self.next_pid);
            self.next_pid += 1;
            if self.coordinator.instance_started(resource, pid).is_err() {
                continue;
            }
            self.instances.insert(pid, resource);
            out.extend(self.send(
                pid,
                Message::ResourceConnect(ResourceConnect {
                    resource,
                    process: pid,
                    state: if failing.contains(&resource) {
                        XaCode::ResourceError
                    } else {
                        XaCode::Ok
                    },
                }),
            ));
        }
        out
    }

    /// The coordinator.
    pub fn coordinator(&self) -> &Coordinator<MemoryLog> {
        &self.coordinator
    }

    /// The coordinator, mutably.
    pub fn coordinator_mut(&mut self) -> &mut Coordinator<MemoryLog> {
        &mut self.coordinator
    }

    /// Log records written so far.
    pub fn log(&self) -> &MemoryLog {
        self.coordinator.log()
    }

    /// Instance processes of `resource`.
    pub fn instances(&self, resource: ResourceId) -> Vec<Pid> {
        self.instances
            .iter()
            .filter(|(_, r)| **r == resource)
            .map(|(pid, _)| *pid)
            .collect()
    }

    /// Delivers `message` from `from` with a fresh correlation.
    pub fn send(&mut self, from: Pid, message: Message) -> Vec<Outbound> {
        self.coordinator
            .handle(Inbound::new(from, Uuid::new_v4(), message))
    }

    /// `owner` reports work by `resources` under `trid`.
    pub fn involve(&mut self, owner: Pid, trid: &Xid, resources: &[ResourceId]) -> Vec<Outbound> {
        self.send(
            owner,
            Message::Involved(InvolvedRequest {
                trid: trid.clone(),
                process: owner,
                involved: resources.to_vec(),
            }),
        )
    }

    /// `owner` asks for commit.
    pub fn commit(&mut self, owner: Pid, trid: &Xid) -> Vec<Outbound> {
        self.send(
            owner,
            Message::Commit(CommitRequest {
                trid: trid.clone(),
                process: owner,
                flags: XaFlags::NO_FLAGS,
                involved: Vec::new(),
            }),
        )
    }

    /// `owner` asks for rollback.
    pub fn rollback(&mut self, owner: Pid, trid: &Xid) -> Vec<Outbound> {
        self.send(
            owner,
            Message::Rollback(RollbackRequest {
                trid: trid.clone(),
                process: owner,
                involved: Vec::new(),
            }),
        )
    }

    /// Answers a resource request the coordinator sent, as its addressee.
    /// Anything else yields nothing.
    pub fn answer(&mut self, request: &Outbound, state: XaCode) -> Vec<Outbound> {
        let Some((kind, sent)) = request.message.as_resource_request() else {
            return Vec::new();
        };
        let reply = Message::resource_reply(
            kind,
            ResourceReply {
                trid: sent.trid.clone(),
                process: request.to,
                resource: sent.resource,
                state,
                elapsed: Duration::from_micros(50),
            },
        );
        self.coordinator
            .handle(Inbound::new(request.to, request.correlation, reply))
    }

    /// Answers every resource request in `out` with `state`, and whatever
    /// those answers trigger, until only non-request messages remain.
    pub fn answer_all(&mut self, out: Vec<Outbound>, state: XaCode) -> Vec<Outbound> {
        let mut rest = Vec::new();
        let mut queue = out;
        while !queue.is_empty() {
            let mut next = Vec::new();
            for message in queue {
                if message.message.as_resource_request().is_some() {
                    next.extend(self.answer(&message, state));
                } else {
                    rest.push(message);
                }
            }
            queue = next;
        }
        rest
    }

    /// Reports that `pid` exited.
    pub fn exit(&mut self, pid: Pid) -> Vec<Outbound> {
        self.instances.remove(&pid);
        self.send(
            TM,
            Message::ProcessExit(ProcessExit {
                pid,
                reason: ExitReason::Exited(0),
            }),
        )
    }
}

/// Resource requests in `out`, with their kind.
pub fn requests(out: &[Outbound]) -> Vec<(RequestKind, &ResourceRequest, &Outbound)> {
    out.iter()
        .filter_map(|o| {
            o.message
                .as_resource_request()
                .map(|(kind, request)| (kind, request, o))
        })
        .collect()
}

/// Requests of `kind` in `out`.
pub fn requests_of(out: &[Outbound], kind: RequestKind) -> Vec<&Outbound> {
    requests(out)
        .into_iter()
        .filter(|(k, _, _)| *k == kind)
        .map(|(_, _, o)| o)
        .collect()
}

/// Messages in `out` addressed to `pid`.
pub fn addressed_to(out: &[Outbound], pid: Pid) -> Vec<&Message> {
    out.iter()
        .filter(|o| o.to == pid)
        .map(|o| &o.message)
        .collect()
}

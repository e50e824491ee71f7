// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Instance workers against scripted switches and a live coordinator.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::timeout;
use uuid::Uuid;
use xatm_core::{Coordinator, Inbound, MemoryLog, Outbound};
use xatm_dry_tests::{fixtures, ScriptedSwitch, OWNER, TM};
use xatm_proto::{
    CommitRequest, CommitStage, InvolvedRequest, Message, Pid, RequestKind, ResourceId,
    ResourceRequest, XaCode, XaFlags, Xid,
};
use xatm_resource::instance::run;
use xatm_resource::{InstanceSettings, Switch};

const WAIT: Duration = Duration::from_secs(5);

fn settings(resource: ResourceId, process: Pid) -> InstanceSettings {
    InstanceSettings {
        resource,
        process,
        openinfo: String::new(),
        closeinfo: String::new(),
    }
}

#[tokio::test]
async fn already_prepared_branch_is_recovered_as_read_only() {
    let trid = Xid::create();
    let switch = ScriptedSwitch::new()
        .then("xa_prepare", XaCode::Protocol)
        .recovering(vec![trid.clone()]);
    let calls = switch.calls();
    let me = Pid(10);
    let (to_instance, inbox) = mpsc::channel(4);
    let (outbox, mut from_instance) = mpsc::channel(4);
    let worker = tokio::spawn(run(
        settings(ResourceId::Local(1), me),
        Box::new(switch),
        inbox,
        outbox,
    ));
    timeout(WAIT, from_instance.recv()).await.unwrap().unwrap();

    to_instance
        .send(Outbound {
            to: me,
            correlation: Uuid::new_v4(),
            message: Message::resource_request(
                RequestKind::Prepare,
                ResourceRequest {
                    trid: trid.clone(),
                    process: TM,
                    resource: ResourceId::Local(1),
                    flags: XaFlags::NO_FLAGS,
                },
            ),
        })
        .await
        .unwrap();
    let reply = timeout(WAIT, from_instance.recv()).await.unwrap().unwrap();
    assert!(matches!(
        reply.message,
        Message::ResourcePrepareReply(ref r) if r.state == XaCode::ReadOnly && r.trid == trid
    ));

    drop(to_instance);
    timeout(WAIT, worker).await.unwrap().unwrap().unwrap();
    assert_eq!(
        calls.names(),
        vec!["xa_open", "xa_prepare", "xa_recover", "xa_close"]
    );
}

#[tokio::test]
async fn unlisted_branch_keeps_the_protocol_error() {
    let switch = ScriptedSwitch::new()
        .then("xa_prepare", XaCode::Protocol)
        .recovering(vec![]);
    let me = Pid(11);
    let (to_instance, inbox) = mpsc::channel(4);
    let (outbox, mut from_instance) = mpsc::channel(4);
    tokio::spawn(run(
        settings(ResourceId::Local(1), me),
        Box::new(switch),
        inbox,
        outbox,
    ));
    timeout(WAIT, from_instance.recv()).await.unwrap().unwrap();

    to_instance
        .send(Outbound {
            to: me,
            correlation: Uuid::new_v4(),
            message: Message::resource_request(
                RequestKind::Prepare,
                ResourceRequest {
                    trid: Xid::create(),
                    process: TM,
                    resource: ResourceId::Local(1),
                    flags: XaFlags::NO_FLAGS,
                },
            ),
        })
        .await
        .unwrap();
    let reply = timeout(WAIT, from_instance.recv()).await.unwrap().unwrap();
    assert!(matches!(
        reply.message,
        Message::ResourcePrepareReply(ref r) if r.state == XaCode::Protocol
    ));
}

/// A coordinator wired to real workers; owner messages are collected.
struct Domain {
    coordinator: Coordinator<MemoryLog>,
    instances: BTreeMap<Pid, mpsc::Sender<Outbound>>,
    inbound: mpsc::Receiver<Inbound>,
    owner: Vec<Message>,
}

impl Domain {
    fn start(switches: Vec<Box<dyn Switch>>) -> Self {
        let resolved = fixtures::resolved(&[("rm-a", 1), ("rm-b", 1)]);
        let mut coordinator = Coordinator::new(TM, &resolved, MemoryLog::default());
        let (coordinator_tx, inbound) = mpsc::channel(64);
        let mut instances = BTreeMap::new();
        let spawns = coordinator.take_spawns();
        assert_eq!(spawns.len(), switches.len());
        for ((resource, switch), n) in spawns.into_iter().zip(switches).zip(1000u32..) {
            let pid = Pid(n);
            coordinator.instance_started(resource, pid).unwrap();
            let (tx, rx) = mpsc::channel(8);
            tokio::spawn(run(settings(resource, pid), switch, rx, coordinator_tx.clone()));
            instances.insert(pid, tx);
        }
        Self {
            coordinator,
            instances,
            inbound,
            owner: Vec::new(),
        }
    }

    async fn route(&mut self, out: Vec<Outbound>) {
        for o in out {
            if let Some(instance) = self.instances.get(&o.to) {
                instance.send(o).await.unwrap();
            } else {
                assert_eq!(o.to, OWNER);
                self.owner.push(o.message);
            }
        }
    }

    async fn deliver(&mut self, from: Pid, message: Message) {
        let out = self
            .coordinator
            .handle(Inbound::new(from, Uuid::new_v4(), message));
        self.route(out).await;
    }

    /// Pumps worker messages until `done` holds for the owner's inbox.
    async fn until<F: Fn(&[Message]) -> bool>(&mut self, done: F) {
        while !done(&self.owner) {
            let next = timeout(WAIT, self.inbound.recv()).await.unwrap().unwrap();
            let out = self.coordinator.handle(next);
            self.route(out).await;
        }
    }
}

fn commit_replies(owner: &[Message]) -> Vec<(XaCode, CommitStage)> {
    owner
        .iter()
        .filter_map(|m| match m {
            Message::CommitReply(r) => Some((r.state, r.stage)),
            _ => None,
        })
        .collect()
}

fn finished(owner: &[Message]) -> bool {
    commit_replies(owner)
        .iter()
        .any(|(_, stage)| *stage != CommitStage::Prepare)
}

#[tokio::test]
async fn two_phase_commit_through_workers() {
    let a = ScriptedSwitch::new();
    let b = ScriptedSwitch::new();
    let (calls_a, calls_b) = (a.calls(), b.calls());
    let mut domain = Domain::start(vec![Box::new(a), Box::new(b)]);

    let trid = Xid::create();
    domain
        .deliver(
            OWNER,
            Message::Involved(InvolvedRequest {
                trid: trid.clone(),
                process: OWNER,
                involved: vec![ResourceId::Local(1), ResourceId::Local(2)],
            }),
        )
        .await;
    domain
        .deliver(
            OWNER,
            Message::Commit(CommitRequest {
                trid,
                process: OWNER,
                flags: XaFlags::NO_FLAGS,
                involved: vec![],
            }),
        )
        .await;
    domain.until(finished).await;

    assert_eq!(
        commit_replies(&domain.owner),
        vec![
            (XaCode::Ok, CommitStage::Prepare),
            (XaCode::Ok, CommitStage::Commit)
        ]
    );
    assert_eq!(calls_a.names(), vec!["xa_open", "xa_prepare", "xa_commit"]);
    assert_eq!(calls_b.names(), vec!["xa_open", "xa_prepare", "xa_commit"]);
    assert!(domain.coordinator.registry().is_empty());
}

#[tokio::test]
async fn prepare_failure_through_workers_rolls_back() {
    let a = ScriptedSwitch::new();
    let b = ScriptedSwitch::new().then("xa_prepare", XaCode::RbDeadlock);
    let (calls_a, calls_b) = (a.calls(), b.calls());
    let mut domain = Domain::start(vec![Box::new(a), Box::new(b)]);

    let trid = Xid::create();
    domain
        .deliver(
            OWNER,
            Message::Involved(InvolvedRequest {
                trid: trid.clone(),
                process: OWNER,
                involved: vec![ResourceId::Local(1), ResourceId::Local(2)],
            }),
        )
        .await;
    domain
        .deliver(
            OWNER,
            Message::Commit(CommitRequest {
                trid,
                process: OWNER,
                flags: XaFlags::NO_FLAGS,
                involved: vec![],
            }),
        )
        .await;
    domain.until(finished).await;

    assert_eq!(
        commit_replies(&domain.owner),
        vec![(XaCode::RbDeadlock, CommitStage::Error)]
    );
    assert!(!calls_a.names().contains(&"xa_commit"));
    assert!(calls_a.names().contains(&"xa_rollback"));
    assert!(calls_b.names().contains(&"xa_rollback"));
}

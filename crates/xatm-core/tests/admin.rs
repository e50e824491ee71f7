// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
//! Lookup, state, scale and shutdown.

use xatm_config::ResourceProblem;
use xatm_dry_tests::harness::addressed_to;
use xatm_dry_tests::{fixtures, Harness, OWNER};
use xatm_proto::{
    InstanceState, LookupRequest, Message, Phase, Pid, ResourceId, ScaleRequest, Xid,
};

const ADMIN: Pid = Pid(42);
const RM1: ResourceId = ResourceId::Local(1);
const RM2: ResourceId = ResourceId::Local(2);

fn only(out: &[xatm_core::Outbound], to: Pid) -> Message {
    let messages = addressed_to(out, to);
    assert_eq!(messages.len(), 1, "{messages:?}");
    messages[0].clone()
}

#[test]
fn lookup_by_name_or_all() {
    let mut h = Harness::new(&[("rm-a", 1), ("rm-b", 1)]);

    let out = h.send(ADMIN, Message::Lookup(LookupRequest { names: vec![] }));
    let Message::LookupReply(all) = only(&out, ADMIN) else {
        panic!("expected lookup reply");
    };
    assert_eq!(all.resources.len(), 2);

    let out = h.send(
        ADMIN,
        Message::Lookup(LookupRequest {
            names: vec!["rm-b".into(), "missing".into()],
        }),
    );
    let Message::LookupReply(some) = only(&out, ADMIN) else {
        panic!("expected lookup reply");
    };
    assert_eq!(some.resources.len(), 1);
    assert_eq!(some.resources[0].id, RM2);
    assert_eq!(some.resources[0].name, "rm-b");
}

#[test]
fn lookup_leaves_out_or_refuses_unavailable_resources() {
    let mut resolved = fixtures::resolved(&[("rm-a", 1), ("rm-b", 1), ("rm-c", 1)]);
    resolved[2].problem = Some(ResourceProblem::UnknownKey("db2-rm".into()));
    let mut h = Harness::with_resources_failing(&resolved, &[RM2]);

    let out = h.send(ADMIN, Message::Lookup(LookupRequest { names: vec![] }));
    let Message::LookupReply(all) = only(&out, ADMIN) else {
        panic!("expected lookup reply");
    };
    let names: Vec<&str> = all.resources.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(names, vec!["rm-a"]);

    for name in ["rm-b", "rm-c"] {
        let out = h.send(
            ADMIN,
            Message::Lookup(LookupRequest {
                names: vec!["rm-a".into(), name.into()],
            }),
        );
        assert!(matches!(
            only(&out, ADMIN),
            Message::Error(e) if e.name == "E_RESOURCE_UNAVAILABLE"
        ));
    }
}

#[test]
fn scale_brings_back_a_resource_whose_instances_failed_to_open() {
    let mut h = Harness::with_failing_open(&[("rm-a", 1)], &[RM1]);
    let out = h.send(
        ADMIN,
        Message::Scale(ScaleRequest {
            resource: RM1,
            instances: 1,
        }),
    );
    assert!(matches!(only(&out, ADMIN), Message::ScaleReply(_)));

    h.start_spawns();
    let view = h.coordinator().state().resources[0].clone();
    assert!(view.available);
    let out = h.involve(OWNER, &Xid::create(), &[RM1]);
    assert!(matches!(only(&out, OWNER), Message::InvolvedReply(_)));
}

#[test]
fn state_lists_resources_and_open_transactions() {
    let mut h = Harness::new(&[("rm-a", 2), ("rm-b", 1)]);
    let trid = Xid::create();
    h.involve(OWNER, &trid, &[RM1, RM2]);

    let out = h.send(ADMIN, Message::State);
    let Message::StateReply(state) = only(&out, ADMIN) else {
        panic!("expected state reply");
    };
    assert_eq!(state.resources.len(), 2);
    assert_eq!(state.resources[0].instances.len(), 2);
    assert!(state.resources[0]
        .instances
        .iter()
        .all(|i| i.state == InstanceState::Idle));
    assert_eq!(state.transactions.len(), 1);
    assert_eq!(state.transactions[0].trid, trid);
    assert_eq!(state.transactions[0].phase, Phase::Involved);
    assert_eq!(state.transactions[0].participants.len(), 2);
    assert!(state.pending.is_empty());
}

#[test]
fn scale_up_asks_for_instances() {
    let mut h = Harness::new(&[("rm-a", 1)]);
    let out = h.send(
        ADMIN,
        Message::Scale(ScaleRequest {
            resource: RM1,
            instances: 3,
        }),
    );
    let Message::ScaleReply(views) = only(&out, ADMIN) else {
        panic!("expected scale reply");
    };
    assert_eq!(views[0].concurrency, 3);

    h.start_spawns();
    assert_eq!(h.instances(RM1).len(), 3);
}

#[test]
fn scale_down_stops_idle_instances() {
    let mut h = Harness::new(&[("rm-a", 3)]);
    let out = h.send(
        ADMIN,
        Message::Scale(ScaleRequest {
            resource: RM1,
            instances: 1,
        }),
    );
    let stopped: Vec<Pid> = out
        .iter()
        .filter(|o| o.message == Message::Shutdown)
        .map(|o| o.to)
        .collect();
    assert_eq!(stopped.len(), 2);
    assert!(matches!(only(&out, ADMIN), Message::ScaleReply(_)));
    assert!(h.coordinator_mut().take_spawns().is_empty());
}

#[test]
fn scale_of_unknown_resource_is_an_error() {
    let mut h = Harness::new(&[("rm-a", 1)]);
    let out = h.send(
        ADMIN,
        Message::Scale(ScaleRequest {
            resource: ResourceId::Local(9),
            instances: 2,
        }),
    );
    assert!(matches!(
        only(&out, ADMIN),
        Message::Error(e) if e.name == "E_UNKNOWN_RESOURCE"
    ));
}

#[test]
fn shutdown_stops_instances_once_and_refuses_new_work() {
    let mut h = Harness::new(&[("rm-a", 2), ("rm-b", 1)]);
    let out = h.send(ADMIN, Message::Shutdown);
    assert_eq!(out.len(), 3);
    assert!(out.iter().all(|o| o.message == Message::Shutdown));
    assert!(h.coordinator().stopping());

    assert!(h.send(ADMIN, Message::Shutdown).is_empty());

    let out = h.involve(OWNER, &Xid::create(), &[RM1]);
    assert!(matches!(
        only(&out, OWNER),
        Message::Error(e) if e.name == "E_SHUTDOWN"
    ));
    let out = h.send(
        ADMIN,
        Message::Scale(ScaleRequest {
            resource: RM1,
            instances: 4,
        }),
    );
    assert!(matches!(
        only(&out, ADMIN),
        Message::Error(e) if e.name == "E_SHUTDOWN"
    ));
}

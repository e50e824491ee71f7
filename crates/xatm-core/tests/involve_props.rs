// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
#![allow(missing_docs)]
#![allow(clippy::unwrap_used, clippy::expect_used)]
//! Involvement is idempotent and keyed by branch.

use proptest::prelude::*;
use xatm_core::Registry;
use xatm_proto::{Pid, ResourceId, Xid};

fn resource() -> impl Strategy<Value = ResourceId> {
    prop_oneof![
        (1u32..5).prop_map(ResourceId::Local),
        (1u32..3).prop_map(ResourceId::Domain),
    ]
}

proptest! {
    #[test]
    fn repeated_involvement_changes_nothing(
        calls in prop::collection::vec((0usize..3, prop::collection::vec(resource(), 0..4)), 1..20)
    ) {
        let trid = Xid::create();
        let branches = [trid.clone(), trid.branch(), trid.branch()];
        let mut registry = Registry::default();
        let mut expected: Vec<(usize, ResourceId)> = Vec::new();

        for (branch, involved) in &calls {
            let already = registry.involve(&branches[*branch], Pid(7), involved).unwrap();
            for id in &already {
                prop_assert!(expected.contains(&(*branch, *id)));
            }
            for id in involved {
                if !expected.contains(&(*branch, *id)) {
                    expected.push((*branch, *id));
                }
            }

            let again = registry.involve(&branches[*branch], Pid(7), involved).unwrap();
            for id in involved {
                prop_assert!(again.contains(id));
            }
        }

        prop_assert_eq!(registry.len(), 1);
        let tx = registry.lookup(&trid.global()).unwrap();
        prop_assert_eq!(tx.participants.len(), expected.len());
        for (branch, id) in &expected {
            prop_assert!(tx.involved_under(&branches[*branch]).contains(id));
        }
    }
}

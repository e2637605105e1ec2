// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Property tests for the invariants listed in spec §8.

use std::sync::Arc;

use pb_core::bus_name::BusName;
use proptest::prelude::*;

use crate::bus::Bus;
use crate::hub::BusChangeHub;
use crate::replay::{evaluate, Node, UnaryOp, UnaryParams};

fn fresh_bus() -> Bus {
    Bus::new(BusName::Messages, 10_000, Arc::new(BusChangeHub::new()))
}

proptest! {
    /// Invariant 1: seq values strictly increase and equal count_total.
    #[test]
    fn seq_is_monotonic_and_matches_count_total(n in 1usize..50) {
        let bus = fresh_bus();
        let mut last_seq = 0u64;
        for i in 0..n {
            let event = bus
                .publish("t", serde_json::json!({"id": format!("e{i}")}), i as i64)
                .unwrap()
                .unwrap();
            prop_assert!(event.seq > last_seq);
            last_seq = event.seq;
        }
        let meta = bus.topic_meta("t").unwrap();
        prop_assert_eq!(meta.count_total, n as u64);
    }

    /// Invariant 3: after delete(id), no subsequent publish with the same
    /// id persists, and the topic excludes it.
    #[test]
    fn tombstone_blocks_future_republish(ids in prop::collection::vec("[a-z]{3,6}", 1..10)) {
        let bus = fresh_bus();
        for id in &ids {
            bus.publish("t", serde_json::json!({"id": id}), 0).unwrap();
        }
        let victim = ids[0].clone();
        bus.delete(&victim);
        let republished = bus.publish("t", serde_json::json!({"id": victim.clone()}), 1).unwrap();
        prop_assert!(republished.is_none());
        let recent = bus.get_recent("t", 1000);
        prop_assert!(recent.iter().all(|e| e.index.id.as_deref() != Some(victim.as_str())));
    }

    /// Invariant 4: each successful mutation bumps revision by exactly one.
    #[test]
    fn revision_increments_exactly_once_per_mutation(n in 1usize..30) {
        let bus = fresh_bus();
        let mut last_rev = 0u64;
        for i in 0..n {
            bus.publish("t", serde_json::json!({"id": format!("e{i}")}), i as i64).unwrap();
            let rev = bus.revision();
            prop_assert_eq!(rev, last_rev + 1);
            last_rev = rev;
        }
    }

    /// Invariant 6: Get -> filter(equal-cond) applied twice yields equal
    /// ordered lists.
    #[test]
    fn replay_plan_is_idempotent_on_repeat_application(n in 1usize..20) {
        let bus = fresh_bus();
        for i in 0..n {
            bus.publish(
                "t",
                serde_json::json!({"id": format!("e{i}"), "source": if i % 2 == 0 { "A" } else { "B" }}),
                i as i64,
            )
            .unwrap();
        }
        let plan = Node::Unary {
            op: UnaryOp::WhereEq,
            child: Box::new(Node::Get { topic: None, limit: 1000 }),
            params: UnaryParams {
                field: Some("source".to_string()),
                values: vec!["A".to_string()],
                ..Default::default()
            },
        };
        let first: Vec<_> = evaluate(&plan, &bus).into_iter().map(|e| e.seq).collect();
        let second: Vec<_> = evaluate(&plan, &bus).into_iter().map(|e| e.seq).collect();
        prop_assert_eq!(first, second);
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! proptest strategies shared by this crate's and downstream crates'
//! property tests (enabled via the `test-support` feature).

#![cfg(feature = "proptest")]

use proptest::prelude::*;
use serde_json::Value;

/// A small alphabet of topic names, deliberately including collisions so
/// generated sequences exercise per-topic ring eviction.
pub fn topic_name() -> impl Strategy<Value = String> {
    prop_oneof!["alpha", "beta", "gamma"].prop_map(String::from)
}

/// A payload carrying a unique-ish id plus an index-projectable priority,
/// for tests that need `publish` + `delete` interplay.
pub fn payload_with_id() -> impl Strategy<Value = (String, Value)> {
    ("[a-z]{4,8}", 0u8..=9).prop_map(|(id, priority)| {
        (id.clone(), serde_json::json!({"id": id, "priority": priority}))
    })
}

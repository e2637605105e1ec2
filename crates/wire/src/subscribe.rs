// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `BUS_SUBSCRIBE` request/reply shape (spec §6). The `plan` tree itself is
//! opaque `Value` here; `pb-bus` owns the `Node` type and parses it, since
//! evaluating a plan needs the store and this crate must not depend on it.

use pb_core::bus_name::BusName;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSubscribeRequest {
    pub bus: BusName,
    pub rules: Vec<String>,
    pub deliver: DeliverMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debounce_ms: Option<u64>,
    pub timeout: f64,
}

/// Only `delta` delivery is supported in this core (spec §4.4 "Delivery
/// modes"); the variant still round-trips other strings so a future
/// collaborator introducing `snapshot` delivery doesn't break wire
/// compatibility, but the router rejects anything but `Delta` today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliverMode {
    Delta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusSubscribeReply {
    pub ok: bool,
    pub sub_id: pb_core::ids::SubscriptionId,
    pub bus: BusName,
    pub rev: u64,
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Ingest envelope for the push plane (spec §6): `delta_batch` and
//! `snapshot` payloads external producers deliver into a bus.

use pb_core::bus_name::BusName;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestItem {
    pub store: BusName,
    pub topic: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMode {
    Replace,
    Append,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestEnvelope {
    DeltaBatch {
        v: u8,
        from: String,
        ts: u64,
        batch_id: String,
        items: Vec<IngestItem>,
    },
    Snapshot {
        v: u8,
        from: String,
        ts: u64,
        store: BusName,
        topic: String,
        mode: SnapshotMode,
        items: Vec<Value>,
    },
}

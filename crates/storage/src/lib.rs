// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pb-storage: on-disk persistence for plugin checkpoint snapshots and
//! run/export records (spec §6). Neither store touches a network socket
//! or spawns a process; everything here is plain files plus `zstd`.

pub mod run_store;
pub mod snapshot;

pub use run_store::{ExportItem, ExportKind, RunRecord, RunStatus, RunStore, RunStoreError};
pub use snapshot::{
    FileCheckpointBackend, Migration, MigrationError, MigrationRegistry, SnapshotError, SnapshotStore,
    CURRENT_SNAPSHOT_VERSION,
};

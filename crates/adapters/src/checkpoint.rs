// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Checkpoint backends for a plugin's freezable attributes (Design Notes
//! "Checkpointing freezable attributes"). A plugin marks a subset of its
//! state freezable; on `freeze` the host asks the plugin for a snapshot
//! and hands it to a [`CheckpointBackend`] keyed by [`PluginId`]. The
//! `off` and `memory` variants live here; the `file` variant is
//! implemented in the persistence crate, which round-trips through
//! `pb-storage`'s on-disk snapshot envelope instead of reimplementing it.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;
use pb_core::ids::PluginId;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("no checkpoint found for plugin {0}")]
    NotFound(PluginId),
    #[error("checkpoint backend I/O error: {0}")]
    Io(#[source] std::io::Error),
    #[error("checkpoint serialization error: {0}")]
    Serde(#[source] serde_json::Error),
}

#[async_trait]
pub trait CheckpointBackend: Send + Sync {
    async fn save(&self, plugin_id: &PluginId, snapshot: Value) -> Result<(), CheckpointError>;
    async fn load(&self, plugin_id: &PluginId) -> Result<Value, CheckpointError>;
    async fn clear(&self, plugin_id: &PluginId);
}

/// Checkpointing disabled: `save` is a no-op, `load` always misses. The
/// default when a plugin declares no freezable attributes.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopCheckpointBackend;

#[async_trait]
impl CheckpointBackend for NoopCheckpointBackend {
    async fn save(&self, _plugin_id: &PluginId, _snapshot: Value) -> Result<(), CheckpointError> {
        Ok(())
    }

    async fn load(&self, plugin_id: &PluginId) -> Result<Value, CheckpointError> {
        Err(CheckpointError::NotFound(*plugin_id))
    }

    async fn clear(&self, _plugin_id: &PluginId) {}
}

/// In-memory checkpoint store: survives plugin restarts within the same
/// host process but not a daemon restart. Used by tests and by hosts run
/// with persistence disabled.
#[derive(Default)]
pub struct MemoryCheckpointBackend {
    snapshots: RwLock<HashMap<PluginId, Value>>,
}

impl MemoryCheckpointBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointBackend for MemoryCheckpointBackend {
    async fn save(&self, plugin_id: &PluginId, snapshot: Value) -> Result<(), CheckpointError> {
        self.snapshots.write().insert(*plugin_id, snapshot);
        Ok(())
    }

    async fn load(&self, plugin_id: &PluginId) -> Result<Value, CheckpointError> {
        self.snapshots.read().get(plugin_id).cloned().ok_or(CheckpointError::NotFound(*plugin_id))
    }

    async fn clear(&self, plugin_id: &PluginId) {
        self.snapshots.write().remove(plugin_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_backend_never_yields_a_snapshot() {
        let backend = NoopCheckpointBackend;
        let id = PluginId::from_string("plg-a");
        backend.save(&id, serde_json::json!({"k": "v"})).await.unwrap();
        assert!(backend.load(&id).await.is_err());
    }

    #[tokio::test]
    async fn memory_backend_round_trips_a_snapshot() {
        let backend = MemoryCheckpointBackend::new();
        let id = PluginId::from_string("plg-a");
        backend.save(&id, serde_json::json!({"count": 3})).await.unwrap();
        let loaded = backend.load(&id).await.unwrap();
        assert_eq!(loaded["count"], 3);
    }

    #[tokio::test]
    async fn clear_removes_a_saved_snapshot() {
        let backend = MemoryCheckpointBackend::new();
        let id = PluginId::from_string("plg-a");
        backend.save(&id, serde_json::json!({})).await.unwrap();
        backend.clear(&id).await;
        assert!(backend.load(&id).await.is_err());
    }

    #[tokio::test]
    async fn missing_plugin_is_not_found() {
        let backend = MemoryCheckpointBackend::new();
        let id = PluginId::from_string("plg-missing");
        match backend.load(&id).await {
            Err(CheckpointError::NotFound(missing)) => assert_eq!(missing, id),
            other => panic!("expected NotFound, got {other:?}"),
        }
    }
}

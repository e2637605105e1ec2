// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! On-disk checkpoint snapshots for a plugin's freezable attributes.
//!
//! Mirrors the teacher's versioned, zstd-compressed snapshot file: a
//! small JSON envelope `{v, seq, state, created_at}` wrapped in a zstd
//! frame, with a `MigrationRegistry` that either no-ops same-version
//! loads, walks a registered chain of migrations, or refuses to load a
//! file newer than this binary understands.

use std::io::{Read, Write};
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pb_adapters::checkpoint::{CheckpointBackend, CheckpointError};
use pb_core::ids::PluginId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const CURRENT_SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Error)]
pub enum MigrationError {
    #[error("snapshot version {0} is newer than supported ({1})")]
    TooNew(u32, u32),
    #[error("no migration path from version {0} to {1}")]
    NoPath(u32, u32),
}

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotEnvelope {
    v: u32,
    seq: u64,
    state: Value,
    created_at: DateTime<Utc>,
}

pub trait Migration: Send + Sync {
    fn source_version(&self) -> u32;
    fn target_version(&self) -> u32;
    fn migrate(&self, snapshot: &mut Value) -> Result<(), MigrationError>;
}

#[derive(Default)]
pub struct MigrationRegistry {
    migrations: Vec<Box<dyn Migration>>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self { migrations: Vec::new() }
    }

    pub fn register(&mut self, migration: Box<dyn Migration>) {
        self.migrations.push(migration);
    }

    pub fn migrate_to(&self, mut envelope: Value, target: u32) -> Result<Value, MigrationError> {
        let mut current = envelope["v"].as_u64().unwrap_or(0) as u32;
        if current == target {
            return Ok(envelope);
        }
        if current > target {
            return Err(MigrationError::TooNew(current, target));
        }
        while current != target {
            let next = self.migrations.iter().find(|m| m.source_version() == current);
            match next {
                Some(migration) => {
                    migration.migrate(&mut envelope)?;
                    current = migration.target_version();
                    envelope["v"] = Value::from(current);
                }
                None => return Err(MigrationError::NoPath(current, target)),
            }
        }
        Ok(envelope)
    }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot I/O error: {0}")]
    Io(#[source] std::io::Error),
    #[error("snapshot (de)serialization error: {0}")]
    Serde(#[source] serde_json::Error),
    #[error(transparent)]
    Migration(#[from] MigrationError),
}

/// Writes and reads one plugin's checkpoint snapshot as a zstd-compressed
/// JSON envelope at `<root>/<plugin_id>.snapshot.zst`.
pub struct SnapshotStore {
    root: PathBuf,
    migrations: MigrationRegistry,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), migrations: MigrationRegistry::new() }
    }

    pub fn with_migrations(root: impl Into<PathBuf>, migrations: MigrationRegistry) -> Self {
        Self { root: root.into(), migrations }
    }

    fn path_for(&self, plugin_id: &PluginId) -> PathBuf {
        self.root.join(format!("{plugin_id}.snapshot.zst"))
    }

    pub fn save(&self, plugin_id: &PluginId, seq: u64, state: Value) -> Result<(), SnapshotError> {
        std::fs::create_dir_all(&self.root).map_err(SnapshotError::Io)?;
        let envelope = SnapshotEnvelope { v: CURRENT_SNAPSHOT_VERSION, seq, state, created_at: Utc::now() };
        let json = serde_json::to_vec(&envelope).map_err(SnapshotError::Serde)?;
        let path = self.path_for(plugin_id);
        let tmp_path = path.with_extension("zst.tmp");
        let file = std::fs::File::create(&tmp_path).map_err(SnapshotError::Io)?;
        let mut encoder = zstd::stream::Encoder::new(file, 3).map_err(SnapshotError::Io)?;
        encoder.write_all(&json).map_err(SnapshotError::Io)?;
        encoder.finish().map_err(SnapshotError::Io)?;
        std::fs::rename(&tmp_path, &path).map_err(SnapshotError::Io)?;
        Ok(())
    }

    pub fn load(&self, plugin_id: &PluginId) -> Result<(u64, Value), SnapshotError> {
        let path = self.path_for(plugin_id);
        let file = std::fs::File::open(&path).map_err(SnapshotError::Io)?;
        let mut decoder = zstd::stream::Decoder::new(file).map_err(SnapshotError::Io)?;
        let mut buf = Vec::new();
        decoder.read_to_end(&mut buf).map_err(SnapshotError::Io)?;
        let raw: Value = serde_json::from_slice(&buf).map_err(SnapshotError::Serde)?;
        let migrated = self.migrations.migrate_to(raw, CURRENT_SNAPSHOT_VERSION)?;
        let envelope: SnapshotEnvelope = serde_json::from_value(migrated).map_err(SnapshotError::Serde)?;
        Ok((envelope.seq, envelope.state))
    }

    pub fn exists(&self, plugin_id: &PluginId) -> bool {
        self.path_for(plugin_id).exists()
    }
}

/// Adapts [`SnapshotStore`] to [`CheckpointBackend`] so `pb-host` can use
/// file-backed persistence through the same trait object the adapters
/// crate's `off`/`memory` backends implement.
pub struct FileCheckpointBackend {
    store: parking_lot::Mutex<SnapshotStore>,
    seq: std::sync::atomic::AtomicU64,
}

impl FileCheckpointBackend {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { store: parking_lot::Mutex::new(SnapshotStore::new(root)), seq: std::sync::atomic::AtomicU64::new(0) }
    }

    pub fn root(&self) -> PathBuf {
        self.store.lock().root.clone()
    }
}

#[async_trait]
impl CheckpointBackend for FileCheckpointBackend {
    async fn save(&self, plugin_id: &PluginId, snapshot: Value) -> Result<(), CheckpointError> {
        let seq = self.seq.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        let store_path_err = self.store.lock().save(plugin_id, seq, snapshot);
        store_path_err.map_err(|e| match e {
            SnapshotError::Io(io) => CheckpointError::Io(io),
            other => CheckpointError::Io(std::io::Error::other(other.to_string())),
        })
    }

    async fn load(&self, plugin_id: &PluginId) -> Result<Value, CheckpointError> {
        self.store
            .lock()
            .load(plugin_id)
            .map(|(_, state)| state)
            .map_err(|_| CheckpointError::NotFound(*plugin_id))
    }

    async fn clear(&self, plugin_id: &PluginId) {
        let path = self.store.lock().path_for(plugin_id);
        let _ = std::fs::remove_file(path);
    }
}

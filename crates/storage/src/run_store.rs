// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Persistence for the run protocol (spec §6 "Run protocol"): one
//! directory per run holding `record.json` (the current `RunRecord`),
//! an append-only `export.jsonl` of `ExportItem` rows, and a `blobs/`
//! subdirectory for uploaded artifacts. Grounded on the same module
//! family as [`crate::snapshot`] — plain files, no embedded database,
//! matching the rest of the pack's state persistence.

use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use pb_core::ids::{BlobId, PluginId, RunId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    CancelRequested,
    Canceled,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub plugin_id: PluginId,
    pub entry_id: String,
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub status: RunStatus,
    pub run_token: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExportKind {
    Text { content: String },
    Url { url: String },
    Inline { bytes: Vec<u8>, content_type: String },
    Blob { blob_id: BlobId, content_type: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportItem {
    pub run_id: RunId,
    pub seq: u64,
    pub kind: ExportKind,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum RunStoreError {
    #[error("run {0} not found")]
    NotFound(RunId),
    #[error("run store I/O error: {0}")]
    Io(#[source] std::io::Error),
    #[error("run store (de)serialization error: {0}")]
    Serde(#[source] serde_json::Error),
}

/// Disk-backed run/export/blob store. One [`RunStore`] per daemon,
/// coarse-locked — run volume is low enough (human/agent-triggered,
/// not a hot path) that a single mutex beats per-run lock bookkeeping.
pub struct RunStore {
    root: PathBuf,
    lock: parking_lot::Mutex<()>,
}

impl RunStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into(), lock: parking_lot::Mutex::new(()) }
    }

    fn run_dir(&self, run_id: &RunId) -> PathBuf {
        self.root.join(run_id.to_string())
    }

    fn record_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("record.json")
    }

    fn export_path(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("export.jsonl")
    }

    fn blobs_dir(&self, run_id: &RunId) -> PathBuf {
        self.run_dir(run_id).join("blobs")
    }

    pub fn create(&self, record: RunRecord) -> Result<(), RunStoreError> {
        let _guard = self.lock.lock();
        let dir = self.run_dir(&record.run_id);
        std::fs::create_dir_all(&dir).map_err(RunStoreError::Io)?;
        self.write_record(&record)
    }

    fn write_record(&self, record: &RunRecord) -> Result<(), RunStoreError> {
        let json = serde_json::to_vec_pretty(record).map_err(RunStoreError::Serde)?;
        std::fs::write(self.record_path(&record.run_id), json).map_err(RunStoreError::Io)
    }

    pub fn get(&self, run_id: &RunId) -> Result<RunRecord, RunStoreError> {
        let _guard = self.lock.lock();
        self.read_record(run_id)
    }

    fn read_record(&self, run_id: &RunId) -> Result<RunRecord, RunStoreError> {
        let bytes = std::fs::read(self.record_path(run_id)).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RunStoreError::NotFound(*run_id)
            } else {
                RunStoreError::Io(e)
            }
        })?;
        serde_json::from_slice(&bytes).map_err(RunStoreError::Serde)
    }

    /// Loads the record, applies `f`, persists the result. `f` sets
    /// `updated_at` itself so in-memory callers and disk state can't
    /// drift on the timestamp.
    pub fn update<F>(&self, run_id: &RunId, f: F) -> Result<RunRecord, RunStoreError>
    where
        F: FnOnce(&mut RunRecord),
    {
        let _guard = self.lock.lock();
        let mut record = self.read_record(run_id)?;
        f(&mut record);
        self.write_record(&record)?;
        Ok(record)
    }

    pub fn append_export_item(&self, item: &ExportItem) -> Result<(), RunStoreError> {
        let _guard = self.lock.lock();
        let dir = self.run_dir(&item.run_id);
        std::fs::create_dir_all(&dir).map_err(RunStoreError::Io)?;
        let line = serde_json::to_string(item).map_err(RunStoreError::Serde)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.export_path(&item.run_id))
            .map_err(RunStoreError::Io)?;
        writeln!(file, "{line}").map_err(RunStoreError::Io)
    }

    pub fn list_export_items(&self, run_id: &RunId, after: Option<u64>, limit: usize) -> Result<Vec<ExportItem>, RunStoreError> {
        let _guard = self.lock.lock();
        let path = self.export_path(run_id);
        let contents = match std::fs::read_to_string(&path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RunStoreError::Io(e)),
        };
        let mut items = Vec::new();
        for line in contents.lines() {
            if line.trim().is_empty() {
                continue;
            }
            let item: ExportItem = serde_json::from_str(line).map_err(RunStoreError::Serde)?;
            if after.is_none_or(|cursor| item.seq > cursor) {
                items.push(item);
            }
            if items.len() >= limit {
                break;
            }
        }
        Ok(items)
    }

    pub fn save_blob(&self, run_id: &RunId, blob_id: &BlobId, bytes: &[u8]) -> Result<(), RunStoreError> {
        let _guard = self.lock.lock();
        let dir = self.blobs_dir(run_id);
        std::fs::create_dir_all(&dir).map_err(RunStoreError::Io)?;
        std::fs::write(dir.join(blob_id.to_string()), bytes).map_err(RunStoreError::Io)
    }

    pub fn load_blob(&self, run_id: &RunId, blob_id: &BlobId) -> Result<Vec<u8>, RunStoreError> {
        let _guard = self.lock.lock();
        std::fs::read(self.blobs_dir(run_id).join(blob_id.to_string())).map_err(RunStoreError::Io)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record(run_id: RunId) -> RunRecord {
        let now = Utc::now();
        RunRecord {
            run_id,
            plugin_id: PluginId::from_string("plg-a"),
            entry_id: "entry.main".to_string(),
            args: serde_json::json!({}),
            task_id: None,
            trace_id: None,
            idempotency_key: None,
            status: RunStatus::Queued,
            run_token: "tok".to_string(),
            expires_at: now,
            created_at: now,
            updated_at: now,
            error: None,
        }
    }

    #[test]
    fn create_then_get_round_trips_the_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let run_id = RunId::new();
        store.create(sample_record(run_id)).unwrap();
        let loaded = store.get(&run_id).unwrap();
        assert_eq!(loaded.run_id, run_id);
        assert_eq!(loaded.status, RunStatus::Queued);
    }

    #[test]
    fn update_persists_the_mutated_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let run_id = RunId::new();
        store.create(sample_record(run_id)).unwrap();
        store
            .update(&run_id, |r| {
                r.status = RunStatus::Running;
                r.updated_at = Utc::now();
            })
            .unwrap();
        let loaded = store.get(&run_id).unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
    }

    #[test]
    fn get_on_unknown_run_errors() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        assert!(store.get(&RunId::new()).is_err());
    }

    #[test]
    fn export_items_paginate_after_cursor_and_limit() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let run_id = RunId::new();
        for i in 0..5u64 {
            store
                .append_export_item(&ExportItem {
                    run_id,
                    seq: i,
                    kind: ExportKind::Text { content: format!("item-{i}") },
                    created_at: Utc::now(),
                })
                .unwrap();
        }
        let page = store.list_export_items(&run_id, Some(1), 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].seq, 2);
        assert_eq!(page[1].seq, 3);
    }

    #[test]
    fn export_items_on_run_with_no_items_yet_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let run_id = RunId::new();
        assert!(store.list_export_items(&run_id, None, 10).unwrap().is_empty());
    }

    #[test]
    fn blobs_round_trip_through_the_run_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = RunStore::new(dir.path());
        let run_id = RunId::new();
        let blob_id = BlobId::new();
        store.save_blob(&run_id, &blob_id, b"hello").unwrap();
        let loaded = store.load_blob(&run_id, &blob_id).unwrap();
        assert_eq!(loaded, b"hello");
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The Run protocol (`spec.md` §6 "Run protocol"): `RunRecord` lifecycle,
//! export item pagination, blob uploads, and the HMAC-signed run token the
//! `/ws/run` session (`ws.rs`) authenticates with. Persistence is
//! `pb_storage::RunStore`; this module owns the state transitions, token
//! scheme, and in-flight upload bookkeeping the store doesn't know about.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use parking_lot::Mutex;
use pb_core::bus_name::BusName;
use pb_core::config::HostConfig;
use pb_core::ids::{BlobId, PluginId, RunId, UploadId};
use pb_core::Clock;
use pb_storage::run_store::{ExportItem, ExportKind, RunRecord, RunStatus, RunStore, RunStoreError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::Sha256;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Store(#[from] RunStoreError),
    #[error("run {0} is already terminal")]
    AlreadyTerminal(RunId),
    #[error("upload {0} not found or already completed")]
    UnknownUpload(UploadId),
    #[error("upload exceeds the {0} byte cap")]
    UploadTooLarge(u64),
    #[error("malformed run token")]
    MalformedToken,
    #[error("run token signature does not match")]
    BadSignature,
    #[error("run token expired at {0}")]
    Expired(i64),
    #[error("run token is for run {token_run}, not {requested}")]
    RunMismatch { token_run: RunId, requested: RunId },
}

/// Decoded payload of a run token (spec §6: `{run_id, exp, nonce, perm}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunTokenPayload {
    pub run_id: RunId,
    /// Unix seconds.
    pub exp: i64,
    pub nonce: String,
    pub perm: String,
}

/// `base64url(payload).base64url(hmac_sha256(key, p1))`, spec §6 verbatim.
pub fn issue_token(secret: &str, payload: &RunTokenPayload) -> Result<String, RunError> {
    let json = serde_json::to_vec(payload).map_err(|_| RunError::MalformedToken)?;
    let p1 = URL_SAFE_NO_PAD.encode(json);
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| RunError::MalformedToken)?;
    mac.update(p1.as_bytes());
    let p2 = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
    Ok(format!("{p1}.{p2}"))
}

/// Verifies `token`'s signature and expiry, returning its payload. Does not
/// check which run the caller is asking about — callers that need
/// `run_id` to match compare it themselves via `RunTokenPayload::run_id`.
pub fn verify_token(secret: &str, token: &str, now_secs: i64) -> Result<RunTokenPayload, RunError> {
    let (p1, p2) = token.split_once('.').ok_or(RunError::MalformedToken)?;
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| RunError::MalformedToken)?;
    mac.update(p1.as_bytes());
    let signature = URL_SAFE_NO_PAD.decode(p2).map_err(|_| RunError::MalformedToken)?;
    mac.verify_slice(&signature).map_err(|_| RunError::BadSignature)?;

    let json = URL_SAFE_NO_PAD.decode(p1).map_err(|_| RunError::MalformedToken)?;
    let payload: RunTokenPayload = serde_json::from_slice(&json).map_err(|_| RunError::MalformedToken)?;
    if payload.exp < now_secs {
        return Err(RunError::Expired(payload.exp));
    }
    Ok(payload)
}

struct PendingUpload {
    run_id: RunId,
}

/// Owns run/export/blob persistence plus the bookkeeping a `RunStore`
/// alone doesn't carry: token issuance, in-flight upload sessions, and the
/// `runs`/`export` bus mirrors subscribers watch for change events.
pub struct RunManager<C: Clock> {
    store: Arc<RunStore>,
    buses: Arc<pb_bus::BusRegistry>,
    cfg: Arc<HostConfig>,
    clock: C,
    uploads: Mutex<HashMap<UploadId, PendingUpload>>,
}

impl<C: Clock> RunManager<C> {
    pub fn new(store: Arc<RunStore>, buses: Arc<pb_bus::BusRegistry>, cfg: Arc<HostConfig>, clock: C) -> Self {
        Self { store, buses, cfg, clock, uploads: Mutex::new(HashMap::new()) }
    }

    fn publish_run_change(&self, run_id: &RunId, record: &RunRecord) {
        if let Some(bus) = self.buses.bus(BusName::Runs) {
            let _ = bus.publish(
                "runs",
                serde_json::json!({ "id": run_id.to_string(), "record": record }),
                self.clock.epoch_ms() as i64,
            );
        }
    }

    /// `POST /runs` (spec §6): mints a run record in `Queued` status and a
    /// run token scoped to it. The caller (the run protocol's HTTP
    /// collaborator, out of core scope) schedules the background task that
    /// transitions it to `Running`.
    pub fn create(
        &self,
        plugin_id: PluginId,
        entry_id: String,
        args: Value,
        task_id: Option<String>,
        trace_id: Option<String>,
        idempotency_key: Option<String>,
    ) -> Result<RunRecord, RunError> {
        let run_id = RunId::new();
        let now = chrono::Utc::now();
        let expires_at = now + chrono::Duration::from_std(self.cfg.run_token_ttl).unwrap_or_default();
        let token = issue_token(
            &self.cfg.run_token_secret,
            &RunTokenPayload {
                run_id,
                exp: expires_at.timestamp(),
                nonce: pb_core::id::short(&nanoid::nanoid!(12), 12).to_string(),
                perm: "run".to_string(),
            },
        )?;
        let record = RunRecord {
            run_id,
            plugin_id,
            entry_id,
            args,
            task_id,
            trace_id,
            idempotency_key,
            status: RunStatus::Queued,
            run_token: token,
            expires_at,
            created_at: now,
            updated_at: now,
            error: None,
        };
        self.store.create(record.clone())?;
        self.publish_run_change(&run_id, &record);
        Ok(record)
    }

    pub fn get(&self, run_id: &RunId) -> Result<RunRecord, RunError> {
        Ok(self.store.get(run_id)?)
    }

    /// Transitions status, stamping `updated_at` and optionally an error
    /// payload (the background task driving a run calls this on
    /// `running` -> terminal).
    pub fn set_status(&self, run_id: &RunId, status: RunStatus, error: Option<Value>) -> Result<RunRecord, RunError> {
        let now = chrono::Utc::now();
        let record = self.store.update(run_id, |r| {
            r.status = status;
            r.error = error;
            r.updated_at = now;
        })?;
        self.publish_run_change(run_id, &record);
        Ok(record)
    }

    /// `POST /runs/{run_id}/cancel` (spec §6): `queued` commits straight to
    /// `canceled`; `running` only requests cancellation, leaving the
    /// terminal transition to the task actually driving the plugin call.
    pub fn cancel(&self, run_id: &RunId) -> Result<RunRecord, RunError> {
        let current = self.store.get(run_id)?;
        let next = match current.status {
            RunStatus::Queued => RunStatus::Canceled,
            RunStatus::Running => RunStatus::CancelRequested,
            _ => return Err(RunError::AlreadyTerminal(*run_id)),
        };
        self.set_status(run_id, next, None)
    }

    pub fn push_export(&self, run_id: &RunId, kind: ExportKind, seq: u64) -> Result<ExportItem, RunError> {
        let item = ExportItem { run_id: *run_id, seq, kind, created_at: chrono::Utc::now() };
        self.store.append_export_item(&item)?;
        if let Some(bus) = self.buses.bus(BusName::Export) {
            let _ = bus.publish(
                "export",
                serde_json::json!({ "run_id": run_id.to_string(), "item": item }),
                self.clock.epoch_ms() as i64,
            );
        }
        Ok(item)
    }

    pub fn list_export(&self, run_id: &RunId, after: Option<u64>, limit: usize) -> Result<Vec<ExportItem>, RunError> {
        Ok(self.store.list_export_items(run_id, after, limit)?)
    }

    /// `POST /runs/{run_id}/uploads`: reserves an upload session. The blob
    /// itself only lands on disk once `complete_upload` receives the full
    /// byte stream — this core doesn't do resumable/chunked uploads, one
    /// `PUT` is the whole contract.
    pub fn begin_upload(&self, run_id: RunId) -> UploadId {
        let upload_id = UploadId::new();
        self.uploads.lock().insert(upload_id, PendingUpload { run_id });
        upload_id
    }

    /// `PUT /uploads/{upload_id}`: validates size against
    /// `BLOB_UPLOAD_MAX_BYTES`, persists the blob, and retires the upload
    /// session.
    pub fn complete_upload(&self, upload_id: UploadId, bytes: &[u8]) -> Result<BlobId, RunError> {
        if bytes.len() as u64 > self.cfg.blob_upload_max_bytes {
            return Err(RunError::UploadTooLarge(self.cfg.blob_upload_max_bytes));
        }
        let pending = self.uploads.lock().remove(&upload_id).ok_or(RunError::UnknownUpload(upload_id))?;
        let blob_id = BlobId::new();
        self.store.save_blob(&pending.run_id, &blob_id, bytes)?;
        Ok(blob_id)
    }

    /// `GET /runs/{run_id}/blobs/{blob_id}`.
    pub fn get_blob(&self, run_id: &RunId, blob_id: &BlobId) -> Result<Vec<u8>, RunError> {
        Ok(self.store.load_blob(run_id, blob_id)?)
    }

    /// Verifies `token` against this manager's secret and that it was
    /// minted for `run_id`, for the `/ws/run` auth handshake (spec §6).
    pub fn authenticate(&self, run_id: &RunId, token: &str) -> Result<RunTokenPayload, RunError> {
        let payload = verify_token(&self.cfg.run_token_secret, token, chrono::Utc::now().timestamp())?;
        if payload.run_id != *run_id {
            return Err(RunError::RunMismatch { token_run: payload.run_id, requested: *run_id });
        }
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pb_core::FakeClock;

    fn manager() -> (RunManager<FakeClock>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(RunStore::new(dir.path()));
        let buses = Arc::new(pb_bus::BusRegistry::new(100, 100));
        let cfg = Arc::new(HostConfig::default());
        (RunManager::new(store, buses, cfg, FakeClock::new()), dir)
    }

    #[test]
    fn token_round_trips_and_matches_run_id() {
        let run_id = RunId::new();
        let payload = RunTokenPayload { run_id, exp: 9_999_999_999, nonce: "n".into(), perm: "run".into() };
        let token = issue_token("secret", &payload).unwrap();
        let verified = verify_token("secret", &token, 0).unwrap();
        assert_eq!(verified.run_id, run_id);
    }

    #[test]
    fn tampered_signature_is_rejected() {
        let payload = RunTokenPayload { run_id: RunId::new(), exp: 9_999_999_999, nonce: "n".into(), perm: "run".into() };
        let token = issue_token("secret", &payload).unwrap();
        let tampered = format!("{}x", token);
        assert!(matches!(verify_token("secret", &tampered, 0), Err(RunError::BadSignature) | Err(RunError::MalformedToken)));
    }

    #[test]
    fn expired_token_is_rejected() {
        let payload = RunTokenPayload { run_id: RunId::new(), exp: 0, nonce: "n".into(), perm: "run".into() };
        let token = issue_token("secret", &payload).unwrap();
        assert!(matches!(verify_token("secret", &token, 10), Err(RunError::Expired(_))));
    }

    #[test]
    fn create_then_get_round_trips() {
        let (mgr, _dir) = manager();
        let record = mgr.create(PluginId::from_string("plg-a"), "entry.main".into(), Value::Null, None, None, None).unwrap();
        let fetched = mgr.get(&record.run_id).unwrap();
        assert_eq!(fetched.status, RunStatus::Queued);
    }

    #[test]
    fn cancel_queued_run_commits_canceled_immediately() {
        let (mgr, _dir) = manager();
        let record = mgr.create(PluginId::from_string("plg-a"), "entry.main".into(), Value::Null, None, None, None).unwrap();
        let canceled = mgr.cancel(&record.run_id).unwrap();
        assert_eq!(canceled.status, RunStatus::Canceled);
    }

    #[test]
    fn cancel_running_run_only_requests_cancellation() {
        let (mgr, _dir) = manager();
        let record = mgr.create(PluginId::from_string("plg-a"), "entry.main".into(), Value::Null, None, None, None).unwrap();
        mgr.set_status(&record.run_id, RunStatus::Running, None).unwrap();
        let result = mgr.cancel(&record.run_id).unwrap();
        assert_eq!(result.status, RunStatus::CancelRequested);
    }

    #[test]
    fn upload_round_trips_through_begin_and_complete() {
        let (mgr, _dir) = manager();
        let record = mgr.create(PluginId::from_string("plg-a"), "entry.main".into(), Value::Null, None, None, None).unwrap();
        let upload_id = mgr.begin_upload(record.run_id);
        let blob_id = mgr.complete_upload(upload_id, b"hello").unwrap();
        assert_eq!(mgr.get_blob(&record.run_id, &blob_id).unwrap(), b"hello");
    }

    #[test]
    fn upload_over_cap_is_rejected() {
        let (mgr, _dir) = manager();
        let record = mgr.create(PluginId::from_string("plg-a"), "entry.main".into(), Value::Null, None, None, None).unwrap();
        let upload_id = mgr.begin_upload(record.run_id);
        let huge = vec![0u8; (mgr.cfg.blob_upload_max_bytes + 1) as usize];
        assert!(matches!(mgr.complete_upload(upload_id, &huge), Err(RunError::UploadTooLarge(_))));
    }

    #[test]
    fn authenticate_rejects_token_minted_for_a_different_run() {
        let (mgr, _dir) = manager();
        let a = mgr.create(PluginId::from_string("plg-a"), "entry.main".into(), Value::Null, None, None, None).unwrap();
        let b = mgr.create(PluginId::from_string("plg-a"), "entry.main".into(), Value::Null, None, None, None).unwrap();
        assert!(matches!(mgr.authenticate(&b.run_id, &a.run_token), Err(RunError::RunMismatch { .. })));
    }
}

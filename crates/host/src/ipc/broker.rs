// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The pending-request broker. Design Notes flags the naive architecture
//! ("a shared map plus a single global notify event every waiter polls")
//! as a re-architecture target; this replaces the global event with one
//! `tokio::sync::oneshot` per request, so resolving request A never wakes
//! every other caller waiting on B through Z.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use pb_core::envelope::ResultEnvelope;
use pb_core::ids::RequestId;
use tokio::sync::oneshot;

struct PendingEntry {
    tx: oneshot::Sender<ResultEnvelope>,
    registered_at: Instant,
}

/// Owns every in-flight request's wake channel. One instance per
/// `ControlPlane`, shared by every [`crate::plugin_host::PluginHost`] and
/// the router's plugin-to-plugin call path.
pub struct RequestBroker {
    pending: Mutex<HashMap<RequestId, PendingEntry>>,
    max_age: Duration,
}

impl RequestBroker {
    pub fn new(max_age: Duration) -> Self {
        Self { pending: Mutex::new(HashMap::new()), max_age }
    }

    /// Registers a waiter for `request_id`. Overwrites (and silently drops)
    /// any prior registration under the same id — callers mint a fresh
    /// [`RequestId`] per call, so a collision would indicate a bug upstream,
    /// not a retry to preserve.
    pub fn register(&self, request_id: RequestId, tx: oneshot::Sender<ResultEnvelope>) {
        self.pending.lock().insert(request_id, PendingEntry { tx, registered_at: Instant::now() });
    }

    /// Delivers `envelope` to the waiter for `request_id`, if one is still
    /// registered. Returns `false` for an unknown or already-resolved id
    /// (late reply after the caller's own timeout already gave up).
    pub fn resolve(&self, request_id: &RequestId, envelope: ResultEnvelope) -> bool {
        let entry = self.pending.lock().remove(request_id);
        match entry {
            Some(entry) => entry.tx.send(envelope).is_ok(),
            None => false,
        }
    }

    /// Removes a registration without resolving it, dropping the `Sender`
    /// so the waiter's `rx.await` resolves to `RecvError`. Called by a
    /// caller that gave up on its own deadline, to stop the entry from
    /// leaking until the next sweep.
    pub fn cancel(&self, request_id: &RequestId) {
        self.pending.lock().remove(request_id);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Drops any registration older than `max_age`. Guards against requests
    /// whose reply can never arrive (the plugin crashed mid-call and no
    /// `CRASHED` status reached the dispatch loop) outliving the caller's
    /// own per-call timeout indefinitely.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut pending = self.pending.lock();
        let before = pending.len();
        pending.retain(|_, entry| now.duration_since(entry.registered_at) < self.max_age);
        before - pending.len()
    }

    /// Spawns a background task that sweeps expired registrations every
    /// `interval` until every `Arc<RequestBroker>` clone is dropped.
    pub fn spawn_sweeper(self: std::sync::Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                let swept = self.sweep_expired();
                if swept > 0 {
                    tracing::debug!(swept, "swept expired broker registrations");
                }
            }
        })
    }
}

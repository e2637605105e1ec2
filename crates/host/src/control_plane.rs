// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The control plane (`spec.md` §4.1/§7, SPEC_FULL.md §4): the top-level
//! object that ties registry, buses, dispatcher, run manager, and the
//! request router to a live set of [`PluginHost`]s. Where the teacher's
//! `engine/runtime/mod.rs` owns the worker pool and handler registry as one
//! struct, this plays the same role for the plugin-process world: load a
//! manifest, spawn its process, drain its three host-bound queues into the
//! router/broker, and tear it down again on command or on crash.
//!
//! [`PluginQueues::split`] hands the transport half (`TransportSide`) to
//! whatever feeds the child's stdio; dropping it closes every channel the
//! host side depends on (see `pb-adapters::queues` tests), so this module
//! never drops it. A real stdio-framing bridge is out of this core's scope
//! (SPEC_FULL.md Non-goals), so [`ControlPlane::start_plugin`] simply hands
//! the transport half back to its caller, whose job is to keep it alive —
//! in `main.rs`, parked in a `Vec` for the daemon's lifetime — until a
//! bridge exists to actually consume it.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use pb_adapters::queues::{PluginMessage, PluginQueues, PluginStatus, TransportSide};
use pb_adapters::{CheckpointBackend, ProcessAdapter, ProcessSpec};
use pb_bus::BusRegistry;
use pb_core::config::HostConfig;
use pb_core::envelope::{ErrorCode, ResultEnvelope, StructuredError};
use pb_core::ids::PluginId;
use pb_core::manifest::{PluginManifest, SdkCompatOutcome};
use pb_core::{Clock, CoreError};
use pb_storage::run_store::RunStore;
use pb_wire::rpc::{RpcOp, RpcRequest, RpcResponse};
use serde_json::Value;

use crate::dispatcher::{BusSubscriptionDispatcher, SubscriberSink};
use crate::ipc::broker::RequestBroker;
use crate::ipc::fast_plane::RpcHandler;
use crate::plugin_host::PluginHost;
use crate::registry::PluginRegistry;
use crate::router::{HostTable, Router};
use crate::run::RunManager;
use crate::HostTimeouts;

/// The SDK version this daemon build advertises to `SdkCompat::check`
/// (`spec.md` §3 "sdk_version" on `PluginRecord`). Ties to the crate
/// version rather than a separately-tracked constant.
pub const HOST_SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// How long a broker registration is allowed to sit unresolved before the
/// sweeper reclaims it (`RequestBroker::sweep_expired`).
const BROKER_MAX_AGE: Duration = Duration::from_secs(120);
const BROKER_SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum ControlPlaneError {
    #[error("plugin manifest rejected: {0}")]
    SdkRejected(String),
    #[error("plugin '{0}' is not loaded")]
    NotLoaded(PluginId),
    #[error(transparent)]
    Core(#[from] CoreError),
    #[error("{0}")]
    Internal(String),
}

/// Converts a router [`RpcResponse`] back into the [`ResultEnvelope`] shape
/// a plugin's own SDK expects over `resp_ch` (`spec.md` §3 "ResultEnvelope").
/// `RpcError::code` is a free-form string the router mints (`"NOT_READY"`,
/// `"PERMISSION_DENIED"`, ...) with no exact [`ErrorCode`] counterpart for
/// most of them; rather than lose information mapping many-to-one, the
/// original code rides along in `StructuredError::details` and the
/// envelope's own `ErrorCode` is a best-effort bucket.
fn response_to_envelope(response: RpcResponse, now_ms: u64) -> ResultEnvelope {
    match response.error {
        None => ResultEnvelope::ok(response.result.unwrap_or(Value::Null), now_ms),
        Some(err) => {
            let code = match err.code.as_str() {
                "VALIDATION_ERROR" => ErrorCode::ValidationError,
                "DEPENDENCY_MISSING" => ErrorCode::DependencyMissing,
                "NOT_READY" => ErrorCode::NotReady,
                "RATE_LIMITED" => ErrorCode::RateLimited,
                "TIMEOUT" => ErrorCode::Timeout,
                "NOT_FOUND" => ErrorCode::NotFound,
                "INVALID_RESPONSE" => ErrorCode::InvalidResponse,
                _ => ErrorCode::Internal,
            };
            let mut structured = StructuredError::new(code, err.message);
            structured = structured.with_details(serde_json::json!({ "rpc_code": err.code, "rpc_details": err.details }));
            ResultEnvelope::err(structured, now_ms)
        }
    }
}

/// Owns every live [`PluginHost`], the shared registry/bus/dispatcher/run
/// machinery, and the [`Router`] they're all wired into. One instance per
/// `plugboardd` process.
pub struct ControlPlane<P: ProcessAdapter, C: Clock> {
    cfg: Arc<HostConfig>,
    adapter: Arc<P>,
    clock: C,
    registry: Arc<PluginRegistry>,
    buses: Arc<BusRegistry>,
    dispatcher: Arc<BusSubscriptionDispatcher>,
    runs: Arc<RunManager<C>>,
    hosts: Arc<HostTable<P, C>>,
    broker: Arc<RequestBroker>,
    checkpoints: Arc<dyn CheckpointBackend>,
    router: Arc<Router<C, HostTable<P, C>>>,
}

impl<P, C> ControlPlane<P, C>
where
    P: ProcessAdapter + 'static,
    C: Clock + Clone + Send + Sync + 'static,
{
    pub fn new(
        cfg: Arc<HostConfig>,
        adapter: Arc<P>,
        clock: C,
        checkpoints: Arc<dyn CheckpointBackend>,
        buses: Arc<BusRegistry>,
        run_store: Arc<RunStore>,
    ) -> Arc<Self> {
        let registry = Arc::new(PluginRegistry::new());
        let dispatcher = Arc::new(BusSubscriptionDispatcher::from_config(&cfg));
        let runs = Arc::new(RunManager::new(run_store, buses.clone(), cfg.clone(), clock.clone()));
        let hosts: Arc<HostTable<P, C>> = Arc::new(HostTable::new());
        let broker = Arc::new(RequestBroker::new(BROKER_MAX_AGE));
        let router = Arc::new(Router::new(
            registry.clone(),
            buses.clone(),
            dispatcher.clone(),
            runs.clone(),
            hosts.clone(),
            cfg.clone(),
            clock.clone(),
        ));
        Arc::new(Self { cfg, adapter, clock, registry, buses, dispatcher, runs, hosts, broker, checkpoints, router })
    }

    pub fn registry(&self) -> Arc<PluginRegistry> {
        self.registry.clone()
    }

    pub fn buses(&self) -> Arc<BusRegistry> {
        self.buses.clone()
    }

    pub fn dispatcher(&self) -> Arc<BusSubscriptionDispatcher> {
        self.dispatcher.clone()
    }

    pub fn runs(&self) -> Arc<RunManager<C>> {
        self.runs.clone()
    }

    /// The shared request router, handed to `ipc::fast_plane::serve` for
    /// every accepted fast-plane connection.
    pub fn router(&self) -> Arc<Router<C, HostTable<P, C>>> {
        self.router.clone()
    }

    /// Spawns the long-lived background tasks every control plane needs:
    /// the subscription dispatcher's consumer loop (§4.4), the broker's
    /// expired-registration sweeper (§4.2 "no reply ever arrives"), and the
    /// plugin liveness poll (SPEC_FULL.md §2). Call once, right after
    /// construction.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let dispatcher = self.dispatcher.clone();
        let hub = self.buses.hub();
        let sink: Arc<dyn SubscriberSink> = self.clone();
        let clock = self.clock.clone();
        tokio::spawn(dispatcher.run(hub, sink, clock));
        self.broker.clone().spawn_sweeper(BROKER_SWEEP_INTERVAL);
        self.spawn_health_poll();
    }

    /// SPEC_FULL.md §2: "A background task polls `PluginHost::health_check`
    /// every `PLUGIN_HEALTH_POLL_INTERVAL` and flips the registry's cached
    /// `alive` bit." Without this, a plugin that hangs without ever
    /// emitting `Crashed` on its status channel stays marked alive forever.
    fn spawn_health_poll(self: &Arc<Self>) {
        let hosts = self.hosts.clone();
        let registry = self.registry.clone();
        let interval = self.cfg.plugin_health_poll_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                for (plugin_id, host) in hosts.snapshot() {
                    let alive = host.health_check().await;
                    registry.set_alive(plugin_id, alive);
                }
            }
        });
    }

    /// Reads and parses a plugin manifest file, then registers it
    /// (`spec.md` §4.5 "boot scan"). Does not spawn the process — see
    /// [`Self::start_plugin`].
    pub fn load_plugin_from_file(&self, manifest_path: &Path) -> Result<PluginId, ControlPlaneError> {
        let raw = std::fs::read_to_string(manifest_path)
            .map_err(|e| ControlPlaneError::Internal(format!("reading manifest {}: {e}", manifest_path.display())))?;
        let manifest: PluginManifest = toml::from_str(&raw)
            .map_err(|e| ControlPlaneError::Internal(format!("parsing manifest {}: {e}", manifest_path.display())))?;
        self.load_plugin(&manifest)
    }

    /// Checks SDK compatibility (`spec.md` §3 "SdkCompat") and registers the
    /// manifest. A `Reject` outcome refuses registration outright; a `Warn`
    /// outcome is logged and otherwise proceeds.
    pub fn load_plugin(&self, manifest: &PluginManifest) -> Result<PluginId, ControlPlaneError> {
        match manifest.plugin.sdk.check(HOST_SDK_VERSION) {
            SdkCompatOutcome::Reject(reason) => return Err(ControlPlaneError::SdkRejected(reason)),
            SdkCompatOutcome::Warn(reason) => {
                tracing::warn!(plugin = %manifest.plugin.id, reason, "plugin sdk compatibility warning")
            }
            SdkCompatOutcome::Ok => {}
        }
        Ok(self.registry.register_manifest(manifest, HOST_SDK_VERSION))
    }

    /// Spawns the plugin's child process and wires its three host-bound
    /// queues (`res_ch`, `status_ch`, `msg_ch`) into the broker/registry/
    /// router. Returns the [`TransportSide`] the caller must keep alive for
    /// as long as the plugin runs.
    pub async fn start_plugin(self: &Arc<Self>, plugin_id: PluginId, spec: ProcessSpec) -> Result<TransportSide, ControlPlaneError> {
        if self.registry.record(&plugin_id).is_none() {
            return Err(ControlPlaneError::NotLoaded(plugin_id));
        }

        let queues = PluginQueues::new(plugin_id);
        let (host_side, transport_side) = queues.split();
        let host = Arc::new(PluginHost::new(
            plugin_id,
            self.adapter.clone(),
            self.clock.clone(),
            host_side,
            self.broker.clone(),
            HostTimeouts::from(self.cfg.as_ref()),
        ));

        let Some(mut res_rx) = host.take_res_rx().await else {
            return Err(ControlPlaneError::Internal("plugin result channel already taken".to_string()));
        };
        let Some(mut status_rx) = host.take_status_rx().await else {
            return Err(ControlPlaneError::Internal("plugin status channel already taken".to_string()));
        };
        let Some(mut msg_rx) = host.take_msg_rx().await else {
            return Err(ControlPlaneError::Internal("plugin message channel already taken".to_string()));
        };

        self.hosts.insert(plugin_id, host.clone());

        {
            let broker = self.broker.clone();
            tokio::spawn(async move {
                while let Some(result) = res_rx.recv().await {
                    broker.resolve(&result.request_id, result.envelope);
                }
            });
        }
        {
            let registry = self.registry.clone();
            let dispatcher = self.dispatcher.clone();
            let hosts = self.hosts.clone();
            tokio::spawn(async move { drain_status(plugin_id, &mut status_rx, &registry, &dispatcher, &hosts).await });
        }
        {
            let router = self.router.clone();
            let hosts = self.hosts.clone();
            let clock = self.clock.clone();
            tokio::spawn(async move { drain_messages(plugin_id, &mut msg_rx, &router, &hosts, &clock).await });
        }

        host.spawn(&spec).await?;
        Ok(transport_side)
    }

    /// Shuts down one plugin, releasing its subscriptions and checkpoint
    /// state. Idempotent: a plugin already stopped is simply not found in
    /// `hosts` and this is a no-op beyond the registry/dispatcher cleanup.
    pub async fn stop_plugin(&self, plugin_id: &PluginId) {
        if let Some(host) = self.hosts.get(plugin_id) {
            host.shutdown().await;
        }
        self.hosts.remove(plugin_id);
        self.registry.set_alive(*plugin_id, false);
        self.dispatcher.unsubscribe_all_for_plugin(plugin_id);
        self.checkpoints.clear(plugin_id).await;
    }

    /// Stops every currently-registered plugin concurrently, bounded by
    /// `global_timeout`. A plugin whose own shutdown escalation (terminate
    /// -> kill) is still running when the deadline hits is abandoned; the
    /// process itself is still on its way down, it just won't be waited on.
    pub async fn shutdown_all(&self, global_timeout: Duration) {
        let ids: Vec<PluginId> = self.registry.all_records().into_iter().map(|r| r.plugin_id).collect();
        let shutdowns = ids.iter().map(|id| self.stop_plugin(id));
        if tokio::time::timeout(global_timeout, futures_util::future::join_all(shutdowns)).await.is_err() {
            tracing::warn!(timeout_secs = global_timeout.as_secs(), "shutdown_all exceeded its global timeout");
        }
    }
}

async fn drain_status<P, C>(
    plugin_id: PluginId,
    status_rx: &mut tokio::sync::mpsc::UnboundedReceiver<PluginStatus>,
    registry: &Arc<PluginRegistry>,
    dispatcher: &Arc<BusSubscriptionDispatcher>,
    hosts: &Arc<HostTable<P, C>>,
) where
    P: ProcessAdapter,
    C: Clock,
{
    while let Some(status) = status_rx.recv().await {
        match status {
            PluginStatus::Ready { handlers } => {
                registry.register_entries(plugin_id, handlers);
                registry.set_alive(plugin_id, true);
                if let Some(host) = hosts.get(&plugin_id) {
                    host.mark_running();
                }
            }
            PluginStatus::Heartbeat => {}
            PluginStatus::Crashed { reason } => {
                tracing::warn!(%plugin_id, reason, "plugin reported a crash");
                registry.set_alive(plugin_id, false);
                dispatcher.unsubscribe_all_for_plugin(&plugin_id);
                if let Some(host) = hosts.get(&plugin_id) {
                    host.mark_crashed();
                }
            }
        }
    }
}

async fn drain_messages<P, C>(
    plugin_id: PluginId,
    msg_rx: &mut tokio::sync::mpsc::UnboundedReceiver<PluginMessage>,
    router: &Arc<Router<C, HostTable<P, C>>>,
    hosts: &Arc<HostTable<P, C>>,
    clock: &C,
) where
    P: ProcessAdapter,
    C: Clock,
{
    while let Some(msg) = msg_rx.recv().await {
        let request = RpcRequest {
            v: 1,
            op: RpcOp::from(msg.op.as_str()),
            req_id: msg.request_id,
            args: msg.payload,
            from_plugin: Some(plugin_id),
        };
        let response = router.handle(request).await;
        let envelope = response_to_envelope(response, clock.epoch_ms());
        if let Some(host) = hosts.get(&plugin_id) {
            if let Err(e) = host.respond(msg.request_id, envelope) {
                tracing::warn!(%plugin_id, error = %e, "failed to deliver a response to the plugin");
            }
        }
    }
}

impl<P, C> SubscriberSink for ControlPlane<P, C>
where
    P: ProcessAdapter,
    C: Clock,
{
    fn send(&self, plugin_id: &PluginId, payload: Value) -> Result<(), String> {
        let host = self.hosts.get(plugin_id).ok_or_else(|| format!("plugin '{plugin_id}' has no live host"))?;
        host.push_bus_change(payload).map_err(|e| e.to_string())
    }

    fn is_alive(&self, plugin_id: &PluginId) -> bool {
        self.hosts.get(plugin_id).map(|h| h.state().accepts_work()).unwrap_or(false)
    }
}

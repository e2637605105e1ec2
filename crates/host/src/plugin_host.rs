// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-plugin state machine (`spec.md` §4.1: NEW → STARTING → RUNNING →
//! STOPPING → STOPPED/CRASHED/KILLED). Grounded on the teacher's
//! `agent/coop/spawn.rs` spawn-then-handshake shape, generalized from one
//! Unix-socket sidecar to the five-queue contract in [`pb_adapters::queues`].

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pb_adapters::queues::{PluginMessage, PluginResult, PluginStatus};
use pb_adapters::{CommandKind, HostSide, PluginCommand, ProcessAdapter, ProcessSpec};
use pb_core::envelope::{ErrorCode, ResultEnvelope, StructuredError};
use pb_core::ids::{PluginId, RequestId};
use pb_core::{Clock, CoreError};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};

use crate::ipc::broker::RequestBroker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PluginState {
    New = 0,
    Starting = 1,
    Running = 2,
    Stopping = 3,
    Stopped = 4,
    Crashed = 5,
    Killed = 6,
}

impl PluginState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::New,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Stopping,
            4 => Self::Stopped,
            5 => Self::Crashed,
            _ => Self::Killed,
        }
    }

    /// §4.1: a plugin only accepts `trigger`/`trigger_custom_event`/
    /// `push_bus_change` while `RUNNING`.
    pub fn accepts_work(&self) -> bool {
        matches!(self, Self::Running)
    }
}

struct AtomicState(AtomicU8);

impl AtomicState {
    fn new(state: PluginState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    fn load(&self) -> PluginState {
        PluginState::from_u8(self.0.load(Ordering::SeqCst))
    }

    fn store(&self, state: PluginState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }
}

/// A running plugin: the spawned child handle, its queue halves, and the
/// state machine's current phase. `pb-host`'s `ControlPlane` keeps one of
/// these per loaded plugin, wrapped in `Arc` so the dispatch loop reading
/// `status_rx`/`msg_rx` and the router issuing `trigger` calls share it.
pub struct PluginHost<P: ProcessAdapter, C: Clock> {
    pub plugin_id: PluginId,
    adapter: Arc<P>,
    clock: C,
    handle: tokio::sync::Mutex<Option<P::Handle>>,
    cmd_tx: mpsc::UnboundedSender<PluginCommand>,
    resp_tx: mpsc::UnboundedSender<pb_adapters::queues::PluginResponse>,
    res_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<PluginResult>>>,
    status_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<PluginStatus>>>,
    msg_rx: tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<PluginMessage>>>,
    broker: Arc<RequestBroker>,
    state: AtomicState,
    cfg: crate::HostTimeouts,
}

impl<P: ProcessAdapter, C: Clock> PluginHost<P, C> {
    pub fn new(
        plugin_id: PluginId,
        adapter: Arc<P>,
        clock: C,
        queues: HostSide,
        broker: Arc<RequestBroker>,
        cfg: crate::HostTimeouts,
    ) -> Self {
        let HostSide { plugin_id: _, cmd_tx, res_rx, status_rx, msg_rx, resp_tx } = queues;
        Self {
            plugin_id,
            adapter,
            clock,
            handle: tokio::sync::Mutex::new(None),
            cmd_tx,
            resp_tx,
            res_rx: tokio::sync::Mutex::new(Some(res_rx)),
            status_rx: tokio::sync::Mutex::new(Some(status_rx)),
            msg_rx: tokio::sync::Mutex::new(Some(msg_rx)),
            broker,
            state: AtomicState::new(PluginState::New),
            cfg,
        }
    }

    pub fn state(&self) -> PluginState {
        self.state.load()
    }

    /// Hands the plugin's result receiver to the caller's drain loop.
    /// Returns `None` if already taken — `ControlPlane` calls this exactly
    /// once per loaded plugin, right after construction.
    pub async fn take_res_rx(&self) -> Option<mpsc::UnboundedReceiver<PluginResult>> {
        self.res_rx.lock().await.take()
    }

    pub async fn take_status_rx(&self) -> Option<mpsc::UnboundedReceiver<PluginStatus>> {
        self.status_rx.lock().await.take()
    }

    pub async fn take_msg_rx(&self) -> Option<mpsc::UnboundedReceiver<PluginMessage>> {
        self.msg_rx.lock().await.take()
    }

    /// Answers a [`PluginMessage`] the plugin sent through `msg_rx`. Called
    /// by the router after handling the message's `op`.
    pub fn respond(
        &self,
        request_id: RequestId,
        envelope: ResultEnvelope,
    ) -> Result<(), CoreError> {
        self.resp_tx
            .send(pb_adapters::queues::PluginResponse { request_id, envelope })
            .map_err(|_| CoreError::Communication("plugin response channel closed".to_string()))
    }

    /// Spawns the child process. Does not block on the STATUS handshake —
    /// the caller transitions `STARTING` → `RUNNING` once the registry
    /// observes the boot-time handler scan over `status_rx` (§4.5).
    #[tracing::instrument(skip(self, spec), fields(plugin_id = %self.plugin_id))]
    pub async fn spawn(&self, spec: &ProcessSpec) -> Result<(), CoreError> {
        self.state.store(PluginState::Starting);
        let handle = self
            .adapter
            .spawn(spec)
            .await
            .map_err(|e| CoreError::Communication(e.to_string()))?;
        *self.handle.lock().await = Some(handle);
        Ok(())
    }

    pub fn mark_running(&self) {
        self.state.store(PluginState::Running);
    }

    pub fn mark_crashed(&self) {
        self.state.store(PluginState::Crashed);
    }

    /// Sends a `Trigger` command and waits for the matching result via the
    /// request broker, bounded by `timeout` (§4.1 "Dispatch rules").
    #[tracing::instrument(skip(self, payload), fields(plugin_id = %self.plugin_id, event_type = %event_type))]
    pub async fn trigger(
        &self,
        event_type: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<ResultEnvelope, CoreError> {
        if !self.state.load().accepts_work() {
            return Err(CoreError::NotRunning(self.plugin_id));
        }
        self.dispatch(
            CommandKind::Trigger { event_type: event_type.to_string(), payload },
            timeout,
        )
        .await
    }

    #[tracing::instrument(skip(self, payload), fields(plugin_id = %self.plugin_id, event_name = %event_name))]
    pub async fn trigger_custom_event(
        &self,
        event_name: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<ResultEnvelope, CoreError> {
        if !self.state.load().accepts_work() {
            return Err(CoreError::NotRunning(self.plugin_id));
        }
        self.dispatch(
            CommandKind::TriggerCustom { event_name: event_name.to_string(), payload },
            timeout,
        )
        .await
    }

    /// Pushes a bus-change delta to a subscribed plugin. Fire-and-forget at
    /// the queue level; the dispatcher applies its own push timeout and
    /// circuit breaker on top of this (§4.4), so this call does not itself
    /// wait on a broker response.
    pub fn push_bus_change(&self, payload: Value) -> Result<(), CoreError> {
        if !self.state.load().accepts_work() {
            return Err(CoreError::NotRunning(self.plugin_id));
        }
        self.cmd_tx
            .send(PluginCommand {
                request_id: RequestId::new(),
                kind: CommandKind::TriggerCustom { event_name: "bus.change".to_string(), payload },
            })
            .map_err(|_| CoreError::Communication("plugin command channel closed".to_string()))
    }

    /// Asks the plugin to serialize its freezable attributes (Design Notes
    /// "Checkpointing freezable attributes") and waits for the reply.
    #[tracing::instrument(skip(self), fields(plugin_id = %self.plugin_id))]
    pub async fn freeze(&self, timeout: Duration) -> Result<ResultEnvelope, CoreError> {
        self.dispatch(CommandKind::Freeze, timeout).await
    }

    /// §4.1 shutdown sequence: signal `Shutdown`, wait up to
    /// `plugin_shutdown_timeout` for a clean exit, escalate to `terminate`,
    /// then `kill` if still alive after `plugin_shutdown_total_timeout`.
    #[tracing::instrument(skip(self), fields(plugin_id = %self.plugin_id))]
    pub async fn shutdown(&self) -> PluginState {
        self.state.store(PluginState::Stopping);
        let _ = self.cmd_tx.send(PluginCommand { request_id: RequestId::new(), kind: CommandKind::Shutdown });
        let mut handle_guard = self.handle.lock().await;
        let Some(handle) = handle_guard.as_mut() else {
            self.state.store(PluginState::Stopped);
            return PluginState::Stopped;
        };

        if self.adapter.wait(handle, self.cfg.plugin_shutdown_timeout).await.is_some() {
            self.state.store(PluginState::Stopped);
            return PluginState::Stopped;
        }

        let _ = self.adapter.terminate(handle).await;
        let remaining = self
            .cfg
            .plugin_shutdown_total_timeout
            .saturating_sub(self.cfg.plugin_shutdown_timeout);
        if self.adapter.wait(handle, remaining).await.is_some() {
            self.state.store(PluginState::Stopped);
            return PluginState::Stopped;
        }

        let _ = self.adapter.kill(handle).await;
        let _ = self.adapter.wait(handle, Duration::from_secs(5)).await;
        self.state.store(PluginState::Killed);
        PluginState::Killed
    }

    /// Liveness probe consumed by the registry's health-poll task
    /// (SPEC_FULL.md §2). A plugin not in `RUNNING` is trivially unhealthy.
    pub async fn health_check(&self) -> bool {
        if !self.state.load().accepts_work() {
            return false;
        }
        self.trigger_custom_event("host.health_check", Value::Null, Duration::from_millis(500))
            .await
            .map(|env| env.success)
            .unwrap_or(false)
    }

    async fn dispatch(&self, kind: CommandKind, timeout: Duration) -> Result<ResultEnvelope, CoreError> {
        let request_id = RequestId::new();
        let (tx, rx) = oneshot::channel();
        self.broker.register(request_id, tx);
        self.cmd_tx.send(PluginCommand { request_id, kind }).map_err(|_| {
            self.broker.cancel(&request_id);
            CoreError::Communication("plugin command channel closed".to_string())
        })?;

        let result = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(envelope)) => Ok(envelope),
            Ok(Err(_)) => Err(CoreError::Communication("broker dropped request".to_string())),
            Err(_) => {
                self.broker.cancel(&request_id);
                Err(CoreError::Timeout(timeout))
            }
        };
        if let Err(ref e) = result {
            tracing::warn!(plugin_id = %self.plugin_id, error = %e, "plugin dispatch failed");
        }
        result
    }
}

pub fn error_envelope(err: &CoreError, clock: &impl Clock) -> ResultEnvelope {
    let code = match err {
        CoreError::Timeout(_) => ErrorCode::Timeout,
        CoreError::PluginNotFound(_) | CoreError::EntryNotFound { .. } => ErrorCode::NotFound,
        CoreError::InvalidArgument(_) => ErrorCode::ValidationError,
        _ => ErrorCode::Internal,
    };
    let structured = StructuredError::new(code, err.to_string());
    let structured = if err.retriable() { structured.retriable() } else { structured };
    ResultEnvelope::err(structured, clock.epoch_ms())
}

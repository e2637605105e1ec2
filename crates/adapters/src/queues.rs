// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-plugin queue set (spec §3 "five logical queues per plugin process").
//!
//! Each plugin gets one `PluginQueues`: the host-side halves used by
//! `pb-host`'s `PluginHost` state machine, and a `PluginQueuesRemote`
//! handle that would be handed to the in-process transport adapter
//! feeding the child's stdio. Shutdown never awaits a receiver drain —
//! dropping the `Sender` halves is enough to unblock any task parked on
//! `recv()`.

use pb_core::envelope::ResultEnvelope;
use pb_core::handler::HandlerDescriptor;
use pb_core::ids::{PluginId, RequestId};
use serde_json::Value;
use tokio::sync::mpsc;

/// A command sent to the plugin (`trigger`, `trigger_custom_event`, a
/// system-config push, a freeze request).
#[derive(Debug, Clone)]
pub struct PluginCommand {
    pub request_id: RequestId,
    pub kind: CommandKind,
}

#[derive(Debug, Clone)]
pub enum CommandKind {
    Trigger { event_type: String, payload: Value },
    TriggerCustom { event_name: String, payload: Value },
    ConfigPush { config: Value },
    Freeze,
    Shutdown,
}

/// What the plugin reports back for a given `request_id`.
#[derive(Debug, Clone)]
pub struct PluginResult {
    pub request_id: RequestId,
    pub envelope: ResultEnvelope,
}

/// Liveness/handshake signal: STATUS on boot, periodic heartbeats,
/// terminal CRASHED notice.
#[derive(Debug, Clone)]
pub enum PluginStatus {
    Ready { handlers: Vec<HandlerDescriptor> },
    Heartbeat,
    Crashed { reason: String },
}

/// A request the plugin makes of the host (bus read/write, query, run
/// update, plugin-to-plugin call) — the reverse direction of
/// [`PluginCommand`].
#[derive(Debug, Clone)]
pub struct PluginMessage {
    pub request_id: RequestId,
    pub op: String,
    pub payload: Value,
}

/// The host's answer to a [`PluginMessage`].
#[derive(Debug, Clone)]
pub struct PluginResponse {
    pub request_id: RequestId,
    pub envelope: ResultEnvelope,
}

/// Host-side halves of the five queues for one plugin. `cmd_tx` and
/// `resp_tx` are owned by the host and fed into the transport that
/// talks to the child; `res_rx`, `status_rx`, `msg_rx` are drained by
/// the host's dispatch loop.
pub struct PluginQueues {
    pub plugin_id: PluginId,
    pub cmd_tx: mpsc::UnboundedSender<PluginCommand>,
    pub cmd_rx: mpsc::UnboundedReceiver<PluginCommand>,
    pub res_tx: mpsc::UnboundedSender<PluginResult>,
    pub res_rx: mpsc::UnboundedReceiver<PluginResult>,
    pub status_tx: mpsc::UnboundedSender<PluginStatus>,
    pub status_rx: mpsc::UnboundedReceiver<PluginStatus>,
    pub msg_tx: mpsc::UnboundedSender<PluginMessage>,
    pub msg_rx: mpsc::UnboundedReceiver<PluginMessage>,
    pub resp_tx: mpsc::UnboundedSender<PluginResponse>,
    pub resp_rx: mpsc::UnboundedReceiver<PluginResponse>,
}

impl PluginQueues {
    pub fn new(plugin_id: PluginId) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (res_tx, res_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();
        let (msg_tx, msg_rx) = mpsc::unbounded_channel();
        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        Self {
            plugin_id,
            cmd_tx,
            cmd_rx,
            res_tx,
            res_rx,
            status_tx,
            status_rx,
            msg_tx,
            msg_rx,
            resp_tx,
            resp_rx,
        }
    }

    /// Splits into the handle given to the host's dispatch loop and the
    /// handle given to the transport feeding the child process.
    pub fn split(self) -> (HostSide, TransportSide) {
        (
            HostSide {
                plugin_id: self.plugin_id,
                cmd_tx: self.cmd_tx,
                res_rx: self.res_rx,
                status_rx: self.status_rx,
                msg_rx: self.msg_rx,
                resp_tx: self.resp_tx,
            },
            TransportSide {
                cmd_rx: self.cmd_rx,
                res_tx: self.res_tx,
                status_tx: self.status_tx,
                msg_tx: self.msg_tx,
                resp_rx: self.resp_rx,
            },
        )
    }
}

/// What `pb-host`'s `PluginHost` holds: send commands, receive results
/// and status, receive the plugin's outbound messages, send responses.
pub struct HostSide {
    pub plugin_id: PluginId,
    pub cmd_tx: mpsc::UnboundedSender<PluginCommand>,
    pub res_rx: mpsc::UnboundedReceiver<PluginResult>,
    pub status_rx: mpsc::UnboundedReceiver<PluginStatus>,
    pub msg_rx: mpsc::UnboundedReceiver<PluginMessage>,
    pub resp_tx: mpsc::UnboundedSender<PluginResponse>,
}

impl HostSide {
    /// Best-effort shutdown signal; the command channel may already be
    /// closed if the transport side was dropped first (plugin exited).
    pub fn signal_shutdown(&self, request_id: RequestId) {
        let _ = self.cmd_tx.send(PluginCommand { request_id, kind: CommandKind::Shutdown });
    }
}

/// What the transport adapter (stdio framing over the child process)
/// holds: receive commands and responses to forward to the child,
/// send results/status/messages read off the child's stdout.
pub struct TransportSide {
    pub cmd_rx: mpsc::UnboundedReceiver<PluginCommand>,
    pub res_tx: mpsc::UnboundedSender<PluginResult>,
    pub status_tx: mpsc::UnboundedSender<PluginStatus>,
    pub msg_tx: mpsc::UnboundedSender<PluginMessage>,
    pub resp_rx: mpsc::UnboundedReceiver<PluginResponse>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pb_core::envelope::ResultEnvelope;

    #[tokio::test]
    async fn split_halves_communicate_in_both_directions() {
        let queues = PluginQueues::new(PluginId::from_string("plg-q"));
        let (host, mut transport) = queues.split();

        let rid = RequestId::new();
        host.cmd_tx
            .send(PluginCommand { request_id: rid, kind: CommandKind::Freeze })
            .unwrap();
        let received = transport.cmd_rx.recv().await.unwrap();
        assert_eq!(received.request_id, rid);

        transport
            .res_tx
            .send(PluginResult { request_id: rid, envelope: ResultEnvelope::ok(Value::Null, 0) })
            .unwrap();
        drop(host.status_rx);
    }

    #[tokio::test]
    async fn dropping_transport_side_closes_host_receivers_without_blocking() {
        let queues = PluginQueues::new(PluginId::from_string("plg-q"));
        let (mut host, transport) = queues.split();
        drop(transport);
        assert!(host.res_rx.recv().await.is_none());
        assert!(host.status_rx.recv().await.is_none());
        assert!(host.msg_rx.recv().await.is_none());
    }
}

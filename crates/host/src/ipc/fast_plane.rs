// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The fast-plane transport driver (`spec.md` §4.2): reads length-prefixed
//! msgpack `RpcRequest` frames off one connection, hands each to a handler,
//! writes the `RpcResponse` back. One [`serve`] call per connected client;
//! `pb-host`'s listener (wired in `main.rs`) spawns one per accepted socket.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use pb_core::ids::PluginId;
use pb_wire::codec::{read_message, write_message, ProtocolError};
use pb_wire::push::{PushBatch, WatermarkOutcome};
use pb_wire::rpc::{RpcRequest, RpcResponse};
use tokio::io::{AsyncRead, AsyncWrite};

/// Dispatches one decoded [`RpcRequest`] to a reply. Implemented by the
/// router so this module stays free of any dependency on the registry or
/// plugin host.
#[async_trait]
pub trait RpcHandler: Send + Sync {
    async fn handle(&self, request: RpcRequest) -> RpcResponse;
}

/// Drives one fast-plane connection until the peer closes it or a framing
/// error occurs. Requests are handled one at a time per connection — the
/// spec's ordering guarantees are per-connection, and a plugin wanting
/// concurrency opens more than one connection.
pub async fn serve<S, H>(mut stream: S, handler: Arc<H>) -> Result<(), ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    H: RpcHandler,
{
    loop {
        let request: RpcRequest = match read_message(&mut stream).await {
            Ok(req) => req,
            Err(ProtocolError::Io(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(()),
            Err(e) => return Err(e),
        };
        let response = handler.handle(request).await;
        write_message(&mut stream, &response).await?;
    }
}

/// Per-plugin watermark tracking for the push-batch hot path (spec §4.2:
/// "advances the watermark atomically (O(1)) or ... scans the item sequence
/// (O(n))" — the O(1) contiguous case is all this tracks; a caller that
/// needs the O(n) gap-fill scan does it itself with the raw `PushBatch`).
#[derive(Default)]
pub struct PushWatermarks {
    watermarks: Mutex<HashMap<PluginId, u64>>,
}

impl PushWatermarks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates `batch` against the stored watermark for `batch.from_plugin`
    /// and advances it on [`WatermarkOutcome::Advanced`].
    pub fn accept(&self, batch: &PushBatch) -> WatermarkOutcome {
        let mut watermarks = self.watermarks.lock();
        let current = watermarks.get(&batch.from_plugin).copied();
        let outcome = batch.check_watermark(current);
        if outcome == WatermarkOutcome::Advanced {
            watermarks.insert(batch.from_plugin, batch.last_seq);
        }
        outcome
    }

    pub fn watermark(&self, plugin_id: &PluginId) -> Option<u64> {
        self.watermarks.lock().get(plugin_id).copied()
    }
}

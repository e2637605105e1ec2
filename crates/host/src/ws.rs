// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The `/ws/run` session (`spec.md` §6, SPEC_FULL.md §7): a raw WebSocket
//! server, no HTTP framework, since the upgrade handshake is self-contained
//! and routing/static files stay out of scope. One task per connection:
//! auth handshake, then `req/resp` frames for `run.get`/`export.list`, plus
//! a `bus.change` push filtered to the session's run, with a 15s ping / 45s
//! timeout heartbeat.
//!
//! The run a session watches is named in the upgrade request's path
//! (`/ws/run/{run_id}`) rather than in the `auth` frame itself — `spec.md`
//! doesn't spell out how the client tells the server which run it wants
//! before sending the token, so this is an Open Question decision (see
//! `DESIGN.md`): the token alone authenticates, the path says which run.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use pb_bus::{BusRegistry, ChangeEvent};
use pb_core::bus_name::BusName;
use pb_core::ids::RunId;
use pb_core::Clock;
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::handshake::server::{Request, Response};
use tokio_tungstenite::tungstenite::Message;

use crate::run::{RunError, RunManager};

const PING_INTERVAL: Duration = Duration::from_secs(15);
const PONG_TIMEOUT: Duration = Duration::from_secs(45);
/// `spec §6`: "`limit` capped at a server maximum" applies here too.
const DEFAULT_EXPORT_LIMIT: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum WsError {
    #[error("upgrade request carried no run id in its path")]
    MissingRunId,
    #[error("websocket handshake failed: {0}")]
    Handshake(#[from] tokio_tungstenite::tungstenite::Error),
    #[error("client did not send an auth frame before the first request")]
    NotAuthenticated,
}

/// Extracts the trailing path segment of `/ws/run/{run_id}` from the
/// upgrade request, so the handshake itself never needs a frame exchange
/// just to learn which run the session is for.
fn run_id_from_path(req: &Request) -> Option<RunId> {
    let path = req.uri().path();
    let segment = path.rsplit('/').next()?;
    if segment.is_empty() || segment == "run" {
        return None;
    }
    Some(RunId::from_string(segment.to_string()))
}

/// Accepts connections forever, spawning one task per session. Intended to
/// be run as its own `tokio::spawn`'d background task from `main.rs`.
pub async fn accept_loop<C: Clock + Send + Sync + 'static>(
    listener: TcpListener,
    runs: Arc<RunManager<C>>,
    buses: Arc<BusRegistry>,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                tracing::warn!(error = %e, "ws listener accept failed");
                continue;
            }
        };
        let runs = runs.clone();
        let buses = buses.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, runs, buses).await {
                tracing::info!(%peer, error = %e, "ws session ended");
            }
        });
    }
}

async fn handle_connection<C: Clock>(
    stream: TcpStream,
    runs: Arc<RunManager<C>>,
    buses: Arc<BusRegistry>,
) -> Result<(), WsError> {
    let captured_run_id: Arc<std::sync::Mutex<Option<RunId>>> = Arc::new(std::sync::Mutex::new(None));
    let captured = captured_run_id.clone();
    let callback = move |req: &Request, response: Response| {
        *captured.lock().unwrap_or_else(|e| e.into_inner()) = run_id_from_path(req);
        Ok(response)
    };
    let ws = tokio_tungstenite::accept_hdr_async(stream, callback).await?;
    let found_run_id: Option<RunId> = *captured_run_id.lock().unwrap_or_else(|e| e.into_inner());
    let run_id = found_run_id.ok_or(WsError::MissingRunId)?;

    let (mut sink, mut stream) = ws.split();

    // Auth handshake: `{type:"auth", token}` in, `session.ready` out on
    // success. Anything else before a successful auth closes the session.
    let auth_ok = loop {
        let Some(msg) = stream.next().await else {
            return Ok(());
        };
        let Ok(Message::Text(text)) = msg else {
            continue;
        };
        let Ok(frame) = serde_json::from_str::<Value>(&text) else {
            continue;
        };
        if frame.get("type").and_then(Value::as_str) != Some("auth") {
            continue;
        }
        let Some(token) = frame.get("token").and_then(Value::as_str) else {
            let _ = send_error(&mut sink, "auth frame missing token").await;
            continue;
        };
        match runs.authenticate(&run_id, token) {
            Ok(_payload) => break true,
            Err(e) => {
                let _ = send_error(&mut sink, &e.to_string()).await;
                if matches!(e, RunError::Expired(_) | RunError::BadSignature | RunError::MalformedToken) {
                    break false;
                }
            }
        }
    };
    if !auth_ok {
        return Err(WsError::NotAuthenticated);
    }
    send_json(&mut sink, &serde_json::json!({ "type": "session.ready", "run_id": run_id })).await?;

    let (change_tx, mut change_rx) = mpsc::channel::<ChangeEvent>(64);
    spawn_change_forwarder(buses.clone(), run_id, change_tx);

    let mut ping_tick = tokio::time::interval(PING_INTERVAL);
    ping_tick.tick().await; // first tick fires immediately; consume it so pings start one interval out
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = ping_tick.tick() => {
                if awaiting_pong {
                    return Err(WsError::Handshake(tokio_tungstenite::tungstenite::Error::ConnectionClosed));
                }
                awaiting_pong = true;
                sink.send(Message::Ping(Vec::new().into())).await?;
            }
            _ = tokio::time::sleep(PONG_TIMEOUT), if awaiting_pong => {
                return Err(WsError::Handshake(tokio_tungstenite::tungstenite::Error::ConnectionClosed));
            }
            change = change_rx.recv() => {
                let Some(change) = change else { continue };
                send_json(&mut sink, &serde_json::json!({
                    "type": "bus.change",
                    "bus": change.bus,
                    "op": change.op,
                    "rev": change.rev,
                })).await?;
            }
            msg = stream.next() => {
                let Some(msg) = msg else { return Ok(()) };
                match msg? {
                    Message::Text(text) => handle_request(&text, &runs, &run_id, &mut sink).await?,
                    Message::Pong(_) => { awaiting_pong = false; }
                    Message::Close(_) => return Ok(()),
                    _ => {}
                }
            }
        }
    }
}

/// Watches the `Runs`/`Export` buses and forwards only the changes tagged
/// with this session's run id (the bus's own `EventIndex::project`
/// fallback chain lands `run_id` in the index's `id` field for both, since
/// neither payload carries a literal `id`/`message_id`/`event_id` key).
fn spawn_change_forwarder(buses: Arc<BusRegistry>, run_id: RunId, out: mpsc::Sender<ChangeEvent>) {
    for bus_name in [BusName::Runs, BusName::Export] {
        let hub = buses.hub();
        let sub_id = pb_core::ids::SubscriptionId::new();
        let mut rx = hub.register(bus_name, sub_id);
        let out = out.clone();
        let run_id_str = run_id.to_string();
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                if change.id.as_deref() == Some(run_id_str.as_str()) && out.send(change).await.is_err() {
                    break;
                }
            }
            hub.unregister(bus_name, sub_id);
        });
    }
}

async fn handle_request<C: Clock>(
    text: &str,
    runs: &RunManager<C>,
    run_id: &RunId,
    sink: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
) -> Result<(), WsError> {
    let Ok(frame) = serde_json::from_str::<Value>(text) else {
        return send_error(sink, "malformed json frame").await;
    };
    let req_id = frame.get("req_id").cloned().unwrap_or(Value::Null);
    match frame.get("type").and_then(Value::as_str) {
        Some("run.get") => match runs.get(run_id) {
            Ok(record) => send_json(sink, &serde_json::json!({ "type": "run.get", "req_id": req_id, "record": record })).await,
            Err(e) => send_error_with_req(sink, req_id, &e.to_string()).await,
        },
        Some("export.list") => {
            let after = frame.get("after").and_then(Value::as_u64);
            let limit = frame.get("limit").and_then(Value::as_u64).map(|n| n as usize).unwrap_or(DEFAULT_EXPORT_LIMIT);
            match runs.list_export(run_id, after, limit) {
                Ok(items) => send_json(sink, &serde_json::json!({ "type": "export.list", "req_id": req_id, "items": items })).await,
                Err(e) => send_error_with_req(sink, req_id, &e.to_string()).await,
            }
        }
        _ => send_error(sink, "unrecognized request type").await,
    }
}

async fn send_json(
    sink: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    value: &Value,
) -> Result<(), WsError> {
    sink.send(Message::Text(value.to_string().into())).await?;
    Ok(())
}

async fn send_error(
    sink: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    message: &str,
) -> Result<(), WsError> {
    send_json(sink, &serde_json::json!({ "type": "error", "message": message })).await
}

async fn send_error_with_req(
    sink: &mut (impl futures_util::Sink<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin),
    req_id: Value,
    message: &str,
) -> Result<(), WsError> {
    send_json(sink, &serde_json::json!({ "type": "error", "req_id": req_id, "message": message })).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_from_path_reads_trailing_segment() {
        let req = Request::builder().uri("/ws/run/run-abc123").body(()).unwrap();
        assert_eq!(run_id_from_path(&req), Some(RunId::from_string("run-abc123")));
    }

    #[test]
    fn run_id_from_path_rejects_bare_prefix() {
        let req = Request::builder().uri("/ws/run").body(()).unwrap();
        assert_eq!(run_id_from_path(&req), None);
    }

    #[test]
    fn run_id_from_path_rejects_trailing_slash() {
        let req = Request::builder().uri("/ws/run/").body(()).unwrap();
        assert_eq!(run_id_from_path(&req), None);
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Thin fast-plane RPC client: one TCP connection per invocation, one
//! request, one response. Plays the role of the teacher's `DaemonClient`
//! (a Unix-socket JSON protocol client) for this crate's wire format —
//! a length-prefixed msgpack `RpcRequest`/`RpcResponse` envelope instead.

use pb_core::ids::{PluginId, RequestId};
use pb_wire::codec::{read_message, write_message, ProtocolError};
use pb_wire::rpc::{RpcError, RpcOp, RpcRequest, RpcResponse};
use serde_json::Value;
use tokio::net::TcpStream;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("could not connect to plugboardd at {addr}: {source}")]
    Connect { addr: String, #[source] source: std::io::Error },
    #[error("lost connection to plugboardd: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("plugboardd returned a mismatched response (expected req_id {expected}, got {got})")]
    MismatchedResponse { expected: RequestId, got: RequestId },
    #[error("rpc error {code}: {message}")]
    Rpc { code: String, message: String },
}

pub struct FastPlaneClient {
    addr: String,
}

impl FastPlaneClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }

    /// Opens one connection, sends `op`/`args`, and returns the decoded
    /// `result` on success or a [`ClientError::Rpc`] on an error envelope.
    pub async fn call(&self, op: RpcOp, args: Value) -> Result<Value, ClientError> {
        self.call_as(op, args, None).await
    }

    /// Like [`call`](Self::call), but stamps `from_plugin` on the envelope —
    /// ops that enforce "own plugin only" (`BUS_SUBSCRIBE`, the
    /// `PLUGIN_CONFIG_*` family) need this to identify the caller.
    pub async fn call_as(
        &self,
        op: RpcOp,
        args: Value,
        from_plugin: Option<PluginId>,
    ) -> Result<Value, ClientError> {
        let mut stream = TcpStream::connect(&self.addr)
            .await
            .map_err(|source| ClientError::Connect { addr: self.addr.clone(), source })?;
        let request = RpcRequest::new(op, args, from_plugin);
        write_message(&mut stream, &request).await?;
        let response: RpcResponse = read_message(&mut stream).await?;
        if response.req_id != request.req_id {
            return Err(ClientError::MismatchedResponse { expected: request.req_id, got: response.req_id });
        }
        match response.error {
            None => Ok(response.result.unwrap_or(Value::Null)),
            Some(RpcError { code, message, .. }) => Err(ClientError::Rpc { code, message }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pb_wire::rpc::RpcResponse as WireResponse;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn call_round_trips_a_successful_echo() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let req: RpcRequest = read_message(&mut stream).await.unwrap();
            let resp = WireResponse::ok(req.req_id, serde_json::json!({ "echo": req.op.as_str() }));
            write_message(&mut stream, &resp).await.unwrap();
        });

        let client = FastPlaneClient::new(addr);
        let result = client.call(RpcOp::Ping, Value::Null).await.unwrap();
        assert_eq!(result["echo"], "ping");
    }

    #[tokio::test]
    async fn call_surfaces_an_rpc_error() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let req: RpcRequest = read_message(&mut stream).await.unwrap();
            let resp = WireResponse::err(req.req_id, "NOT_FOUND", "no such run");
            write_message(&mut stream, &resp).await.unwrap();
        });

        let client = FastPlaneClient::new(addr);
        let err = client.call(RpcOp::RunGet, serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ClientError::Rpc { code, .. } if code == "NOT_FOUND"));
    }

    #[tokio::test]
    async fn connect_failure_is_reported_cleanly() {
        let client = FastPlaneClient::new("127.0.0.1:1");
        let err = client.call(RpcOp::Ping, Value::Null).await.unwrap_err();
        assert!(matches!(err, ClientError::Connect { .. }));
    }

    #[tokio::test]
    async fn call_as_stamps_from_plugin_on_the_envelope() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let req: RpcRequest = read_message(&mut stream).await.unwrap();
            let resp = WireResponse::ok(req.req_id, serde_json::json!({ "from": req.from_plugin }));
            write_message(&mut stream, &resp).await.unwrap();
        });

        let client = FastPlaneClient::new(addr);
        let plugin_id = PluginId::new();
        let result =
            client.call_as(RpcOp::PluginConfigBase, Value::Null, Some(plugin_id)).await.unwrap();
        assert_eq!(result["from"], plugin_id.to_string());
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fast-plane RPC envelope (spec §6): `{v, op, req_id, args, from_plugin}` in,
//! `{v, ok, req_id, result|error}` out.

use pb_core::ids::{PluginId, RequestId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Known fast-plane operations (spec §6). Unrecognized op strings are kept
/// as `Other` so the router can still reply with a structured "unknown op"
/// error instead of failing to deserialize the envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum RpcOp {
    BusGetRecent,
    BusGetSince,
    BusQuery,
    BusReplay,
    BusPublish,
    BusListTopics,
    BusSubscribe,
    BusUnsubscribe,
    Ping,
    Health,
    /// §4.2 dispatch table, beyond the bus-read ops above.
    PluginToPlugin,
    PluginQuery,
    PluginConfigGet,
    PluginConfigUpdate,
    PluginConfigBase,
    PluginConfigProfiles,
    PluginConfigProfile,
    PluginConfigEffective,
    PluginSystemConfigGet,
    MessageGet,
    EventGet,
    LifecycleGet,
    MessagePush,
    MessageDel,
    EventDel,
    LifecycleDel,
    UserContextGet,
    MemoryQuery,
    ExportPush,
    RunUpdate,
    /// Run protocol ops reachable over the fast plane (SPEC_FULL.md §7), so
    /// a thin HTTP layer only needs to translate REST verbs into these.
    RunCreate,
    RunGet,
    RunCancel,
    RunUploadBegin,
    RunUploadPut,
    RunBlobGet,
    RunExportGet,
    Other(String),
}

impl RpcOp {
    pub fn as_str(&self) -> &str {
        match self {
            Self::BusGetRecent => "bus.get_recent",
            Self::BusGetSince => "bus.get_since",
            Self::BusQuery => "bus.query",
            Self::BusReplay => "bus.replay",
            Self::BusPublish => "bus.publish",
            Self::BusListTopics => "bus.list_topics",
            Self::BusSubscribe => "bus.subscribe",
            Self::BusUnsubscribe => "bus.unsubscribe",
            Self::Ping => "ping",
            Self::Health => "health",
            Self::PluginToPlugin => "plugin.to_plugin",
            Self::PluginQuery => "plugin.query",
            Self::PluginConfigGet => "plugin.config_get",
            Self::PluginConfigUpdate => "plugin.config_update",
            Self::PluginConfigBase => "plugin.config_base",
            Self::PluginConfigProfiles => "plugin.config_profiles",
            Self::PluginConfigProfile => "plugin.config_profile",
            Self::PluginConfigEffective => "plugin.config_effective",
            Self::PluginSystemConfigGet => "plugin.system_config_get",
            Self::MessageGet => "message.get",
            Self::EventGet => "event.get",
            Self::LifecycleGet => "lifecycle.get",
            Self::MessagePush => "message.push",
            Self::MessageDel => "message.del",
            Self::EventDel => "event.del",
            Self::LifecycleDel => "lifecycle.del",
            Self::UserContextGet => "user_context.get",
            Self::MemoryQuery => "memory.query",
            Self::ExportPush => "export.push",
            Self::RunUpdate => "run.update",
            Self::RunCreate => "run.create",
            Self::RunGet => "run.get",
            Self::RunCancel => "run.cancel",
            Self::RunUploadBegin => "run.upload_begin",
            Self::RunUploadPut => "run.upload_put",
            Self::RunBlobGet => "run.blob_get",
            Self::RunExportGet => "run.export_get",
            Self::Other(s) => s,
        }
    }
}

impl From<&str> for RpcOp {
    fn from(s: &str) -> Self {
        match s {
            "bus.get_recent" => Self::BusGetRecent,
            "bus.get_since" => Self::BusGetSince,
            "bus.query" => Self::BusQuery,
            "bus.replay" => Self::BusReplay,
            "bus.publish" => Self::BusPublish,
            "bus.list_topics" => Self::BusListTopics,
            "bus.subscribe" => Self::BusSubscribe,
            "bus.unsubscribe" => Self::BusUnsubscribe,
            "ping" => Self::Ping,
            "health" => Self::Health,
            "plugin.to_plugin" => Self::PluginToPlugin,
            "plugin.query" => Self::PluginQuery,
            "plugin.config_get" => Self::PluginConfigGet,
            "plugin.config_update" => Self::PluginConfigUpdate,
            "plugin.config_base" => Self::PluginConfigBase,
            "plugin.config_profiles" => Self::PluginConfigProfiles,
            "plugin.config_profile" => Self::PluginConfigProfile,
            "plugin.config_effective" => Self::PluginConfigEffective,
            "plugin.system_config_get" => Self::PluginSystemConfigGet,
            "message.get" => Self::MessageGet,
            "event.get" => Self::EventGet,
            "lifecycle.get" => Self::LifecycleGet,
            "message.push" => Self::MessagePush,
            "message.del" => Self::MessageDel,
            "event.del" => Self::EventDel,
            "lifecycle.del" => Self::LifecycleDel,
            "user_context.get" => Self::UserContextGet,
            "memory.query" => Self::MemoryQuery,
            "export.push" => Self::ExportPush,
            "run.update" => Self::RunUpdate,
            "run.create" => Self::RunCreate,
            "run.get" => Self::RunGet,
            "run.cancel" => Self::RunCancel,
            "run.upload_begin" => Self::RunUploadBegin,
            "run.upload_put" => Self::RunUploadPut,
            "run.blob_get" => Self::RunBlobGet,
            "run.export_get" => Self::RunExportGet,
            other => Self::Other(other.to_string()),
        }
    }
}

impl From<String> for RpcOp {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<RpcOp> for String {
    fn from(op: RpcOp) -> Self {
        op.as_str().to_string()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcRequest {
    pub v: u8,
    pub op: RpcOp,
    pub req_id: RequestId,
    #[serde(default)]
    pub args: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_plugin: Option<PluginId>,
}

impl RpcRequest {
    pub fn new(op: RpcOp, args: Value, from_plugin: Option<PluginId>) -> Self {
        Self { v: 1, op, req_id: RequestId::new(), args, from_plugin }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcResponse {
    pub v: u8,
    pub ok: bool,
    pub req_id: RequestId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

impl RpcResponse {
    pub fn ok(req_id: RequestId, result: Value) -> Self {
        Self { v: 1, ok: true, req_id, result: Some(result), error: None }
    }

    pub fn err(req_id: RequestId, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            v: 1,
            ok: false,
            req_id,
            result: None,
            error: Some(RpcError { code: code.into(), message: message.into(), details: None }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_op_round_trips_through_other() {
        let req = RpcRequest::new(RpcOp::from("bus.frobnicate"), Value::Null, None);
        let json = serde_json::to_string(&req).unwrap();
        let back: RpcRequest = serde_json::from_str(&json).unwrap();
        assert_eq!(back.op, RpcOp::Other("bus.frobnicate".to_string()));
    }

    #[test]
    fn known_op_serializes_to_its_dotted_name() {
        let req = RpcRequest::new(RpcOp::BusGetRecent, Value::Null, None);
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["op"], "bus.get_recent");
    }

    #[test]
    fn error_response_carries_no_result() {
        let resp = RpcResponse::err(RequestId::new(), "TIMEOUT", "deadline exceeded");
        assert!(!resp.ok);
        assert!(resp.result.is_none());
        assert_eq!(resp.error.unwrap().code, "TIMEOUT");
    }
}

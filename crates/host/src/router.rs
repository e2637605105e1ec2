// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The request router (`spec.md` §4.2 "Request router"): a dispatch table
//! keyed by [`RpcOp`], served over the fast plane via
//! [`crate::ipc::fast_plane::RpcHandler`]. The teacher's listener
//! (`listener/mod.rs`) drives its table with a blocking 100ms-timeout read
//! loop over a channel; `serve()` already owns that loop for us (one
//! `read_message`/`handle`/`write_message` cycle per connection), so this
//! module only needs to be the table itself.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use parking_lot::RwLock;
use pb_adapters::ProcessAdapter;
use pb_bus::{BusRegistry, Node, QueryFilter};
use pb_core::bus_name::BusName;
use pb_core::config::HostConfig;
use pb_core::envelope::{ErrorCode, ResultEnvelope};
use pb_core::ids::{PluginId, RunId, SubscriptionId};
use pb_core::{Clock, CoreError};
use pb_storage::run_store::{ExportKind, RunStatus};
use pb_wire::push::{PushBatch, WatermarkOutcome};
use pb_wire::rpc::{RpcError, RpcOp, RpcRequest, RpcResponse};
use pb_wire::subscribe::{BusSubscribeReply, BusSubscribeRequest, DeliverMode};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::dispatcher::{BusSubscriptionDispatcher, Subscription};
use crate::ipc::fast_plane::{PushWatermarks, RpcHandler};
use crate::plugin_host::PluginHost;
use crate::registry::PluginRegistry;
use crate::run::RunManager;

mod config_store;
pub use config_store::ConfigStore;

/// Default cap on any caller-supplied `limit` (§6 "`limit` capped at a
/// server maximum"), used whenever a request omits one.
const DEFAULT_QUERY_LIMIT: usize = 200;
const SERVER_MAX_LIMIT: usize = 10_000;

fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_QUERY_LIMIT).min(SERVER_MAX_LIMIT)
}

fn parse_args<T: DeserializeOwned>(args: &Value) -> Result<T, RpcError> {
    serde_json::from_value(args.clone())
        .map_err(|e| RpcError { code: ErrorCode::ValidationError.as_str().to_string(), message: e.to_string(), details: None })
}

fn err_response(req_id: pb_core::ids::RequestId, err: RpcError) -> RpcResponse {
    RpcResponse { v: 1, ok: false, req_id, result: None, error: Some(err) }
}

/// Maps a [`CoreError`] onto the wire error codes named in §7's taxonomy.
/// `PermissionDenied`/`Conflict` have no dedicated [`ErrorCode`] variant —
/// `RpcError::code` is a plain string, so they get their own literal codes
/// rather than overloading `Custom`.
fn core_error(err: CoreError) -> RpcError {
    let code = match &err {
        CoreError::PluginNotFound(_) | CoreError::EntryNotFound { .. } => ErrorCode::NotFound.as_str(),
        CoreError::NotRunning(_) => "NOT_READY",
        CoreError::Timeout(_) => ErrorCode::Timeout.as_str(),
        CoreError::InvalidArgument(_) => ErrorCode::ValidationError.as_str(),
        CoreError::PermissionDenied(_) => "PERMISSION_DENIED",
        CoreError::Conflict(_) => "CONFLICT",
        CoreError::Communication(_) => "COMMUNICATION_ERROR",
        CoreError::CapacityExceeded { .. } => ErrorCode::ValidationError.as_str(),
        CoreError::Internal(_) => ErrorCode::Internal.as_str(),
    };
    RpcError { code: code.to_string(), message: err.to_string(), details: None }
}

fn bus_error(err: pb_bus::BusError) -> RpcError {
    RpcError { code: ErrorCode::ValidationError.as_str().to_string(), message: err.to_string(), details: None }
}

fn run_error(err: crate::run::RunError) -> RpcError {
    use crate::run::RunError;
    let code = match &err {
        RunError::Store(pb_storage::run_store::RunStoreError::NotFound(_)) => ErrorCode::NotFound.as_str(),
        RunError::AlreadyTerminal(_) => ErrorCode::ValidationError.as_str(),
        RunError::UnknownUpload(_) => ErrorCode::NotFound.as_str(),
        RunError::UploadTooLarge(_) => ErrorCode::ValidationError.as_str(),
        RunError::MalformedToken | RunError::BadSignature | RunError::RunMismatch { .. } => "PERMISSION_DENIED",
        RunError::Expired(_) => "PERMISSION_DENIED",
    };
    RpcError { code: code.to_string(), message: err.to_string(), details: None }
}

/// What the router needs from a loaded plugin beyond what
/// [`PluginRegistry`] tracks: the live handle to actually dispatch a call,
/// and whether it's currently addressable. Implemented by `ControlPlane`
/// so this module never names that type and stays free to be constructed
/// in isolation for tests.
#[async_trait]
pub trait PluginLookup<C: Clock>: Send + Sync {
    fn is_alive(&self, plugin_id: &PluginId) -> bool;
    async fn trigger_custom_event(
        &self,
        plugin_id: &PluginId,
        event_name: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<ResultEnvelope, CoreError>;
}

/// A `ProcessAdapter`-backed map of live plugin hosts, the straightforward
/// [`PluginLookup`] every real `ControlPlane` uses. Kept generic over `P`
/// so tests can plug in `FakeProcessAdapter`.
pub struct HostTable<P: ProcessAdapter, C: Clock> {
    hosts: RwLock<HashMap<PluginId, Arc<PluginHost<P, C>>>>,
}

impl<P: ProcessAdapter, C: Clock> Default for HostTable<P, C> {
    fn default() -> Self {
        Self { hosts: RwLock::new(HashMap::new()) }
    }
}

impl<P: ProcessAdapter, C: Clock> HostTable<P, C> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, plugin_id: PluginId, host: Arc<PluginHost<P, C>>) {
        self.hosts.write().insert(plugin_id, host);
    }

    pub fn remove(&self, plugin_id: &PluginId) {
        self.hosts.write().remove(plugin_id);
    }

    pub fn get(&self, plugin_id: &PluginId) -> Option<Arc<PluginHost<P, C>>> {
        self.hosts.read().get(plugin_id).cloned()
    }

    /// Every currently-live host, for the control plane's health-poll task
    /// (SPEC_FULL.md §2) to iterate without holding the table lock across
    /// each plugin's `health_check()` await.
    pub fn snapshot(&self) -> Vec<(PluginId, Arc<PluginHost<P, C>>)> {
        self.hosts.read().iter().map(|(id, host)| (*id, host.clone())).collect()
    }
}

#[async_trait]
impl<P: ProcessAdapter, C: Clock> PluginLookup<C> for HostTable<P, C> {
    fn is_alive(&self, plugin_id: &PluginId) -> bool {
        self.hosts.read().get(plugin_id).map(|h| h.state().accepts_work()).unwrap_or(false)
    }

    async fn trigger_custom_event(
        &self,
        plugin_id: &PluginId,
        event_name: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<ResultEnvelope, CoreError> {
        let host = self.hosts.read().get(plugin_id).cloned().ok_or(CoreError::PluginNotFound(*plugin_id))?;
        host.trigger_custom_event(event_name, payload, timeout).await
    }
}

/// The dispatch table itself (§4.2). Holds everything a handler needs:
/// the bus registry, the plugin registry, the subscription dispatcher,
/// the run manager, a plugin-config store, and a [`PluginLookup`] for
/// reaching live hosts.
pub struct Router<C: Clock, L: PluginLookup<C>> {
    registry: Arc<PluginRegistry>,
    buses: Arc<BusRegistry>,
    dispatcher: Arc<BusSubscriptionDispatcher>,
    runs: Arc<RunManager<C>>,
    hosts: Arc<L>,
    configs: ConfigStore,
    cfg: Arc<HostConfig>,
    clock: C,
    push_watermarks: PushWatermarks,
}

impl<C: Clock, L: PluginLookup<C>> Router<C, L> {
    pub fn new(
        registry: Arc<PluginRegistry>,
        buses: Arc<BusRegistry>,
        dispatcher: Arc<BusSubscriptionDispatcher>,
        runs: Arc<RunManager<C>>,
        hosts: Arc<L>,
        cfg: Arc<HostConfig>,
        clock: C,
    ) -> Self {
        Self {
            registry,
            buses,
            dispatcher,
            runs,
            hosts,
            configs: ConfigStore::new(),
            cfg,
            clock,
            push_watermarks: PushWatermarks::new(),
        }
    }

    fn now_ms(&self) -> i64 {
        self.clock.epoch_ms() as i64
    }

    fn ok(&self, req_id: pb_core::ids::RequestId, result: Value) -> RpcResponse {
        RpcResponse::ok(req_id, result)
    }

    fn bus_or_err(&self, name: BusName) -> Result<&pb_bus::Bus, RpcError> {
        self.buses.bus(name).ok_or_else(|| RpcError {
            code: ErrorCode::Internal.as_str().to_string(),
            message: format!("bus '{name}' is not registered"),
            details: None,
        })
    }

    async fn handle_inner(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        match &request.op {
            RpcOp::Ping => Ok(serde_json::json!({ "pong": true })),
            RpcOp::Health => self.handle_health(),
            RpcOp::BusGetRecent => self.handle_bus_get_recent(&request.args),
            RpcOp::BusGetSince => self.handle_bus_get_since(&request.args),
            RpcOp::BusQuery => self.handle_bus_query(&request.args),
            RpcOp::BusReplay => self.handle_bus_replay(&request.args),
            RpcOp::BusPublish => self.handle_bus_publish(&request.args),
            RpcOp::BusListTopics => self.handle_bus_list_topics(&request.args),
            RpcOp::BusSubscribe => self.handle_bus_subscribe(request),
            RpcOp::BusUnsubscribe => self.handle_bus_unsubscribe(&request.args),
            RpcOp::PluginToPlugin => self.handle_plugin_to_plugin(request).await,
            RpcOp::PluginQuery => self.handle_plugin_query(&request.args),
            RpcOp::PluginConfigGet | RpcOp::PluginConfigEffective => self.handle_config_effective(request),
            RpcOp::PluginConfigUpdate => self.handle_config_update(request),
            RpcOp::PluginConfigBase => self.handle_config_base(request),
            RpcOp::PluginConfigProfiles => self.handle_config_profiles(request),
            RpcOp::PluginConfigProfile => self.handle_config_profile(request),
            RpcOp::PluginSystemConfigGet => Ok(self.handle_system_config_get()),
            RpcOp::MessageGet => self.handle_bus_read(BusName::Messages, &request.args),
            RpcOp::EventGet => self.handle_bus_read(BusName::Events, &request.args),
            RpcOp::LifecycleGet => self.handle_bus_read(BusName::Lifecycle, &request.args),
            RpcOp::MessagePush => self.handle_message_push(request),
            RpcOp::MessageDel => self.handle_bus_del(BusName::Messages, &request.args),
            RpcOp::EventDel => self.handle_bus_del(BusName::Events, &request.args),
            RpcOp::LifecycleDel => self.handle_bus_del(BusName::Lifecycle, &request.args),
            RpcOp::UserContextGet => self.handle_user_context_get(&request.args),
            RpcOp::MemoryQuery => self.handle_memory_query(&request.args),
            RpcOp::ExportPush => self.handle_export_push(&request.args),
            RpcOp::RunUpdate => self.handle_run_update(&request.args),
            RpcOp::RunCreate => self.handle_run_create(&request.args),
            RpcOp::RunGet => self.handle_run_get(&request.args),
            RpcOp::RunCancel => self.handle_run_cancel(&request.args),
            RpcOp::RunUploadBegin => self.handle_run_upload_begin(&request.args),
            RpcOp::RunUploadPut => self.handle_run_upload_put(&request.args),
            RpcOp::RunBlobGet => self.handle_run_blob_get(&request.args),
            RpcOp::RunExportGet => self.handle_run_export_get(&request.args),
            RpcOp::Other(other) => Err(RpcError {
                code: ErrorCode::ValidationError.as_str().to_string(),
                message: format!("unrecognized op '{other}'"),
                details: None,
            }),
        }
    }

    fn handle_health(&self) -> Result<Value, RpcError> {
        let records = self.registry.all_records();
        let plugins: Vec<Value> = records
            .iter()
            .map(|r| serde_json::json!({ "plugin_id": r.plugin_id, "alive": self.registry.is_alive(&r.plugin_id) }))
            .collect();
        Ok(serde_json::json!({ "ok": true, "plugins": plugins }))
    }

    fn handle_bus_get_recent(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            bus: BusName,
            topic: String,
            #[serde(default)]
            limit: Option<usize>,
        }
        let a: Args = parse_args(args)?;
        let bus = self.bus_or_err(a.bus)?;
        let events = bus.get_recent(&a.topic, clamp_limit(a.limit));
        Ok(serde_json::to_value(pb_bus::bus::light(&events)).unwrap_or(Value::Null))
    }

    fn handle_bus_get_since(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            bus: BusName,
            #[serde(default)]
            topic: Option<String>,
            #[serde(default)]
            after_seq: u64,
            #[serde(default)]
            limit: Option<usize>,
        }
        let a: Args = parse_args(args)?;
        let bus = self.bus_or_err(a.bus)?;
        let events = bus.get_since(a.topic.as_deref(), a.after_seq, clamp_limit(a.limit));
        Ok(serde_json::to_value(pb_bus::bus::light(&events)).unwrap_or(Value::Null))
    }

    fn query_filter_from(args: &QueryFilterArgs) -> QueryFilter {
        QueryFilter {
            topic: args.topic.clone(),
            plugin_id: args.plugin_id.clone(),
            source: args.source.clone(),
            kind: args.kind.clone(),
            r#type: args.r#type.clone(),
            priority_min: args.priority_min,
            since_ts: args.since_ts,
            until_ts: args.until_ts,
            limit: clamp_limit(args.limit),
        }
    }

    fn handle_bus_query(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            bus: BusName,
            #[serde(flatten)]
            filter: QueryFilterArgs,
        }
        let a: Args = parse_args(args)?;
        let bus = self.bus_or_err(a.bus)?;
        let events = bus.query(&Self::query_filter_from(&a.filter));
        Ok(serde_json::to_value(pb_bus::bus::light(&events)).unwrap_or(Value::Null))
    }

    fn handle_bus_read(&self, bus_name: BusName, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            #[serde(flatten)]
            filter: QueryFilterArgs,
        }
        let a: Args = parse_args(args)?;
        let bus = self.bus_or_err(bus_name)?;
        let events = bus.query(&Self::query_filter_from(&a.filter));
        Ok(serde_json::to_value(pb_bus::bus::light(&events)).unwrap_or(Value::Null))
    }

    fn handle_bus_replay(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            bus: BusName,
            plan: Node,
        }
        let a: Args = parse_args(args)?;
        let bus = self.bus_or_err(a.bus)?;
        let events = pb_bus::evaluate(&a.plan, bus);
        Ok(serde_json::to_value(pb_bus::bus::light(&events)).unwrap_or(Value::Null))
    }

    fn handle_bus_publish(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            bus: BusName,
            topic: String,
            payload: Value,
        }
        let a: Args = parse_args(args)?;
        let bus = self.bus_or_err(a.bus)?;
        let event = bus.publish(&a.topic, a.payload, self.now_ms()).map_err(bus_error)?;
        Ok(serde_json::json!({ "published": event.is_some(), "rev": bus.revision() }))
    }

    fn handle_bus_list_topics(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            bus: BusName,
        }
        let a: Args = parse_args(args)?;
        let bus = self.bus_or_err(a.bus)?;
        Ok(serde_json::json!({ "topics": bus.topic_names() }))
    }

    /// §6 "Bus subscription request": rejects anything but `delta` delivery
    /// (spec §4.4 "Delivery modes: only `delta`... is supported").
    fn handle_bus_subscribe(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let req: BusSubscribeRequest = parse_args(&request.args)?;
        if req.deliver != DeliverMode::Delta {
            return Err(RpcError {
                code: ErrorCode::ValidationError.as_str().to_string(),
                message: "only delta delivery is supported".to_string(),
                details: None,
            });
        }
        let Some(from_plugin) = request.from_plugin else {
            return Err(RpcError {
                code: ErrorCode::ValidationError.as_str().to_string(),
                message: "bus.subscribe requires from_plugin".to_string(),
                details: None,
            });
        };
        let bus = self.bus_or_err(req.bus)?;
        let sub_id = SubscriptionId::new();
        self.dispatcher.subscribe(Subscription {
            sub_id,
            plugin_id: from_plugin,
            bus: req.bus,
            rules: req.rules,
            debounce_ms: req.debounce_ms,
        });
        let reply = BusSubscribeReply { ok: true, sub_id, bus: req.bus, rev: bus.revision() };
        Ok(serde_json::to_value(reply).unwrap_or(Value::Null))
    }

    fn handle_bus_unsubscribe(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            bus: BusName,
            sub_id: SubscriptionId,
        }
        let a: Args = parse_args(args)?;
        self.dispatcher.unsubscribe(a.bus, a.sub_id);
        Ok(serde_json::json!({ "ok": true }))
    }

    async fn handle_plugin_to_plugin(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            to_plugin: PluginId,
            event_name: String,
            #[serde(default)]
            payload: Value,
            #[serde(default = "default_timeout_ms")]
            timeout_ms: u64,
        }
        let a: Args = parse_args(&request.args)?;
        if !self.hosts.is_alive(&a.to_plugin) {
            return Err(core_error(CoreError::NotRunning(a.to_plugin)));
        }
        let envelope = self
            .hosts
            .trigger_custom_event(&a.to_plugin, &a.event_name, a.payload, Duration::from_millis(a.timeout_ms))
            .await
            .map_err(core_error)?;
        Ok(serde_json::to_value(envelope).unwrap_or(Value::Null))
    }

    fn handle_plugin_query(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize, Default)]
        struct Args {
            #[serde(default)]
            plugin_id: Option<PluginId>,
        }
        let a: Args = parse_args(args)?;
        let records: Vec<Value> = self
            .registry
            .all_records()
            .into_iter()
            .filter(|r| a.plugin_id.map(|pid| pid == r.plugin_id).unwrap_or(true))
            .map(|r| {
                serde_json::json!({
                    "plugin_id": r.plugin_id,
                    "name": r.name,
                    "description": r.description,
                    "version": r.version,
                    "sdk_version": r.sdk_version,
                    "alive": self.registry.is_alive(&r.plugin_id),
                    "entry_types": r.entries_by_kind.keys().collect::<Vec<_>>(),
                })
            })
            .collect();
        Ok(serde_json::json!({ "plugins": records }))
    }

    /// §6 "enforce 'own plugin only'": every `PLUGIN_CONFIG_*` op reads or
    /// writes the caller's own config, never another plugin's.
    fn owning_plugin(&self, request: &RpcRequest) -> Result<PluginId, RpcError> {
        request.from_plugin.ok_or_else(|| RpcError {
            code: "PERMISSION_DENIED".to_string(),
            message: "plugin config ops require from_plugin".to_string(),
            details: None,
        })
    }

    fn handle_config_base(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let plugin_id = self.owning_plugin(request)?;
        Ok(self.configs.base(&plugin_id))
    }

    fn handle_config_update(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let plugin_id = self.owning_plugin(request)?;
        #[derive(serde::Deserialize)]
        struct Args {
            config: Value,
        }
        let a: Args = parse_args(&request.args)?;
        self.configs.update_base(&plugin_id, a.config);
        Ok(self.configs.base(&plugin_id))
    }

    fn handle_config_profiles(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let plugin_id = self.owning_plugin(request)?;
        Ok(serde_json::json!({ "profiles": self.configs.profile_names(&plugin_id) }))
    }

    fn handle_config_profile(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let plugin_id = self.owning_plugin(request)?;
        #[derive(serde::Deserialize)]
        struct Args {
            profile: String,
        }
        let a: Args = parse_args(&request.args)?;
        Ok(self.configs.profile(&plugin_id, &a.profile))
    }

    fn handle_config_effective(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        let plugin_id = self.owning_plugin(request)?;
        Ok(self.configs.effective(&plugin_id))
    }

    /// §7 "sanitized settings": no secrets (`run_token_secret`) cross this op.
    fn handle_system_config_get(&self) -> Value {
        serde_json::json!({
            "event_queue_max": self.cfg.event_queue_max,
            "lifecycle_queue_max": self.cfg.lifecycle_queue_max,
            "message_queue_max": self.cfg.message_queue_max,
            "plugin_execution_timeout_ms": self.cfg.plugin_execution_timeout.as_millis() as u64,
            "plugin_trigger_timeout_ms": self.cfg.plugin_trigger_timeout.as_millis() as u64,
            "run_token_ttl_secs": self.cfg.run_token_ttl.as_secs(),
            "blob_upload_max_bytes": self.cfg.blob_upload_max_bytes,
        })
    }

    /// §4.2 "`MESSAGE_PUSH` | validate/advance push seq; publish to messages
    /// store." A plugin that tags its push with a `seq` is on the fast push
    /// path and gets the §3 `PushSeqWatermark` check (a duplicate resend is
    /// silently dropped, an out-of-order one is rejected); a push with no
    /// `seq` (the CLI, or a plugin not using the numbered path) skips
    /// watermark tracking entirely, same as before this existed.
    fn handle_message_push(&self, request: &RpcRequest) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            #[serde(default = "default_topic")]
            topic: String,
            payload: Value,
            seq: Option<u64>,
        }
        let a: Args = parse_args(&request.args)?;
        if let (Some(from_plugin), Some(seq)) = (request.from_plugin, a.seq) {
            let batch =
                PushBatch { from_plugin, first_seq: seq, last_seq: seq, count: 1, items: vec![a.payload.clone()] };
            match self.push_watermarks.accept(&batch) {
                WatermarkOutcome::Advanced => {}
                WatermarkOutcome::Duplicate => {
                    return Ok(serde_json::json!({ "published": false, "message_id": Value::Null, "duplicate": true }));
                }
                WatermarkOutcome::OutOfOrder => {
                    return Err(RpcError {
                        code: ErrorCode::ValidationError.as_str().to_string(),
                        message: format!("push seq {seq} is out of order for plugin '{from_plugin}'"),
                        details: None,
                    });
                }
            }
        }
        let bus = self.bus_or_err(BusName::Messages)?;
        let event = bus.publish(&a.topic, a.payload, self.now_ms()).map_err(bus_error)?;
        Ok(serde_json::json!({ "published": event.is_some(), "message_id": event.and_then(|e| e.index.id) }))
    }

    fn handle_bus_del(&self, bus_name: BusName, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            id: String,
        }
        let a: Args = parse_args(args)?;
        let bus = self.bus_or_err(bus_name)?;
        bus.delete(&a.id);
        Ok(serde_json::json!({ "ok": true, "rev": bus.revision() }))
    }

    fn handle_user_context_get(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            bucket: String,
        }
        let a: Args = parse_args(args)?;
        let values = self.buses.memory.get(&a.bucket, self.clock.epoch_ms());
        Ok(serde_json::json!({ "bucket": a.bucket, "items": values }))
    }

    /// §4.2 dispatch table: "forward to memory subsystem". This core
    /// doesn't have a dedicated `memory.put` op, so a request carrying
    /// `value` writes (with `ttl_ms`, default one hour) and a request
    /// without one reads — documented here since it's not spelled out by
    /// the wire vocabulary itself.
    fn handle_memory_query(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            bucket: String,
            #[serde(default)]
            value: Option<Value>,
            #[serde(default = "default_memory_ttl_ms")]
            ttl_ms: u64,
        }
        let a: Args = parse_args(args)?;
        if let Some(value) = a.value {
            self.buses.memory.put(&a.bucket, value, self.clock.epoch_ms(), a.ttl_ms);
            return Ok(serde_json::json!({ "ok": true }));
        }
        let values = self.buses.memory.get(&a.bucket, self.clock.epoch_ms());
        Ok(serde_json::json!({ "bucket": a.bucket, "items": values }))
    }

    fn handle_export_push(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            run_id: RunId,
            kind: ExportKind,
            seq: u64,
        }
        let a: Args = parse_args(args)?;
        let item = self.runs.push_export(&a.run_id, a.kind, a.seq).map_err(run_error)?;
        Ok(serde_json::to_value(item).unwrap_or(Value::Null))
    }

    fn handle_run_update(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            run_id: RunId,
            status: RunStatus,
            #[serde(default)]
            error: Option<Value>,
        }
        let a: Args = parse_args(args)?;
        let record = self.runs.set_status(&a.run_id, a.status, a.error).map_err(run_error)?;
        Ok(serde_json::to_value(record).unwrap_or(Value::Null))
    }

    /// `run.create` (SPEC_FULL.md §7): the op a thin HTTP `POST /runs` would
    /// translate into.
    fn handle_run_create(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            plugin_id: PluginId,
            entry_id: String,
            #[serde(default)]
            args: Value,
            #[serde(default)]
            task_id: Option<String>,
            #[serde(default)]
            trace_id: Option<String>,
            #[serde(default)]
            idempotency_key: Option<String>,
        }
        let a: Args = parse_args(args)?;
        let record = self
            .runs
            .create(a.plugin_id, a.entry_id, a.args, a.task_id, a.trace_id, a.idempotency_key)
            .map_err(run_error)?;
        Ok(serde_json::to_value(record).unwrap_or(Value::Null))
    }

    fn handle_run_get(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            run_id: RunId,
        }
        let a: Args = parse_args(args)?;
        let record = self.runs.get(&a.run_id).map_err(run_error)?;
        Ok(serde_json::to_value(record).unwrap_or(Value::Null))
    }

    /// `run.cancel` (SPEC_FULL.md §7, spec §8 scenario S6): `queued` commits
    /// to `canceled` immediately, `running` only requests cancellation.
    fn handle_run_cancel(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            run_id: RunId,
        }
        let a: Args = parse_args(args)?;
        let record = self.runs.cancel(&a.run_id).map_err(run_error)?;
        Ok(serde_json::to_value(record).unwrap_or(Value::Null))
    }

    fn handle_run_upload_begin(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            run_id: RunId,
        }
        let a: Args = parse_args(args)?;
        let upload_id = self.runs.begin_upload(a.run_id);
        Ok(serde_json::json!({ "upload_id": upload_id }))
    }

    /// `run.upload_put`: the one-shot blob body travels as base64 inside the
    /// JSON args, since the fast plane's envelope is a single msgpack value
    /// rather than a raw byte stream (spec §6 doesn't define chunked
    /// uploads, so one `PUT`-equivalent call is the whole contract).
    fn handle_run_upload_put(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            upload_id: pb_core::ids::UploadId,
            bytes_base64: String,
        }
        let a: Args = parse_args(args)?;
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(a.bytes_base64)
            .map_err(|e| RpcError {
                code: ErrorCode::ValidationError.as_str().to_string(),
                message: format!("invalid base64 upload body: {e}"),
                details: None,
            })?;
        let blob_id = self.runs.complete_upload(a.upload_id, &bytes).map_err(run_error)?;
        Ok(serde_json::json!({ "blob_id": blob_id }))
    }

    fn handle_run_blob_get(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            run_id: RunId,
            blob_id: pb_core::ids::BlobId,
        }
        let a: Args = parse_args(args)?;
        let bytes = self.runs.get_blob(&a.run_id, &a.blob_id).map_err(run_error)?;
        Ok(serde_json::json!({ "bytes_base64": base64::engine::general_purpose::STANDARD.encode(bytes) }))
    }

    fn handle_run_export_get(&self, args: &Value) -> Result<Value, RpcError> {
        #[derive(serde::Deserialize)]
        struct Args {
            run_id: RunId,
            #[serde(default)]
            after: Option<u64>,
            #[serde(default)]
            limit: Option<usize>,
        }
        let a: Args = parse_args(args)?;
        let items = self.runs.list_export(&a.run_id, a.after, clamp_limit(a.limit)).map_err(run_error)?;
        Ok(serde_json::to_value(items).unwrap_or(Value::Null))
    }
}

#[derive(serde::Deserialize, Default)]
struct QueryFilterArgs {
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    plugin_id: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    kind: Option<String>,
    #[serde(default)]
    r#type: Option<String>,
    #[serde(default)]
    priority_min: Option<i64>,
    #[serde(default)]
    since_ts: Option<i64>,
    #[serde(default)]
    until_ts: Option<i64>,
    #[serde(default)]
    limit: Option<usize>,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_topic() -> String {
    "default".to_string()
}

fn default_memory_ttl_ms() -> u64 {
    3_600_000
}

#[async_trait]
impl<C: Clock, L: PluginLookup<C>> RpcHandler for Router<C, L> {
    /// Every branch of §4.2's dispatch table funnels through here; unknown
    /// ops are logged and dropped with a structured error rather than
    /// closing the connection (`serve()`'s loop continues either way).
    async fn handle(&self, request: RpcRequest) -> RpcResponse {
        let req_id = request.req_id;
        match self.handle_inner(&request).await {
            Ok(result) => self.ok(req_id, result),
            Err(e) => {
                tracing::warn!(op = request.op.as_str(), code = %e.code, "rpc request failed");
                err_response(req_id, e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pb_core::ids::RequestId;
    use pb_core::FakeClock;
    use pb_core::HostConfig;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct StubLookup {
        alive: AtomicBool,
    }

    #[async_trait]
    impl PluginLookup<FakeClock> for StubLookup {
        fn is_alive(&self, _plugin_id: &PluginId) -> bool {
            self.alive.load(Ordering::SeqCst)
        }

        async fn trigger_custom_event(
            &self,
            _plugin_id: &PluginId,
            _event_name: &str,
            payload: Value,
            _timeout: Duration,
        ) -> Result<ResultEnvelope, CoreError> {
            Ok(ResultEnvelope::ok(payload, 0))
        }
    }

    fn router() -> (Router<FakeClock, StubLookup>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let registry = Arc::new(PluginRegistry::new());
        let buses = Arc::new(BusRegistry::new(100, 100));
        let dispatcher = Arc::new(BusSubscriptionDispatcher::new(256));
        let cfg = Arc::new(HostConfig::default());
        let store = Arc::new(pb_storage::run_store::RunStore::new(dir.path()));
        let runs = Arc::new(RunManager::new(store, buses.clone(), cfg.clone(), FakeClock::new()));
        let hosts = Arc::new(StubLookup { alive: AtomicBool::new(true) });
        (Router::new(registry, buses, dispatcher, runs, hosts, cfg, FakeClock::new()), dir)
    }

    fn req(op: RpcOp, args: Value) -> RpcRequest {
        RpcRequest::new(op, args, None)
    }

    #[tokio::test]
    async fn ping_replies_ok() {
        let (r, _dir) = router();
        let resp = r.handle(req(RpcOp::Ping, Value::Null)).await;
        assert!(resp.ok);
    }

    #[tokio::test]
    async fn unknown_op_yields_a_structured_error_not_a_panic() {
        let (r, _dir) = router();
        let resp = r.handle(req(RpcOp::Other("bus.frobnicate".into()), Value::Null)).await;
        assert!(!resp.ok);
        assert_eq!(resp.error.unwrap().code, "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn publish_then_get_recent_round_trips() {
        let (r, _dir) = router();
        let publish = req(
            RpcOp::BusPublish,
            serde_json::json!({ "bus": "messages", "topic": "t", "payload": { "id": "m1" } }),
        );
        assert!(r.handle(publish).await.ok);

        let get = req(RpcOp::BusGetRecent, serde_json::json!({ "bus": "messages", "topic": "t" }));
        let resp = r.handle(get).await;
        assert!(resp.ok);
        assert_eq!(resp.result.unwrap().as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn message_push_then_del_removes_it() {
        let (r, _dir) = router();
        let push = req(RpcOp::MessagePush, serde_json::json!({ "payload": { "id": "m1" } }));
        let resp = r.handle(push).await;
        assert!(resp.ok);

        let del = req(RpcOp::MessageDel, serde_json::json!({ "id": "m1" }));
        assert!(r.handle(del).await.ok);

        let get = req(RpcOp::MessageGet, serde_json::json!({}));
        let resp = r.handle(get).await;
        assert_eq!(resp.result.unwrap().as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn message_push_with_seq_advances_the_watermark() {
        let (r, _dir) = router();
        let mut first = req(RpcOp::MessagePush, serde_json::json!({ "payload": { "id": "m1" }, "seq": 0 }));
        first.from_plugin = Some(PluginId::from_string("plg-a"));
        assert!(r.handle(first).await.ok);

        let mut second = req(RpcOp::MessagePush, serde_json::json!({ "payload": { "id": "m2" }, "seq": 1 }));
        second.from_plugin = Some(PluginId::from_string("plg-a"));
        assert!(r.handle(second).await.ok);
    }

    #[tokio::test]
    async fn message_push_duplicate_seq_is_dropped_not_republished() {
        let (r, _dir) = router();
        let mut first = req(RpcOp::MessagePush, serde_json::json!({ "payload": { "id": "m1" }, "seq": 0 }));
        first.from_plugin = Some(PluginId::from_string("plg-a"));
        assert!(r.handle(first).await.ok);

        let mut resend = req(RpcOp::MessagePush, serde_json::json!({ "payload": { "id": "m1" }, "seq": 0 }));
        resend.from_plugin = Some(PluginId::from_string("plg-a"));
        let resp = r.handle(resend).await;
        assert!(resp.ok);
        assert_eq!(resp.result.unwrap()["published"], false);

        let get = req(RpcOp::MessageGet, serde_json::json!({}));
        let resp = r.handle(get).await;
        assert_eq!(resp.result.unwrap().as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn message_push_out_of_order_seq_is_rejected() {
        let (r, _dir) = router();
        let mut first = req(RpcOp::MessagePush, serde_json::json!({ "payload": { "id": "m1" }, "seq": 0 }));
        first.from_plugin = Some(PluginId::from_string("plg-a"));
        assert!(r.handle(first).await.ok);

        let mut gap = req(RpcOp::MessagePush, serde_json::json!({ "payload": { "id": "m2" }, "seq": 5 }));
        gap.from_plugin = Some(PluginId::from_string("plg-a"));
        let resp = r.handle(gap).await;
        assert!(!resp.ok);
        assert_eq!(resp.error.unwrap().code, "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn subscribe_requires_delta_delivery() {
        let (r, _dir) = router();
        let mut request = req(
            RpcOp::BusSubscribe,
            serde_json::json!({ "bus": "messages", "rules": ["add"], "deliver": "delta", "timeout": 5.0 }),
        );
        request.from_plugin = Some(PluginId::from_string("plg-sub"));
        let resp = r.handle(request).await;
        assert!(resp.ok);
    }

    #[tokio::test]
    async fn plugin_to_plugin_rejects_dead_target() {
        let (r, _dir) = router();
        r.hosts.alive.store(false, Ordering::SeqCst);
        let request = req(
            RpcOp::PluginToPlugin,
            serde_json::json!({ "to_plugin": "plg-b", "event_name": "ping" }),
        );
        let resp = r.handle(request).await;
        assert!(!resp.ok);
        assert_eq!(resp.error.unwrap().code, "NOT_READY");
    }

    #[tokio::test]
    async fn config_ops_require_from_plugin() {
        let (r, _dir) = router();
        let request = req(RpcOp::PluginConfigBase, Value::Null);
        let resp = r.handle(request).await;
        assert!(!resp.ok);
        assert_eq!(resp.error.unwrap().code, "PERMISSION_DENIED");
    }

    #[tokio::test]
    async fn config_update_then_effective_round_trips() {
        let (r, _dir) = router();
        let mut update = req(RpcOp::PluginConfigUpdate, serde_json::json!({ "config": { "x": 1 } }));
        update.from_plugin = Some(PluginId::from_string("plg-a"));
        assert!(r.handle(update).await.ok);

        let mut effective = req(RpcOp::PluginConfigEffective, Value::Null);
        effective.from_plugin = Some(PluginId::from_string("plg-a"));
        let resp = r.handle(effective).await;
        assert_eq!(resp.result.unwrap()["x"], 1);
    }

    #[tokio::test]
    async fn export_push_then_run_update_round_trip() {
        let (r, _dir) = router();
        let create = r
            .runs
            .create(PluginId::from_string("plg-a"), "entry.main".into(), Value::Null, None, None, None)
            .unwrap();

        let export = req(
            RpcOp::ExportPush,
            serde_json::json!({ "run_id": create.run_id, "seq": 1, "kind": { "kind": "text", "content": "hi" } }),
        );
        assert!(r.handle(export).await.ok);

        let update = req(
            RpcOp::RunUpdate,
            serde_json::json!({ "run_id": create.run_id, "status": "completed" }),
        );
        let resp = r.handle(update).await;
        assert!(resp.ok);
        assert_eq!(resp.result.unwrap()["status"], "completed");
    }

    #[test]
    fn unused_request_id_helper_compiles() {
        let _ = RequestId::new();
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plugin registry: `PluginRecord`/`EventHandler` bookkeeping and the
//! boot-time handler scan (`spec.md` §3 entities, §4.5 "Handler registry &
//! static scan"). Rust has no runtime reflection, so the scan described
//! there becomes a handshake: the child sends its own `HandlerDescriptor`
//! list once, over `status_ch`, right after `STARTING` (SPEC_FULL.md §6).

use std::collections::HashMap;

use parking_lot::RwLock;
use pb_core::handler::HandlerDescriptor;
use pb_core::id::short;
use pb_core::ids::{HandlerId, PluginId};
use pb_core::manifest::PluginManifest;

/// `spec.md` §3 "EventHandler": immutable after scan, indexed under two
/// composite keys.
#[derive(Debug, Clone)]
pub struct EventHandler {
    pub handler_id: HandlerId,
    pub plugin_id: PluginId,
    pub descriptor: HandlerDescriptor,
}

impl EventHandler {
    fn composite_key(plugin_id: &PluginId, event_id: &str) -> String {
        format!("{plugin_id}.{event_id}")
    }

    fn typed_key(plugin_id: &PluginId, event_type: &str, event_id: &str) -> String {
        format!("{plugin_id}:{event_type}:{event_id}")
    }
}

/// `spec.md` §3 "PluginRecord".
#[derive(Debug, Clone)]
pub struct PluginRecord {
    pub plugin_id: PluginId,
    pub name: String,
    pub description: String,
    pub version: String,
    pub sdk_version: String,
    pub dependencies: Vec<pb_core::manifest::PluginDependency>,
    /// `event_type` -> ordered list of handler ids of that kind.
    pub entries_by_kind: HashMap<String, Vec<HandlerId>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("plugin '{0}' not found")]
    PluginNotFound(PluginId),
    #[error("handler '{0}' not found")]
    HandlerNotFound(String),
}

struct Inner {
    records: HashMap<PluginId, PluginRecord>,
    handlers: HashMap<HandlerId, EventHandler>,
    by_composite: HashMap<String, HandlerId>,
    by_typed: HashMap<String, HandlerId>,
    alive: HashMap<PluginId, bool>,
}

/// Owns every `PluginRecord`/`EventHandler` live in the control plane.
/// `ControlPlane` holds one of these; `pb-host`'s router and dispatcher only
/// ever see it through `&PluginRegistry`.
pub struct PluginRegistry {
    inner: RwLock<Inner>,
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Inner {
                records: HashMap::new(),
                handlers: HashMap::new(),
                by_composite: HashMap::new(),
                by_typed: HashMap::new(),
                alive: HashMap::new(),
            }),
        }
    }

    /// Registers a plugin from its manifest. On an id collision, auto-renames
    /// with a numeric suffix and returns the id actually used (`spec.md` §7
    /// "Conflict ... auto-rename with suffix; logged as warning").
    pub fn register_manifest(&self, manifest: &PluginManifest, sdk_version: &str) -> PluginId {
        let mut inner = self.inner.write();
        let body = &manifest.plugin;
        let mut plugin_id = body.id;
        let mut attempt = 1u32;
        while inner.records.contains_key(&plugin_id) {
            attempt += 1;
            let base = short(body.id.as_str(), pb_core::ID_MAX_LEN - 4);
            plugin_id = PluginId::from_string(format!("{base}-{attempt}"));
            tracing::warn!(original = %body.id, renamed = %plugin_id, "plugin id collision, auto-renamed");
        }
        inner.records.insert(
            plugin_id,
            PluginRecord {
                plugin_id,
                name: body.name.clone(),
                description: body.description.clone(),
                version: body.version.clone(),
                sdk_version: sdk_version.to_string(),
                dependencies: body.dependency.clone(),
                entries_by_kind: HashMap::new(),
            },
        );
        inner.alive.insert(plugin_id, false);
        plugin_id
    }

    /// Consumes the boot-time `STATUS{kind:"entries"}` descriptor list,
    /// replacing any entries already registered for `plugin_id` (idempotent
    /// per `spec.md` §4.5: re-running the scan never duplicates handlers).
    pub fn register_entries(&self, plugin_id: PluginId, entries: Vec<HandlerDescriptor>) {
        let mut inner = self.inner.write();
        if let Some(existing) = inner.records.get(&plugin_id).map(|r| r.entries_by_kind.clone()) {
            for ids in existing.values() {
                for id in ids {
                    if let Some(h) = inner.handlers.remove(id) {
                        inner.by_composite.remove(&EventHandler::composite_key(&plugin_id, &h.descriptor.event_id));
                        inner.by_typed.remove(&EventHandler::typed_key(
                            &plugin_id,
                            &h.descriptor.event_type,
                            &h.descriptor.event_id,
                        ));
                    }
                }
            }
        }

        let mut entries_by_kind: HashMap<String, Vec<HandlerId>> = HashMap::new();
        for descriptor in entries {
            let handler_id = HandlerId::new();
            let composite = EventHandler::composite_key(&plugin_id, &descriptor.event_id);
            let typed = EventHandler::typed_key(&plugin_id, &descriptor.event_type, &descriptor.event_id);
            entries_by_kind.entry(descriptor.event_type.clone()).or_default().push(handler_id);
            inner.by_composite.insert(composite, handler_id);
            inner.by_typed.insert(typed, handler_id);
            inner.handlers.insert(handler_id, EventHandler { handler_id, plugin_id, descriptor });
        }

        if let Some(record) = inner.records.get_mut(&plugin_id) {
            record.entries_by_kind = entries_by_kind;
        }
    }

    pub fn unregister(&self, plugin_id: &PluginId) {
        let mut inner = self.inner.write();
        if let Some(record) = inner.records.remove(plugin_id) {
            for ids in record.entries_by_kind.values() {
                for id in ids {
                    if let Some(h) = inner.handlers.remove(id) {
                        inner.by_composite.remove(&EventHandler::composite_key(plugin_id, &h.descriptor.event_id));
                        inner.by_typed.remove(&EventHandler::typed_key(
                            plugin_id,
                            &h.descriptor.event_type,
                            &h.descriptor.event_id,
                        ));
                    }
                }
            }
        }
        inner.alive.remove(plugin_id);
    }

    pub fn record(&self, plugin_id: &PluginId) -> Option<PluginRecord> {
        self.inner.read().records.get(plugin_id).cloned()
    }

    pub fn all_records(&self) -> Vec<PluginRecord> {
        self.inner.read().records.values().cloned().collect()
    }

    pub fn find_by_event_id(&self, plugin_id: &PluginId, event_id: &str) -> Option<EventHandler> {
        let inner = self.inner.read();
        let key = EventHandler::composite_key(plugin_id, event_id);
        inner.by_composite.get(&key).and_then(|id| inner.handlers.get(id)).cloned()
    }

    pub fn find_by_type(&self, plugin_id: &PluginId, event_type: &str, event_id: &str) -> Option<EventHandler> {
        let inner = self.inner.read();
        let key = EventHandler::typed_key(plugin_id, event_type, event_id);
        inner.by_typed.get(&key).and_then(|id| inner.handlers.get(id)).cloned()
    }

    pub fn set_alive(&self, plugin_id: PluginId, alive: bool) {
        self.inner.write().alive.insert(plugin_id, alive);
    }

    /// The router reads this cached bit rather than probing the child
    /// synchronously (SPEC_FULL.md §2 liveness polling), so one slow plugin
    /// cannot stall an unrelated call.
    pub fn is_alive(&self, plugin_id: &PluginId) -> bool {
        self.inner.read().alive.get(plugin_id).copied().unwrap_or(false)
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-plugin configuration: a base document, named profiles layered on
//! top, and the "effective" merge the `PLUGIN_CONFIG_*` ops expose. Nothing
//! in the rest of the pack implements a config service, so this is grounded
//! on the same `RwLock<HashMap<..>>` shape `pb_bus::memory::MemoryStore`
//! uses for its own per-bucket bookkeeping, generalized to the richer value
//! this one needs to hold.

use std::collections::HashMap;

use parking_lot::RwLock;
use pb_core::ids::PluginId;
use serde_json::Value;

#[derive(Default)]
struct PluginConfig {
    base: Value,
    profiles: HashMap<String, Value>,
    active_profile: Option<String>,
}

/// Holds every plugin's base config and named profiles. A profile is
/// shallow-merged over the base to produce the "effective" config a
/// plugin actually runs with; `config_update` only ever touches the base
/// document, never a profile.
#[derive(Default)]
pub struct ConfigStore {
    plugins: RwLock<HashMap<PluginId, PluginConfig>>,
}

/// Shallow-merges `patch`'s top-level keys over `base`, leaving nested
/// objects untouched rather than deep-merging them.
fn shallow_merge(base: &Value, patch: &Value) -> Value {
    let (Some(base_obj), Some(patch_obj)) = (base.as_object(), patch.as_object()) else {
        return if patch.is_null() { base.clone() } else { patch.clone() };
    };
    let mut merged = base_obj.clone();
    for (k, v) in patch_obj {
        merged.insert(k.clone(), v.clone());
    }
    Value::Object(merged)
}

impl ConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base(&self, plugin_id: &PluginId) -> Value {
        self.plugins.read().get(plugin_id).map(|c| c.base.clone()).unwrap_or(Value::Object(Default::default()))
    }

    pub fn update_base(&self, plugin_id: &PluginId, config: Value) {
        let mut plugins = self.plugins.write();
        let entry = plugins.entry(*plugin_id).or_default();
        entry.base = shallow_merge(&entry.base, &config);
    }

    pub fn profile_names(&self, plugin_id: &PluginId) -> Vec<String> {
        self.plugins.read().get(plugin_id).map(|c| c.profiles.keys().cloned().collect()).unwrap_or_default()
    }

    pub fn profile(&self, plugin_id: &PluginId, name: &str) -> Value {
        self.plugins
            .read()
            .get(plugin_id)
            .and_then(|c| c.profiles.get(name).cloned())
            .unwrap_or(Value::Object(Default::default()))
    }

    pub fn set_profile(&self, plugin_id: &PluginId, name: &str, config: Value) {
        let mut plugins = self.plugins.write();
        let entry = plugins.entry(*plugin_id).or_default();
        entry.profiles.insert(name.to_string(), config);
    }

    pub fn set_active_profile(&self, plugin_id: &PluginId, name: Option<String>) {
        let mut plugins = self.plugins.write();
        plugins.entry(*plugin_id).or_default().active_profile = name;
    }

    /// Base config with the active profile (if any) shallow-merged on top.
    pub fn effective(&self, plugin_id: &PluginId) -> Value {
        let plugins = self.plugins.read();
        let Some(entry) = plugins.get(plugin_id) else {
            return Value::Object(Default::default());
        };
        match &entry.active_profile {
            Some(name) => match entry.profiles.get(name) {
                Some(profile) => shallow_merge(&entry.base, profile),
                None => entry.base.clone(),
            },
            None => entry.base.clone(),
        }
    }
}

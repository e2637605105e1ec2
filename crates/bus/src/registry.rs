// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Owns the five subscribable buses plus the `memory` bucket store, all
//! sharing one [`BusChangeHub`]. This is what `pb-host`'s `ControlPlane`
//! embeds (spec §3 "four globally observable multi-topic stores... plus
//! `memory`").

use std::collections::HashMap;
use std::sync::Arc;

use pb_core::bus_name::BusName;

use crate::bus::Bus;
use crate::hub::BusChangeHub;
use crate::memory::MemoryStore;

pub struct BusRegistry {
    buses: HashMap<BusName, Bus>,
    pub memory: MemoryStore,
    pub hub: Arc<BusChangeHub>,
}

impl BusRegistry {
    pub fn new(maxlen: usize, memory_max_per_bucket: usize) -> Self {
        let hub = Arc::new(BusChangeHub::new());
        let mut buses = HashMap::new();
        for name in BusName::SUBSCRIBABLE {
            buses.insert(name, Bus::new(name, maxlen, hub.clone()));
        }
        Self { buses, memory: MemoryStore::new(memory_max_per_bucket), hub }
    }

    /// Per-bus ring capacities can differ (spec §6 `EVENT_QUEUE_MAX`,
    /// `LIFECYCLE_QUEUE_MAX`, `MESSAGE_QUEUE_MAX`); this constructor lets
    /// the host wire those in instead of a single uniform `maxlen`.
    pub fn with_capacities(capacities: HashMap<BusName, usize>, default_maxlen: usize, memory_max_per_bucket: usize) -> Self {
        let hub = Arc::new(BusChangeHub::new());
        let mut buses = HashMap::new();
        for name in BusName::SUBSCRIBABLE {
            let cap = capacities.get(&name).copied().unwrap_or(default_maxlen);
            buses.insert(name, Bus::new(name, cap, hub.clone()));
        }
        Self { buses, memory: MemoryStore::new(memory_max_per_bucket), hub }
    }

    pub fn bus(&self, name: BusName) -> Option<&Bus> {
        self.buses.get(&name)
    }

    pub fn hub(&self) -> Arc<BusChangeHub> {
        self.hub.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exposes_every_subscribable_bus() {
        let registry = BusRegistry::new(10, 10);
        for name in BusName::SUBSCRIBABLE {
            assert!(registry.bus(name).is_some());
        }
    }

    #[test]
    fn memory_bus_is_not_in_the_registry_map() {
        let registry = BusRegistry::new(10, 10);
        assert!(registry.bus(BusName::Memory).is_none());
    }

    #[test]
    fn per_bus_capacity_override_is_honored() {
        let mut caps = HashMap::new();
        caps.insert(BusName::Events, 2);
        let registry = BusRegistry::with_capacities(caps, 100, 10);
        let bus = registry.bus(BusName::Events).unwrap();
        for i in 0..5 {
            bus.publish("t", serde_json::json!({"id": format!("e{i}")}), i).unwrap();
        }
        assert_eq!(bus.get_recent("t", 100).len(), 2);
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The fixed set of buses a [`TopicStore`](crate) may back.

use serde::{Deserialize, Serialize};

/// One of the globally observable multi-topic stores plugins publish to and
/// subscribe from. `Memory` backs `USER_CONTEXT_GET`/`MEMORY_QUERY` and is not
/// user-subscribable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusName {
    Messages,
    Events,
    Lifecycle,
    Runs,
    Export,
    Memory,
}

impl BusName {
    pub const ALL: [BusName; 6] =
        [Self::Messages, Self::Events, Self::Lifecycle, Self::Runs, Self::Export, Self::Memory];

    /// Buses a subscriber may register against via `BUS_SUBSCRIBE`.
    pub const SUBSCRIBABLE: [BusName; 5] =
        [Self::Messages, Self::Events, Self::Lifecycle, Self::Runs, Self::Export];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Events => "events",
            Self::Lifecycle => "lifecycle",
            Self::Runs => "runs",
            Self::Export => "export",
            Self::Memory => "memory",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "messages" => Self::Messages,
            "events" => Self::Events,
            "lifecycle" => Self::Lifecycle,
            "runs" => Self::Runs,
            "export" => Self::Export,
            "memory" => Self::Memory,
            _ => return None,
        })
    }
}

impl std::fmt::Display for BusName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_parse() {
        for bus in BusName::ALL {
            assert_eq!(BusName::parse(bus.as_str()), Some(bus));
        }
    }

    #[test]
    fn rejects_unknown_name() {
        assert_eq!(BusName::parse("bogus"), None);
    }

    #[test]
    fn memory_is_not_subscribable() {
        assert!(!BusName::SUBSCRIBABLE.contains(&BusName::Memory));
    }
}

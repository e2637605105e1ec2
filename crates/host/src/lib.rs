// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! pb-host: the plugin host runtime. Owns the plugin process lifecycle
//! (`plugin_host`), the fast-plane RPC transport and pending-request broker
//! (`ipc`), the handler registry (`registry`), the bus subscription
//! dispatcher (`dispatcher`), the request router (`router`), the Run
//! protocol and its WebSocket session (`run`, `ws`), and the top-level
//! `ControlPlane` that wires all of the above together (`control_plane`).
//! `bin/plugboardd.rs` (via `main.rs`) is the only consumer of this crate
//! that isn't a test.

use std::time::Duration;

pub mod control_plane;
pub mod dispatcher;
pub mod ipc;
pub mod plugin_host;
pub mod registry;
pub mod router;
pub mod run;
pub mod ws;

/// The subset of `pb_core::HostConfig`'s durations [`plugin_host::PluginHost`]
/// needs for its shutdown escalation (§4.1). Kept as its own small struct
/// rather than threading the whole `HostConfig` through, so a `PluginHost`
/// under test only has to construct the two fields it actually reads.
#[derive(Debug, Clone, Copy)]
pub struct HostTimeouts {
    pub plugin_shutdown_timeout: Duration,
    pub plugin_shutdown_total_timeout: Duration,
}

impl From<&pb_core::config::HostConfig> for HostTimeouts {
    fn from(cfg: &pb_core::config::HostConfig) -> Self {
        Self {
            plugin_shutdown_timeout: cfg.plugin_shutdown_timeout,
            plugin_shutdown_total_timeout: cfg.plugin_shutdown_total_timeout,
        }
    }
}

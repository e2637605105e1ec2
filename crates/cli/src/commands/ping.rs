// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pb ping` / `pb health` — smallest possible round trip to `plugboardd`.

use anyhow::Result;
use pb_wire::rpc::RpcOp;
use serde_json::Value;

use crate::client::FastPlaneClient;
use crate::output::{format_or_json, OutputFormat};

pub async fn handle_ping(client: &FastPlaneClient, format: OutputFormat) -> Result<()> {
    let result = client.call(RpcOp::Ping, Value::Null).await?;
    format_or_json(format, &result, |_| println!("pong"))
}

pub async fn handle_health(client: &FastPlaneClient, format: OutputFormat) -> Result<()> {
    let result = client.call(RpcOp::Health, Value::Null).await?;
    format_or_json(format, &result, |v| {
        let plugins = v["plugins"].as_array().cloned().unwrap_or_default();
        if plugins.is_empty() {
            println!("No plugins loaded");
            return;
        }
        for p in &plugins {
            let alive = p["alive"].as_bool().unwrap_or(false);
            println!(
                "{} {}",
                p["plugin_id"].as_str().unwrap_or("?"),
                if alive { "alive" } else { "not running" }
            );
        }
    })
}

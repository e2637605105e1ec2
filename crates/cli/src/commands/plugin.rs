// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pb plugin` — read-only views onto the plugin registry (`plugin.query`).

use anyhow::Result;
use clap::{Args, Subcommand};
use pb_wire::rpc::RpcOp;

use crate::client::FastPlaneClient;
use crate::color;
use crate::output::{handle_list, OutputFormat};

#[derive(Args)]
pub struct PluginArgs {
    #[command(subcommand)]
    pub command: PluginCommand,
}

#[derive(Subcommand)]
pub enum PluginCommand {
    /// List all registered plugins
    List {
        /// Only show this plugin id
        #[arg(long)]
        plugin_id: Option<String>,
    },
}

pub async fn handle(command: PluginCommand, client: &FastPlaneClient, format: OutputFormat) -> Result<()> {
    match command {
        PluginCommand::List { plugin_id } => {
            let args = serde_json::json!({ "plugin_id": plugin_id });
            let result = client.call(RpcOp::PluginQuery, args).await?;
            let plugins = result["plugins"].as_array().cloned().unwrap_or_default();
            handle_list(format, &plugins, "No plugins registered", |p| {
                let alive = p["alive"].as_bool().unwrap_or(false);
                let status = if alive { color::muted("alive") } else { "not running".to_string() };
                format!(
                    "{} {} v{} ({})",
                    p["plugin_id"].as_str().unwrap_or("?"),
                    p["name"].as_str().unwrap_or("?"),
                    p["version"].as_str().unwrap_or("?"),
                    status,
                )
            })
        }
    }
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pb run` — create, inspect, cancel, and read the export stream of a
//! tracked plugin invocation (SPEC_FULL.md §7 Run protocol).

use anyhow::Result;
use clap::{Args, Subcommand};
use pb_wire::rpc::RpcOp;

use crate::client::FastPlaneClient;
use crate::output::{format_or_json, handle_list, OutputFormat};

#[derive(Args)]
pub struct RunArgs {
    #[command(subcommand)]
    pub command: RunCommand,
}

#[derive(Subcommand)]
pub enum RunCommand {
    /// Create and queue a run
    Create {
        plugin_id: String,
        entry_id: String,
        /// Handler args as a JSON object
        #[arg(default_value = "{}")]
        args: String,
        #[arg(long)]
        task_id: Option<String>,
        #[arg(long)]
        trace_id: Option<String>,
        #[arg(long)]
        idempotency_key: Option<String>,
    },
    /// Show a run's current record
    Get { run_id: String },
    /// Request cancellation of a run
    Cancel { run_id: String },
    /// List a run's export items
    Export {
        run_id: String,
        #[arg(long)]
        after: Option<u64>,
        #[arg(long)]
        limit: Option<usize>,
    },
}

pub async fn handle(command: RunCommand, client: &FastPlaneClient, format: OutputFormat) -> Result<()> {
    match command {
        RunCommand::Create { plugin_id, entry_id, args, task_id, trace_id, idempotency_key } => {
            let handler_args: serde_json::Value =
                serde_json::from_str(&args).map_err(|e| anyhow::anyhow!("invalid JSON args: {e}"))?;
            let call_args = serde_json::json!({
                "plugin_id": plugin_id,
                "entry_id": entry_id,
                "args": handler_args,
                "task_id": task_id,
                "trace_id": trace_id,
                "idempotency_key": idempotency_key,
            });
            let result = client.call(RpcOp::RunCreate, call_args).await?;
            print_run(format, result)
        }
        RunCommand::Get { run_id } => {
            let result = client.call(RpcOp::RunGet, serde_json::json!({ "run_id": run_id })).await?;
            print_run(format, result)
        }
        RunCommand::Cancel { run_id } => {
            let result = client.call(RpcOp::RunCancel, serde_json::json!({ "run_id": run_id })).await?;
            print_run(format, result)
        }
        RunCommand::Export { run_id, after, limit } => {
            let call_args = serde_json::json!({ "run_id": run_id, "after": after, "limit": limit });
            let result = client.call(RpcOp::RunExportGet, call_args).await?;
            let items = result.as_array().cloned().unwrap_or_default();
            handle_list(format, &items, "No export items", |i| {
                format!("seq={} kind={}", i["seq"], i["kind"])
            })
        }
    }
}

fn print_run(format: OutputFormat, result: serde_json::Value) -> Result<()> {
    format_or_json(format, &result, |v| {
        println!(
            "run {} status={} plugin={} entry={}",
            v["run_id"].as_str().unwrap_or("?"),
            v["status"],
            v["plugin_id"].as_str().unwrap_or("?"),
            v["entry_id"].as_str().unwrap_or("?"),
        );
    })
}

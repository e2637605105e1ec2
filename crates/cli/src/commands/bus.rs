// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pb bus` — read/write access to the four topic stores over the fast
//! plane (`bus.get_recent`, `bus.get_since`, `bus.query`, `bus.publish`,
//! `bus.list_topics`, `bus.subscribe`, `bus.unsubscribe`).

use anyhow::Result;
use clap::{Args, Subcommand, ValueEnum};
use pb_core::ids::PluginId;
use pb_wire::rpc::RpcOp;

use crate::client::FastPlaneClient;
use crate::output::{format_or_json, handle_list, OutputFormat};

#[derive(Args)]
pub struct BusArgs {
    #[command(subcommand)]
    pub command: BusCommand,
}

/// Mirrors `pb_core::BusName`, kept as a separate clap-facing enum so this
/// crate doesn't need `pb-bus` as a dependency for one value type.
#[derive(Clone, Copy, ValueEnum)]
pub enum BusChoice {
    Messages,
    Events,
    Lifecycle,
    Runs,
    Export,
}

impl BusChoice {
    fn as_str(self) -> &'static str {
        match self {
            Self::Messages => "messages",
            Self::Events => "events",
            Self::Lifecycle => "lifecycle",
            Self::Runs => "runs",
            Self::Export => "export",
        }
    }
}

#[derive(Subcommand)]
pub enum BusCommand {
    /// Show the most recent events in a topic
    GetRecent {
        bus: BusChoice,
        topic: String,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show events published after a given sequence number
    GetSince {
        bus: BusChoice,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long, default_value_t = 0)]
        after_seq: u64,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Filter events across one topic by index fields
    Query {
        bus: BusChoice,
        #[arg(long)]
        topic: Option<String>,
        #[arg(long)]
        plugin_id: Option<String>,
        #[arg(long)]
        source: Option<String>,
        #[arg(long)]
        priority_min: Option<i64>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Publish a record onto a bus topic
    Publish {
        bus: BusChoice,
        topic: String,
        /// Payload as a JSON object
        payload: String,
    },
    /// List all known topics on a bus
    ListTopics { bus: BusChoice },
    /// Subscribe a plugin id to a bus's `add`/`del` deltas
    Subscribe {
        bus: BusChoice,
        /// The plugin id the subscription is registered for
        #[arg(long)]
        from_plugin: String,
        /// Change ops to deliver (default: add)
        #[arg(long, default_value = "add")]
        rules: Vec<String>,
        #[arg(long, default_value_t = 30.0)]
        timeout: f64,
    },
    /// Remove a subscription
    Unsubscribe {
        bus: BusChoice,
        sub_id: String,
        #[arg(long)]
        from_plugin: String,
    },
    /// Tombstone a record id on `messages`, `events`, or `lifecycle`
    Delete { bus: BusChoice, id: String },
}

pub async fn handle(command: BusCommand, client: &FastPlaneClient, format: OutputFormat) -> Result<()> {
    match command {
        BusCommand::GetRecent { bus, topic, limit } => {
            let args = serde_json::json!({ "bus": bus.as_str(), "topic": topic, "limit": limit });
            let result = client.call(RpcOp::BusGetRecent, args).await?;
            print_events(format, result)
        }
        BusCommand::GetSince { bus, topic, after_seq, limit } => {
            let args =
                serde_json::json!({ "bus": bus.as_str(), "topic": topic, "after_seq": after_seq, "limit": limit });
            let result = client.call(RpcOp::BusGetSince, args).await?;
            print_events(format, result)
        }
        BusCommand::Query { bus, topic, plugin_id, source, priority_min, limit } => {
            let args = serde_json::json!({
                "bus": bus.as_str(),
                "topic": topic,
                "plugin_id": plugin_id,
                "source": source,
                "priority_min": priority_min,
                "limit": limit,
            });
            let result = client.call(RpcOp::BusQuery, args).await?;
            print_events(format, result)
        }
        BusCommand::Publish { bus, topic, payload } => {
            let payload: serde_json::Value = serde_json::from_str(&payload)
                .map_err(|e| anyhow::anyhow!("invalid JSON payload: {e}"))?;
            let args = serde_json::json!({ "bus": bus.as_str(), "topic": topic, "payload": payload });
            let result = client.call(RpcOp::BusPublish, args).await?;
            format_or_json(format, &result, |v| {
                println!("published={} rev={}", v["published"], v["rev"]);
            })
        }
        BusCommand::ListTopics { bus } => {
            let args = serde_json::json!({ "bus": bus.as_str() });
            let result = client.call(RpcOp::BusListTopics, args).await?;
            let topics: Vec<String> =
                result["topics"].as_array().cloned().unwrap_or_default().iter().filter_map(|t| t.as_str().map(String::from)).collect();
            handle_list(format, &topics, "No topics", |t| t.clone())
        }
        BusCommand::Subscribe { bus, from_plugin, rules, timeout } => {
            let plugin_id = PluginId::from(from_plugin.as_str());
            let args = serde_json::json!({
                "bus": bus.as_str(),
                "rules": rules,
                "deliver": "delta",
                "timeout": timeout,
            });
            let result = client.call_as(RpcOp::BusSubscribe, args, Some(plugin_id)).await?;
            format_or_json(format, &result, |v| {
                println!("subscribed sub_id={} rev={}", v["sub_id"], v["rev"]);
            })
        }
        BusCommand::Unsubscribe { bus, sub_id, from_plugin } => {
            let plugin_id = PluginId::from(from_plugin.as_str());
            let args = serde_json::json!({ "bus": bus.as_str(), "sub_id": sub_id });
            let result = client.call_as(RpcOp::BusUnsubscribe, args, Some(plugin_id)).await?;
            format_or_json(format, &result, |_| println!("unsubscribed"))
        }
        BusCommand::Delete { bus, id } => {
            let op = match bus {
                BusChoice::Messages => RpcOp::MessageDel,
                BusChoice::Events => RpcOp::EventDel,
                BusChoice::Lifecycle => RpcOp::LifecycleDel,
                BusChoice::Runs | BusChoice::Export => {
                    anyhow::bail!("delete is only supported on messages, events, and lifecycle")
                }
            };
            let result = client.call(op, serde_json::json!({ "id": id })).await?;
            format_or_json(format, &result, |v| println!("deleted, rev={}", v["rev"]))
        }
    }
}

fn print_events(format: OutputFormat, result: serde_json::Value) -> Result<()> {
    let events = result.as_array().cloned().unwrap_or_default();
    handle_list(format, &events, "No events", |e| {
        format!(
            "seq={} ts={} topic={} index={}",
            e["seq"],
            e["ts"],
            e["topic"].as_str().unwrap_or("?"),
            e["index"],
        )
    })
}

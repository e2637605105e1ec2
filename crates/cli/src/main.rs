// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `pb`: the fast-plane CLI client for `plugboardd`. One TCP connection per
//! invocation (`client.rs`), one request, one response — there is no
//! persistent daemon session to manage, unlike the teacher's Unix-socket
//! `DaemonClient`.

mod client;
mod color;
mod commands;
mod exit_error;
mod output;

use clap::{Parser, Subcommand};

use client::FastPlaneClient;
use commands::bus::BusArgs;
use commands::plugin::PluginArgs;
use commands::run::RunArgs;
use exit_error::ExitError;
use output::OutputFormat;

#[derive(Parser)]
#[command(
    name = "pb",
    version = concat!(env!("CARGO_PKG_VERSION"), "+", env!("BUILD_GIT_HASH")),
    about = "plugboard fast-plane CLI",
    styles = color::styles()
)]
struct Cli {
    /// `host:port` of the running `plugboardd` fast-plane listener
    #[arg(long, global = true, default_value = "127.0.0.1:7420")]
    addr: String,
    /// Output format
    #[arg(long, global = true, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Round-trip the fast plane
    Ping,
    /// Report plugin liveness
    Health,
    /// Inspect the plugin registry
    Plugin(PluginArgs),
    /// Read and write the bus stores
    Bus(BusArgs),
    /// Create, inspect, and cancel runs
    Run(RunArgs),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let client = FastPlaneClient::new(cli.addr);

    let result = match cli.command {
        Command::Ping => commands::ping::handle_ping(&client, cli.format).await,
        Command::Health => commands::ping::handle_health(&client, cli.format).await,
        Command::Plugin(PluginArgs { command }) => commands::plugin::handle(command, &client, cli.format).await,
        Command::Bus(BusArgs { command }) => commands::bus::handle(command, &client, cli.format).await,
        Command::Run(RunArgs { command }) => commands::run::handle(command, &client, cli.format).await,
    };

    if let Err(e) = result {
        let exit_err = match e.downcast::<client::ClientError>() {
            Ok(client::ClientError::Rpc { code, message }) => ExitError::from_rpc(&code, message),
            Ok(other) => ExitError::new(1, other.to_string()),
            Err(e) => ExitError::new(1, e.to_string()),
        };
        eprintln!("error: {exit_err}");
        std::process::exit(exit_err.code);
    }
}

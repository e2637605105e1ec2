// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `plugboardd`: the host process binary. Loads `HostConfig` from the
//! environment, wires a [`pb_host::control_plane::ControlPlane`], scans
//! `plugins_dir` for manifests and spawns each one, then serves the
//! fast-plane RPC listener and the `/ws/run` WebSocket listener until a
//! signal asks for a graceful shutdown.

use std::sync::Arc;

use pb_adapters::process::OsProcessAdapter;
use pb_adapters::queues::TransportSide;
use pb_core::manifest::PluginManifest;
use pb_core::{Clock, HostConfig, SystemClock};
use pb_host::control_plane::ControlPlane;
use pb_host::ipc::fast_plane;
use pb_storage::snapshot::FileCheckpointBackend;
use pb_storage::RunStore;
use tokio::net::TcpListener;

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Scans `cfg.plugins_dir` for `*.toml` manifests, loads and starts each
/// one. A plugin that fails to load or spawn is logged and skipped — one
/// bad manifest must not take the whole host down.
async fn load_plugins(
    control_plane: &Arc<ControlPlane<OsProcessAdapter, SystemClock>>,
    cfg: &HostConfig,
) -> Vec<TransportSide> {
    let mut transports = Vec::new();
    let entries = match std::fs::read_dir(&cfg.plugins_dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::info!(dir = %cfg.plugins_dir.display(), error = %e, "no plugins directory to scan");
            return transports;
        }
    };

    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("toml") {
            continue;
        }
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to read plugin manifest");
                continue;
            }
        };
        let manifest: PluginManifest = match toml::from_str(&raw) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to parse plugin manifest");
                continue;
            }
        };
        let plugin_id = match control_plane.load_plugin(&manifest) {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "plugin rejected at load time");
                continue;
            }
        };
        let entry_point = path.parent().unwrap_or(&cfg.plugins_dir).join(&manifest.plugin.entry);
        let spec = pb_adapters::ProcessSpec {
            plugin_id,
            entry_point,
            config_path: None,
            env: Vec::new(),
            log_dir: None,
        };
        match control_plane.start_plugin(plugin_id, spec).await {
            Ok(transport) => {
                tracing::info!(%plugin_id, path = %path.display(), "plugin started");
                transports.push(transport);
            }
            Err(e) => {
                tracing::warn!(%plugin_id, error = %e, "failed to start plugin");
            }
        }
    }
    transports
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(sig) => sig,
            Err(e) => {
                tracing::warn!(error = %e, "failed to install SIGTERM handler, relying on ctrl-c only");
                let _ = ctrl_c.await;
                return;
            }
        };
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();
    let cfg = Arc::new(HostConfig::from_env());
    std::fs::create_dir_all(&cfg.state_dir)?;

    let adapter = Arc::new(OsProcessAdapter);
    let clock = SystemClock;
    let checkpoints: Arc<dyn pb_adapters::CheckpointBackend> =
        Arc::new(FileCheckpointBackend::new(cfg.state_dir.join("checkpoints")));
    let buses = Arc::new(pb_bus::BusRegistry::new(10_000, 64 * 1024 * 1024));
    let run_store = Arc::new(RunStore::new(cfg.state_dir.join("runs")));

    let control_plane =
        ControlPlane::new(cfg.clone(), adapter, clock, checkpoints, buses.clone(), run_store.clone());
    control_plane.spawn_background_tasks();

    // Kept alive for the daemon's lifetime: dropping a plugin's TransportSide
    // closes every channel its PluginHost depends on (see `control_plane`'s
    // module docs). A real stdio-framing bridge consuming these is out of
    // this core's scope.
    let _transports = load_plugins(&control_plane, &cfg).await;

    let fast_plane_listener = TcpListener::bind(&cfg.fast_plane_bind).await?;
    tracing::info!(addr = %cfg.fast_plane_bind, "fast-plane listener bound");
    let router = control_plane.router();
    let fast_plane_task = tokio::spawn(async move {
        loop {
            let (stream, peer) = match fast_plane_listener.accept().await {
                Ok(pair) => pair,
                Err(e) => {
                    tracing::warn!(error = %e, "fast-plane listener accept failed");
                    continue;
                }
            };
            let router = router.clone();
            tokio::spawn(async move {
                if let Err(e) = fast_plane::serve(stream, router).await {
                    tracing::info!(%peer, error = %e, "fast-plane connection ended");
                }
            });
        }
    });

    let ws_listener = TcpListener::bind(&cfg.ws_bind).await?;
    tracing::info!(addr = %cfg.ws_bind, "ws/run listener bound");
    let ws_task = tokio::spawn(pb_host::ws::accept_loop(ws_listener, control_plane.runs(), buses.clone()));

    shutdown_signal().await;
    tracing::info!("shutdown requested, draining plugins");
    fast_plane_task.abort();
    ws_task.abort();
    control_plane.shutdown_all(cfg.shutdown_timeout).await;
    Ok(())
}

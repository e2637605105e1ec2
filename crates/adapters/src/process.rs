// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Plugin child-process adapter: spawn, terminate, kill (spec §4.1, §6
//! "Child process contract"). Generalized from the teacher's
//! `AgentAdapter` trait (coop sidecar spawn/reconnect/kill) to a plugin
//! binary communicating over stdio-backed queues instead of a Unix socket.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use pb_core::ids::PluginId;
use thiserror::Error;
use tokio::process::{Child, Command};

/// Default directory plugin stderr logs land in when a plugin process
/// isn't given an explicit `log_dir`.
pub fn default_state_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local/state")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("plugboard")
}

#[derive(Debug, Clone)]
pub struct ProcessSpec {
    pub plugin_id: PluginId,
    /// Path to the compiled plugin entry point (manifest `plugin.entry`).
    pub entry_point: PathBuf,
    /// Path to the plugin's config file, passed as an argument.
    pub config_path: Option<PathBuf>,
    pub env: Vec<(String, String)>,
    /// Directory stderr is redirected into, one file per plugin id.
    /// Defaults to [`default_state_dir`] when `None`.
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn plugin process: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("failed to signal plugin process: {0}")]
    Signal(#[source] std::io::Error),
    #[error("wait on plugin process failed: {0}")]
    Wait(#[source] std::io::Error),
}

/// Outcome of a process that has exited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn is_clean(&self) -> bool {
        self.code == Some(0)
    }
}

/// A live plugin child process. The host MUST NOT keep any blocking
/// joiner around this handle past shutdown (spec invariant 4); `kill`
/// and `terminate` are both non-blocking signal sends, `wait` is the only
/// method that suspends, and only the shutdown sequence calls it with an
/// explicit deadline.
#[async_trait]
pub trait ProcessAdapter: Send + Sync {
    type Handle: Send + Sync;

    async fn spawn(&self, spec: &ProcessSpec) -> Result<Self::Handle, ProcessError>;

    /// Ask the process to exit. Does not wait; pair with `wait` under a
    /// deadline.
    async fn terminate(&self, handle: &mut Self::Handle) -> Result<(), ProcessError>;

    /// Force-kill the process. Does not wait.
    async fn kill(&self, handle: &mut Self::Handle) -> Result<(), ProcessError>;

    /// Block until the process exits or `timeout` elapses.
    async fn wait(&self, handle: &mut Self::Handle, timeout: std::time::Duration) -> Option<ExitOutcome>;

    fn pid(&self, handle: &Self::Handle) -> Option<u32>;
}

/// Real adapter: spawns an actual OS child process.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsProcessAdapter;

pub struct OsChildHandle {
    child: Child,
}

#[async_trait]
impl ProcessAdapter for OsProcessAdapter {
    type Handle = OsChildHandle;

    async fn spawn(&self, spec: &ProcessSpec) -> Result<Self::Handle, ProcessError> {
        let mut cmd = Command::new(&spec.entry_point);
        if let Some(config) = &spec.config_path {
            cmd.arg("--config").arg(config);
        }
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }
        let log_dir = spec.log_dir.clone().unwrap_or_else(default_state_dir);
        std::fs::create_dir_all(&log_dir).map_err(ProcessError::Spawn)?;
        let log_file = std::fs::File::create(log_dir.join(format!("{}.log", spec.plugin_id)))
            .map_err(ProcessError::Spawn)?;
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::from(log_file));
        cmd.kill_on_drop(false);
        let child = cmd.spawn().map_err(ProcessError::Spawn)?;
        Ok(OsChildHandle { child })
    }

    // Graceful shutdown is requested over `queues::CommandKind::Shutdown`
    // first; `terminate`/`kill` are both OS-level escalations for a plugin
    // that doesn't respond. This workspace doesn't depend on `nix`, so
    // there's no portable SIGTERM-without-SIGKILL available — both
    // escalations end the process the same way.
    async fn terminate(&self, handle: &mut Self::Handle) -> Result<(), ProcessError> {
        handle.child.start_kill().map_err(ProcessError::Signal)
    }

    async fn kill(&self, handle: &mut Self::Handle) -> Result<(), ProcessError> {
        handle.child.start_kill().map_err(ProcessError::Signal)
    }

    async fn wait(&self, handle: &mut Self::Handle, timeout: std::time::Duration) -> Option<ExitOutcome> {
        match tokio::time::timeout(timeout, handle.child.wait()).await {
            Ok(Ok(status)) => Some(ExitOutcome { code: status.code() }),
            Ok(Err(_)) | Err(_) => None,
        }
    }

    fn pid(&self, handle: &Self::Handle) -> Option<u32> {
        handle.child.id()
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fake {
    //! Fake process adapter used by `pb-host`'s tests to exercise the
    //! full child-runtime contract (status handshake, command dispatch,
    //! shutdown sequence) without spawning a real binary.

    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;

    pub struct FakeHandle {
        pub terminated: Arc<AtomicBool>,
        pub killed: Arc<AtomicBool>,
        pub exit_code: Arc<AtomicU32>,
        pub has_exited: Arc<AtomicBool>,
    }

    #[derive(Default, Clone)]
    pub struct FakeProcessAdapter {
        /// If set, `wait` reports exit with this code immediately.
        pub immediate_exit_code: Option<i32>,
    }

    #[async_trait]
    impl ProcessAdapter for FakeProcessAdapter {
        type Handle = FakeHandle;

        async fn spawn(&self, _spec: &ProcessSpec) -> Result<Self::Handle, ProcessError> {
            Ok(FakeHandle {
                terminated: Arc::new(AtomicBool::new(false)),
                killed: Arc::new(AtomicBool::new(false)),
                exit_code: Arc::new(AtomicU32::new(self.immediate_exit_code.unwrap_or(-1) as u32)),
                has_exited: Arc::new(AtomicBool::new(self.immediate_exit_code.is_some())),
            })
        }

        async fn terminate(&self, handle: &mut Self::Handle) -> Result<(), ProcessError> {
            handle.terminated.store(true, Ordering::SeqCst);
            handle.has_exited.store(true, Ordering::SeqCst);
            handle.exit_code.store(0, Ordering::SeqCst);
            Ok(())
        }

        async fn kill(&self, handle: &mut Self::Handle) -> Result<(), ProcessError> {
            handle.killed.store(true, Ordering::SeqCst);
            handle.has_exited.store(true, Ordering::SeqCst);
            handle.exit_code.store(137, Ordering::SeqCst);
            Ok(())
        }

        async fn wait(&self, handle: &mut Self::Handle, _timeout: std::time::Duration) -> Option<ExitOutcome> {
            if handle.has_exited.load(Ordering::SeqCst) {
                Some(ExitOutcome { code: Some(handle.exit_code.load(Ordering::SeqCst) as i32) })
            } else {
                None
            }
        }

        fn pid(&self, _handle: &Self::Handle) -> Option<u32> {
            Some(1)
        }
    }
}

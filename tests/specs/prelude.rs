//! Shared test harness: spawn a real `plugboardd`, talk to it with a real
//! `pb` invocation per call, tear the daemon down on drop.

#![allow(dead_code)]

use std::net::TcpListener;
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};

use assert_cmd::cargo::CommandCargoExt;
use tempfile::TempDir;

/// How long a spec is willing to poll for an async condition before giving up.
pub const SPEC_WAIT_MAX_MS: u64 = 5_000;

/// Poll `cond` every 20ms until it returns `true` or `max_ms` elapses.
pub fn wait_for(max_ms: u64, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_millis(max_ms);
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
}

fn find_free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0").expect("bind ephemeral port").local_addr().unwrap().port()
}

/// A running `plugboardd` with an empty plugins directory, bound to
/// ephemeral ports. Killed on drop.
pub struct Daemon {
    child: Child,
    pub fast_plane_addr: String,
    _state_dir: TempDir,
}

impl Daemon {
    /// Spawns `plugboardd`, waits until it answers `pb ping`, and returns.
    pub fn start() -> Self {
        let state_dir = TempDir::new().expect("tempdir");
        std::fs::create_dir_all(state_dir.path().join("plugins")).unwrap();

        let fast_plane_addr = format!("127.0.0.1:{}", find_free_port());
        let ws_addr = format!("127.0.0.1:{}", find_free_port());

        let child = Command::cargo_bin("plugboardd")
            .expect("locate plugboardd binary")
            .env("PLUGBOARD_FAST_PLANE_BIND", &fast_plane_addr)
            .env("PLUGBOARD_WS_BIND", &ws_addr)
            .env("PLUGBOARD_STATE_DIR", state_dir.path())
            .env("PLUGBOARD_PLUGINS_DIR", state_dir.path().join("plugins"))
            .env("RUST_LOG", "warn")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn plugboardd");

        let daemon = Self { child, fast_plane_addr, _state_dir: state_dir };

        let ready = wait_for(SPEC_WAIT_MAX_MS, || daemon.cli().arg("ping").output().map(|o| o.status.success()).unwrap_or(false));
        assert!(ready, "plugboardd did not become ready in time");
        daemon
    }

    /// A fresh `pb` invocation pointed at this daemon's fast-plane address.
    pub fn cli(&self) -> Command {
        let mut cmd = Command::cargo_bin("pb").expect("locate pb binary");
        cmd.arg("--addr").arg(&self.fast_plane_addr);
        cmd
    }
}

impl Drop for Daemon {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Runs `cmd`, asserts it exited 0, and returns captured stdout as a `String`.
pub fn run_ok(mut cmd: Command) -> String {
    let output = cmd.output().expect("run pb");
    assert!(
        output.status.success(),
        "pb exited non-zero: stdout={} stderr={}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr),
    );
    String::from_utf8(output.stdout).expect("utf8 stdout")
}

/// Runs `cmd`, asserts it exited non-zero, and returns captured stderr.
pub fn run_err(mut cmd: Command) -> String {
    let output = cmd.output().expect("run pb");
    assert!(!output.status.success(), "expected pb to fail but it succeeded");
    String::from_utf8(output.stderr).expect("utf8 stderr")
}

// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end agent smoke tests.
//!
//! Spawns the real `vigil` binary against a scratch config: temp
//! storage, temp socket, a fake proc tree, and a docker socket path
//! that points nowhere (the agent must degrade, not die).

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::Duration;

/// Resolve the path to the compiled `vigil` binary.
pub fn vigil_binary() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    // tests/specs → tests → workspace root
    let workspace = manifest.parent().and_then(|p| p.parent()).unwrap_or(manifest);
    workspace.join("target").join("debug").join("vigil")
}

/// A running `vigil agent` that is killed on drop.
pub struct AgentProcess {
    child: Child,
    socket: PathBuf,
    dir: tempfile::TempDir,
}

impl AgentProcess {
    /// Spawn the agent with a 1s collect interval and the given extra
    /// TOML appended to the scratch config.
    pub fn start(extra_toml: &str) -> anyhow::Result<Self> {
        let binary = vigil_binary();
        anyhow::ensure!(binary.exists(), "vigil binary not found at {}", binary.display());

        let dir = tempfile::tempdir()?;
        let proc_root = dir.path().join("proc");
        write_fake_proc(&proc_root)?;
        let sys_root = dir.path().join("sys");
        std::fs::create_dir_all(sys_root.join("class/net/eth0/device"))?;

        let socket = dir.path().join("vigil.sock");
        let config_path = dir.path().join("config.toml");
        let config = format!(
            r#"
[storage]
path = "{storage}"

[socket]
path = "{socket}"

[host]
proc = "{proc}"
sys = "{sys}"

[docker]
socket = "{docker}"

[collect]
interval = "1s"

{extra_toml}
"#,
            storage = dir.path().join("vigil.db").display(),
            socket = socket.display(),
            proc = proc_root.display(),
            sys = sys_root.display(),
            docker = dir.path().join("docker.sock").display(),
        );
        std::fs::write(&config_path, config)?;

        let child = Command::new(&binary)
            .args(["agent", "--config"])
            .arg(&config_path)
            .env("VIGIL_LOG_LEVEL", "debug")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()?;

        Ok(Self { child, socket, dir })
    }

    pub fn socket(&self) -> &Path {
        &self.socket
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Wait until the agent's socket accepts connections.
    pub async fn wait_ready(&self, timeout: Duration) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if tokio::net::UnixStream::connect(&self.socket).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("agent socket never became ready");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    /// Deliver SIGTERM and wait for a clean exit.
    pub async fn terminate(mut self, timeout: Duration) -> anyhow::Result<std::process::ExitStatus> {
        let status = Command::new("kill")
            .args(["-TERM", &self.child.id().to_string()])
            .status()?;
        anyhow::ensure!(status.success(), "kill -TERM failed");

        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(status);
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("agent did not exit after SIGTERM");
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// A minimal but parseable /proc tree.
fn write_fake_proc(root: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(root.join("net"))?;
    std::fs::write(
        root.join("stat"),
        "cpu  100 0 50 800 50 0 0 0 0 0\ncpu0 50 0 25 425 25 0 0 0\ncpu1 50 0 25 425 25 0 0 0\n",
    )?;
    std::fs::write(
        root.join("meminfo"),
        "MemTotal:       8000 kB\nMemFree:        2000 kB\nMemAvailable:   4000 kB\nCached:         1000 kB\nSwapTotal:      1000 kB\nSwapFree:        600 kB\n",
    )?;
    std::fs::write(root.join("loadavg"), "0.52 0.58 0.59 1/467 12345\n")?;
    std::fs::write(root.join("uptime"), "12345.67 23456.78\n")?;
    std::fs::write(
        root.join("net/dev"),
        "Inter-|   Receive                                                |  Transmit\n face |bytes    packets errs drop fifo frame compressed multicast|bytes    packets errs drop fifo colls carrier compressed\n  eth0:    1000      10    1    0    0     0          0         0     2000      20    2    0    0     0       0          0\n",
    )?;
    std::fs::write(root.join("mounts"), "")?;
    Ok(())
}

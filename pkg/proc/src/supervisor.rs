//! Daemon process supervision.
//!
//! A daemon is launched as `<binary> daemon --type=<kind> -- <flags>`. The
//! launch mode is chosen by flags, not by executable: argv containing
//! `--foreground` is a long-lived supervised daemon, anything else (e.g.
//! `--mkfs`) runs to completion.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use pkg_constants::osd::STOP_GRACE_SECS;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

/// How a daemon invocation is run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaunchMode {
    /// Short-lived initialization; waits for exit.
    Run,
    /// Long-lived daemon; returns once spawned.
    Foreground,
}

impl LaunchMode {
    pub fn from_args(argv: &[String]) -> Self {
        if argv.iter().any(|a| a == "--foreground") {
            LaunchMode::Foreground
        } else {
            LaunchMode::Run
        }
    }
}

/// Handle to a launched daemon, used to stop it later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub id: u64,
    /// OS pid, if a real process was spawned and is being supervised.
    pub pid: Option<u32>,
    pub mode: LaunchMode,
    pub argv: Vec<String>,
    pub started_at: DateTime<Utc>,
}

#[async_trait]
pub trait ProcessSupervisor: Send + Sync {
    async fn launch(&self, argv: &[String]) -> Result<ProcessHandle>;

    async fn stop(&self, handle: &ProcessHandle) -> Result<()>;
}

pub type BoxedSupervisor = Arc<dyn ProcessSupervisor>;

/// Supervisor action passed to a trap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrapAction {
    Run,
    Start,
    Stop,
}

impl std::fmt::Display for TrapAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrapAction::Run => write!(f, "run"),
            TrapAction::Start => write!(f, "start"),
            TrapAction::Stop => write!(f, "stop"),
        }
    }
}

/// Intercepts supervisor actions instead of touching the OS.
pub type Trap = dyn Fn(TrapAction, &[String]) -> Result<()> + Send + Sync;

/// Process manager that spawns daemons with `tokio::process`.
///
/// Long-lived children are kept in a `DashMap` keyed by handle id so that
/// `stop` can signal and reap them.
pub struct ProcManager {
    next_id: AtomicU64,
    children: DashMap<u64, tokio::process::Child>,
    trap: Option<Arc<Trap>>,
    stop_grace: Duration,
}

impl ProcManager {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            children: DashMap::new(),
            trap: None,
            stop_grace: Duration::from_secs(STOP_GRACE_SECS),
        }
    }

    /// A process manager whose actions are all routed to `trap`.
    pub fn with_trap(
        trap: impl Fn(TrapAction, &[String]) -> Result<()> + Send + Sync + 'static,
    ) -> Self {
        Self {
            trap: Some(Arc::new(trap)),
            ..Self::new()
        }
    }

    pub fn stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Number of supervised long-lived children.
    pub fn running(&self) -> usize {
        self.children.len()
    }

    async fn run_to_completion(&self, argv: &[String]) -> Result<Option<u32>> {
        let output = tokio::process::Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("failed to run {}: {}", argv[0], e))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "{} exited with {}: {}",
                argv.join(" "),
                output.status,
                stderr.trim()
            );
        }
        Ok(None)
    }

    fn spawn(&self, id: u64, argv: &[String]) -> Result<Option<u32>> {
        let child = tokio::process::Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(std::process::Stdio::null())
            .spawn()
            .map_err(|e| anyhow::anyhow!("failed to start {}: {}", argv[0], e))?;
        let pid = child.id();
        self.children.insert(id, child);
        Ok(pid)
    }
}

impl Default for ProcManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessSupervisor for ProcManager {
    async fn launch(&self, argv: &[String]) -> Result<ProcessHandle> {
        if argv.is_empty() {
            anyhow::bail!("cannot launch an empty command");
        }
        let mode = LaunchMode::from_args(argv);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);

        let pid = match &self.trap {
            Some(trap) => {
                let action = match mode {
                    LaunchMode::Run => TrapAction::Run,
                    LaunchMode::Foreground => TrapAction::Start,
                };
                trap(action, argv)?;
                None
            }
            None => {
                info!("Launching ({:?}): {}", mode, argv.join(" "));
                match mode {
                    LaunchMode::Run => self.run_to_completion(argv).await?,
                    LaunchMode::Foreground => self.spawn(id, argv)?,
                }
            }
        };

        Ok(ProcessHandle {
            id,
            pid,
            mode,
            argv: argv.to_vec(),
            started_at: Utc::now(),
        })
    }

    async fn stop(&self, handle: &ProcessHandle) -> Result<()> {
        if let Some(trap) = &self.trap {
            return trap(TrapAction::Stop, &handle.argv);
        }

        let Some((_, mut child)) = self.children.remove(&handle.id) else {
            // Never supervised or already reaped
            return Ok(());
        };

        if let Some(pid) = child.id() {
            info!("Stopping process {} (pid {})", handle.id, pid);
            match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
                Ok(()) | Err(Errno::ESRCH) => {}
                Err(e) => warn!("SIGTERM to pid {} failed: {}", pid, e),
            }
        }

        match tokio::time::timeout(self.stop_grace, child.wait()).await {
            Ok(status) => {
                let status = status?;
                info!("Process {} exited with {}", handle.id, status);
            }
            Err(_) => {
                warn!(
                    "Process {} did not exit within {}s, killing",
                    handle.id,
                    self.stop_grace.as_secs()
                );
                child.kill().await?;
            }
        }
        Ok(())
    }
}

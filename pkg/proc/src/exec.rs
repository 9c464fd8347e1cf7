use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info};

/// Runs administrative shell commands (format, mount, chown, probe).
///
/// `label` is a human-readable tag used for log correlation only.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Run a command to completion, failing on a non-zero exit.
    async fn execute(&self, label: &str, command: &str, args: &[&str]) -> Result<()>;

    /// Run a command to completion and return its stdout.
    async fn execute_with_output(&self, label: &str, command: &str, args: &[&str])
    -> Result<String>;
}

pub type BoxedExecutor = Arc<dyn Executor>;

/// Executor that spawns real subprocesses on the host.
#[derive(Debug, Clone, Default)]
pub struct HostExecutor;

impl HostExecutor {
    pub fn new() -> Self {
        Self
    }

    async fn run(&self, label: &str, command: &str, args: &[&str]) -> Result<String> {
        info!("[{}] running: {} {}", label, command, args.join(" "));
        let output = tokio::process::Command::new(command)
            .args(args)
            .stdin(std::process::Stdio::null())
            .output()
            .await
            .map_err(|e| anyhow::anyhow!("[{}] failed to start {}: {}", label, command, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!(
                "[{}] {} {} failed ({}): {}",
                label,
                command,
                args.join(" "),
                output.status,
                stderr.trim()
            );
        }
        if !stdout.is_empty() {
            debug!("[{}] stdout: {}", label, stdout.trim());
        }
        Ok(stdout)
    }
}

#[async_trait]
impl Executor for HostExecutor {
    async fn execute(&self, label: &str, command: &str, args: &[&str]) -> Result<()> {
        self.run(label, command, args).await.map(|_| ())
    }

    async fn execute_with_output(
        &self,
        label: &str,
        command: &str,
        args: &[&str],
    ) -> Result<String> {
        self.run(label, command, args).await
    }
}

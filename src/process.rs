//! Process spawning and lifecycle primitives for vLLM server children

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;

/// Everything needed to launch one vLLM server process.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub gpu_id: String,
    pub binary_path: String,
    pub config_path: PathBuf,
    pub port: u16,
    pub model: String,
}

/// Supervisor-side record of a launched process.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
    /// Key into the process manager's child table.
    pub(crate) key: String,
    pub gpu_id: String,
    pub pid: u32,
    pub launched_at: chrono::DateTime<chrono::Utc>,
}

/// Outcome of a non-blocking liveness poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// Exit code is absent when the process died to a signal and the
    /// platform reports no code.
    Exited(Option<i32>),
}

/// Trait for managing vLLM server process lifecycle.
#[async_trait]
pub trait ProcessManager: Send + Sync {
    /// Spawn a new server process. Returns as soon as the process is
    /// launched; model loading happens inside the child.
    async fn spawn(&self, spec: SpawnSpec) -> Result<ProcessHandle>;

    /// Non-blocking exit poll. The child is reaped on first observation of
    /// exit; subsequent polls for the same handle report `Exited(None)`.
    async fn try_wait(&self, handle: &ProcessHandle) -> Result<ProcessState>;

    /// Stop a process: graceful signal first, forced kill after `grace`.
    /// Blocks until exit is confirmed.
    async fn stop(&self, handle: ProcessHandle, grace: Duration) -> Result<()>;
}

// ============================================================================
// Production implementation
// ============================================================================

/// Production process manager using tokio::process.
pub struct SystemProcessManager {
    children: Arc<RwLock<HashMap<String, Child>>>,
}

impl SystemProcessManager {
    pub fn new() -> Self {
        Self {
            children: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn log_dir() -> Result<PathBuf> {
        let dir = std::env::var("VLLM_FLEET_LOG_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/log/vllm-fleet"));

        if let Err(e) = std::fs::create_dir_all(&dir) {
            tracing::warn!(
                error = %e,
                attempted_dir = %dir.display(),
                "Failed to create log directory, falling back to /tmp/vllm-fleet/logs"
            );
            let fallback = PathBuf::from("/tmp/vllm-fleet/logs");
            std::fs::create_dir_all(&fallback)
                .context("Failed to create fallback log directory")?;
            return Ok(fallback);
        }

        Ok(dir)
    }
}

impl Default for SystemProcessManager {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessManager for SystemProcessManager {
    async fn spawn(&self, spec: SpawnSpec) -> Result<ProcessHandle> {
        let mut cmd = Command::new(&spec.binary_path);

        cmd.arg("--gpu").arg(&spec.gpu_id);
        cmd.arg("--config").arg(&spec.config_path);

        // Pin the child to its accelerator
        cmd.env("CUDA_VISIBLE_DEVICES", &spec.gpu_id);

        let log_dir = Self::log_dir()?;
        let log_path = log_dir.join(format!("gpu-{}.log", spec.gpu_id));
        let log_file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_path)
            .with_context(|| format!("Failed to open log file: {:?}", log_path))?;

        let stdout_file = log_file
            .try_clone()
            .context("Failed to clone log file for stdout")?;
        let stderr_file = log_file
            .try_clone()
            .context("Failed to clone log file for stderr")?;

        // No kill_on_drop: a spawned server must outlive short CLI
        // invocations. stop() is the only kill path.
        let child = cmd
            .stdout(stdout_file)
            .stderr(stderr_file)
            .spawn()
            .with_context(|| format!("Failed to spawn vLLM server for GPU {}", spec.gpu_id))?;

        let pid = child.id().context("Failed to get PID")?;
        let key = format!("process_{pid}");

        tracing::info!(
            gpu = %spec.gpu_id,
            model = %spec.model,
            port = spec.port,
            pid = pid,
            "vLLM server process spawned"
        );

        let handle = ProcessHandle {
            key: key.clone(),
            gpu_id: spec.gpu_id,
            pid,
            launched_at: chrono::Utc::now(),
        };

        self.children.write().await.insert(key, child);

        Ok(handle)
    }

    async fn try_wait(&self, handle: &ProcessHandle) -> Result<ProcessState> {
        let mut children = self.children.write().await;

        let Some(child) = children.get_mut(&handle.key) else {
            // Already reaped
            return Ok(ProcessState::Exited(None));
        };

        match child.try_wait().context("Failed to poll child process")? {
            None => Ok(ProcessState::Running),
            Some(status) => {
                children.remove(&handle.key);
                Ok(ProcessState::Exited(exit_code(status)))
            }
        }
    }

    async fn stop(&self, handle: ProcessHandle, grace: Duration) -> Result<()> {
        let mut children = self.children.write().await;

        let Some(mut child) = children.remove(&handle.key) else {
            // Already exited and reaped
            return Ok(());
        };
        drop(children);

        if let Some(pid) = child.id() {
            #[cfg(unix)]
            {
                use nix::sys::signal::{Signal, kill};
                use nix::unistd::Pid;

                let pid = Pid::from_raw(pid as i32);
                let _ = kill(pid, Signal::SIGTERM);

                tokio::select! {
                    _ = child.wait() => {
                        tracing::info!(gpu = %handle.gpu_id, "Process stopped gracefully");
                    }
                    _ = tokio::time::sleep(grace) => {
                        tracing::warn!(
                            gpu = %handle.gpu_id,
                            grace_secs = grace.as_secs(),
                            "Graceful shutdown timeout, sending SIGKILL"
                        );
                        let _ = kill(pid, Signal::SIGKILL);
                        let _ = child.wait().await;
                    }
                }
            }

            #[cfg(not(unix))]
            {
                let _ = child.kill().await;
            }
        }

        Ok(())
    }
}

#[cfg(unix)]
fn exit_code(status: std::process::ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.code().or_else(|| status.signal().map(|s| -s))
}

#[cfg(not(unix))]
fn exit_code(status: std::process::ExitStatus) -> Option<i32> {
    status.code()
}

// ============================================================================
// Mock implementation for testing
// ============================================================================

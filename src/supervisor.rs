//! Fleet supervisor: owns the GPU-to-process mapping and its lifecycle

use crate::config::FleetConfig;
use crate::process::{ProcessHandle, ProcessManager, ProcessState, SpawnSpec, SystemProcessManager};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::RwLock;

/// Grace window between SIGTERM and SIGKILL on stop.
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between launches in `start_all` and between stop and start in
/// `restart`, so instances don't compete for scarce hardware at boot.
const LAUNCH_DELAY: Duration = Duration::from_secs(2);

fn default_server_binary() -> String {
    std::env::var("VLLM_FLEET_SERVER_BIN").unwrap_or_else(|_| "vllm-server".to_string())
}

/// Lifecycle state of one configured instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum InstanceState {
    NotStarted,
    Running { pid: u32 },
    Stopped { exit_code: Option<i32> },
}

/// Per-instance row of a `status()` report.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceReport {
    pub gpu_id: String,
    #[serde(flatten)]
    pub state: InstanceState,
    pub port: u16,
    pub model: String,
    pub description: String,
}

impl InstanceReport {
    pub fn is_running(&self) -> bool {
        matches!(self.state, InstanceState::Running { .. })
    }
}

/// Supervises one vLLM server process per configured GPU.
///
/// The handle map is the mutual-exclusion point: presence of an entry means
/// a launch was recorded and not yet confirmed dead. All mutation goes
/// through this one lock.
pub struct Supervisor {
    config: FleetConfig,
    config_path: PathBuf,
    server_binary: String,
    manager: Arc<dyn ProcessManager>,
    handles: RwLock<HashMap<String, ProcessHandle>>,
    shutting_down: AtomicBool,
    launch_delay: Duration,
}

impl Supervisor {
    pub fn new(config: FleetConfig, config_path: impl Into<PathBuf>) -> Self {
        Self::with_manager(config, config_path, Arc::new(SystemProcessManager::new()))
    }

    /// Construct with a custom process manager (tests).
    pub fn with_manager(
        config: FleetConfig,
        config_path: impl Into<PathBuf>,
        manager: Arc<dyn ProcessManager>,
    ) -> Self {
        Self {
            config,
            config_path: config_path.into(),
            server_binary: default_server_binary(),
            manager,
            handles: RwLock::new(HashMap::new()),
            shutting_down: AtomicBool::new(false),
            launch_delay: LAUNCH_DELAY,
        }
    }

    /// Override the inter-launch delay (tests).
    pub fn with_launch_delay(mut self, delay: Duration) -> Self {
        self.launch_delay = delay;
        self
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Launch the server for one GPU. Returns false (and logs) if the GPU is
    /// unknown, already has a live handle, or the spawn fails.
    ///
    /// "Started" means the process is launched, not that the model is
    /// loaded; readiness is observed through the client's `/health` probe.
    pub async fn start(&self, gpu_id: &str) -> bool {
        let mut handles = self.handles.write().await;

        if handles.contains_key(gpu_id) {
            tracing::warn!(gpu = %gpu_id, "Server already running");
            return false;
        }

        let Some(instance) = self.config.instance(gpu_id) else {
            tracing::error!(gpu = %gpu_id, "No configuration found for GPU");
            return false;
        };

        let spec = SpawnSpec {
            gpu_id: gpu_id.to_string(),
            binary_path: self.server_binary.clone(),
            config_path: self.config_path.clone(),
            port: instance.port,
            model: instance.model.clone(),
        };

        tracing::info!(
            gpu = %gpu_id,
            model = %instance.model,
            port = instance.port,
            description = %instance.description,
            "Starting server"
        );

        match self.manager.spawn(spec).await {
            Ok(handle) => {
                tracing::info!(gpu = %gpu_id, pid = handle.pid, "Server started");
                handles.insert(gpu_id.to_string(), handle);
                true
            }
            Err(e) => {
                tracing::error!(gpu = %gpu_id, error = %e, "Failed to start server");
                false
            }
        }
    }

    /// Stop the server for one GPU: graceful signal, then forced kill after
    /// the grace window. Returns false if no handle exists.
    pub async fn stop(&self, gpu_id: &str) -> bool {
        let handle = self.handles.write().await.remove(gpu_id);

        let Some(handle) = handle else {
            tracing::warn!(gpu = %gpu_id, "No running server on GPU");
            return false;
        };

        tracing::info!(gpu = %gpu_id, pid = handle.pid, "Stopping server");

        match self.manager.stop(handle, GRACEFUL_STOP_TIMEOUT).await {
            Ok(()) => {
                tracing::info!(gpu = %gpu_id, "Server stopped");
                true
            }
            Err(e) => {
                tracing::error!(gpu = %gpu_id, error = %e, "Failed to stop server");
                false
            }
        }
    }

    /// Stop then relaunch one GPU's server with a settling delay in between.
    pub async fn restart(&self, gpu_id: &str) -> bool {
        tracing::info!(gpu = %gpu_id, "Restarting server");
        self.stop(gpu_id).await;
        tokio::time::sleep(self.launch_delay).await;
        self.start(gpu_id).await
    }

    /// Launch servers for the given GPUs (all configured if `None`),
    /// sequentially with a stagger between launches. Returns the number of
    /// successful launches; failures are logged and skipped.
    pub async fn start_all(&self, gpu_ids: Option<&[String]>) -> usize {
        let ids = match gpu_ids {
            Some(ids) => ids.to_vec(),
            None => self.config.available_ids(),
        };

        let mut started = 0;
        for gpu_id in &ids {
            if self.start(gpu_id).await {
                started += 1;
                tokio::time::sleep(self.launch_delay).await;
            }
        }

        tracing::info!(started, total = ids.len(), "Start complete");
        started
    }

    /// Stop then relaunch the whole fleet.
    pub async fn restart_all(&self) -> usize {
        tracing::info!("Restarting fleet");
        self.stop_all().await;
        tokio::time::sleep(self.launch_delay).await;
        self.start_all(None).await
    }

    /// Stop every live server, sequentially in document order. Returns the
    /// number of confirmed stops.
    pub async fn stop_all(&self) -> usize {
        let live: Vec<String> = {
            let handles = self.handles.read().await;
            self.config
                .available_ids()
                .into_iter()
                .filter(|id| handles.contains_key(id))
                .collect()
        };

        let mut stopped = 0;
        for gpu_id in &live {
            if self.stop(gpu_id).await {
                stopped += 1;
            }
        }

        tracing::info!(stopped, total = live.len(), "Stop complete");
        stopped
    }

    /// Report the state of every configured instance, in document order.
    ///
    /// A handle whose process has exited is removed here (lazy reap), so the
    /// map never carries a dead pid past one status call.
    pub async fn status(&self) -> Vec<InstanceReport> {
        let mut handles = self.handles.write().await;
        let mut reports = Vec::with_capacity(self.config.gpus.len());

        for (gpu_id, instance) in self.config.all_instances() {
            let polled = match handles.get(gpu_id) {
                None => None,
                Some(handle) => Some((handle.pid, self.manager.try_wait(handle).await)),
            };

            let state = match polled {
                None => InstanceState::NotStarted,
                Some((pid, Ok(ProcessState::Running))) => InstanceState::Running { pid },
                Some((_, Ok(ProcessState::Exited(exit_code)))) => {
                    handles.remove(gpu_id);
                    InstanceState::Stopped { exit_code }
                }
                Some((_, Err(e))) => {
                    tracing::error!(gpu = %gpu_id, error = %e, "Failed to poll server");
                    handles.remove(gpu_id);
                    InstanceState::Stopped { exit_code: None }
                }
            };

            reports.push(InstanceReport {
                gpu_id: gpu_id.to_string(),
                state,
                port: instance.port,
                model: instance.model.clone(),
                description: instance.description.clone(),
            });
        }

        reports
    }

    /// Blocking monitor loop: report fleet state every `interval`, warning
    /// for each spontaneous exit. Runs until externally cancelled; callers
    /// are expected to invoke `shutdown()` afterwards.
    ///
    /// No auto-restart: a spontaneous exit is logged for the operator.
    pub async fn monitor(&self, interval: Duration) {
        tracing::info!(interval_secs = interval.as_secs(), "Monitoring fleet");

        let mut ticker = tokio::time::interval(interval);

        loop {
            ticker.tick().await;

            let reports = self.status().await;

            for report in &reports {
                if let InstanceState::Stopped { exit_code } = report.state {
                    tracing::warn!(
                        gpu = %report.gpu_id,
                        exit_code = ?exit_code,
                        "Server exited unexpectedly"
                    );
                }
            }

            let running = reports.iter().filter(|r| r.is_running()).count();
            tracing::info!(running, total = reports.len(), "Fleet status");
        }
    }

    /// Stop the whole fleet exactly once. Safe to call from the signal path,
    /// the fatal-error path, and the monitor-exit path in any combination;
    /// every call after the first is a no-op.
    pub async fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        tracing::info!("Cleaning up fleet");
        self.stop_all().await;
    }
}

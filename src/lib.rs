//! vllm-fleet - Orchestrator for per-GPU vLLM inference servers
//!
//! Supervises one vLLM server process per configured GPU and routes
//! generation requests to healthy instances over HTTP.

pub mod client;
pub mod config;
pub mod error;
pub mod manager;
pub mod process;
pub mod protocol;
pub mod supervisor;

pub use client::{FleetClient, HealthRecord, HealthStatus, ServerEntry};
pub use config::{ClientConfig, FleetConfig, InstanceConfig, ServerConfig};
pub use error::{FleetError, FleetResult};
pub use manager::ClientManager;
pub use process::{ProcessHandle, ProcessManager, ProcessState, SystemProcessManager};
pub use protocol::{GenerateRequest, GenerateResponse, GenerationParams};
pub use supervisor::{InstanceReport, InstanceState, Supervisor};

//! Error types shared across the fleet orchestrator

use reqwest::StatusCode;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the configuration model and the fleet client.
///
/// Supervisor-side spawn/stop failures are logged and reported as boolean
/// results instead; they never abort a batch operation.
#[derive(Debug, Error)]
pub enum FleetError {
    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("failed to read config file {path}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    ConfigInvalid(String),

    #[error("no configuration found for GPU {0}")]
    UnknownInstance(String),

    #[error("failed to build HTTP session")]
    Session(#[source] reqwest::Error),

    #[error("request to GPU {gpu_id} failed")]
    Transport {
        gpu_id: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("generation on GPU {gpu_id} failed: HTTP {status}: {body}")]
    Generation {
        gpu_id: String,
        status: StatusCode,
        body: String,
    },

    #[error("info request to GPU {gpu_id} failed: HTTP {status}")]
    Info { gpu_id: String, status: StatusCode },

    #[error("no healthy vLLM server available")]
    NoHealthyInstance,
}

pub type FleetResult<T> = Result<T, FleetError>;

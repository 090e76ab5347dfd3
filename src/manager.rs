//! Facade scoping one client session per logical operation

use crate::client::{FleetClient, HealthRecord, ServerEntry};
use crate::config::FleetConfig;
use crate::error::FleetResult;
use crate::protocol::{GenerateResponse, GenerationParams, InfoResponse};
use std::collections::HashMap;
use std::path::Path;

/// Wraps `FleetClient` construction so that every call opens one session,
/// uses it, and drops it — callers never manage session lifetime.
#[derive(Debug)]
pub struct ClientManager {
    config: FleetConfig,
}

impl ClientManager {
    pub fn new(config_path: impl AsRef<Path>) -> FleetResult<Self> {
        Ok(Self {
            config: FleetConfig::load(config_path)?,
        })
    }

    pub fn from_config(config: FleetConfig) -> Self {
        Self { config }
    }

    fn session(&self) -> FleetResult<FleetClient> {
        FleetClient::connect(self.config.clone())
    }

    /// All configured servers, no network calls.
    pub fn list_servers(&self) -> FleetResult<Vec<ServerEntry>> {
        Ok(self.session()?.list_instances())
    }

    /// Health of one server, or of the whole fleet when `gpu_id` is `None`.
    pub async fn check_health(
        &self,
        gpu_id: Option<&str>,
    ) -> FleetResult<HashMap<String, HealthRecord>> {
        let client = self.session()?;

        match gpu_id {
            Some(gpu_id) => {
                let record = client.check_health(gpu_id).await?;
                Ok(HashMap::from([(gpu_id.to_string(), record)]))
            }
            None => Ok(client.check_all().await),
        }
    }

    /// Detailed `/info` for one server.
    pub async fn server_info(&self, gpu_id: &str) -> FleetResult<InfoResponse> {
        self.session()?.server_info(gpu_id).await
    }

    /// Generate on a specific server, or on the best healthy one.
    pub async fn generate(
        &self,
        prompt: &str,
        gpu_id: Option<&str>,
        model_preference: Option<&[String]>,
        params: &GenerationParams,
    ) -> FleetResult<GenerateResponse> {
        let client = self.session()?;

        match gpu_id {
            Some(gpu_id) => client.generate(gpu_id, prompt, params).await,
            None => client.generate_on_best(prompt, model_preference, params).await,
        }
    }
}

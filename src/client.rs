//! HTTP client for the fleet: health probes, generation, instance selection

use crate::config::FleetConfig;
use crate::error::{FleetError, FleetResult};
use crate::protocol::{GenerateRequest, GenerateResponse, GenerationParams, HealthResponse, InfoResponse};
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;

/// Health-probe verdict for one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// Result of one bounded-retry health probe. Produced fresh on every call,
/// never cached.
#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub gpu_id: String,
    pub status: HealthStatus,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<HealthResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl HealthRecord {
    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Configuration-derived view of one instance.
#[derive(Debug, Clone, Serialize)]
pub struct ServerEntry {
    pub gpu_id: String,
    pub model: String,
    pub description: String,
    pub port: u16,
    pub url: String,
}

/// Client for the whole fleet, holding one pooled HTTP session.
///
/// A `FleetClient` is scoped to one logical unit of work: construct it,
/// issue calls, drop it. The session (connection pool) lives exactly as long
/// as the value.
pub struct FleetClient {
    config: FleetConfig,
    http: reqwest::Client,
    retry_attempts: u32,
    retry_delay: Duration,
}

impl FleetClient {
    /// Open a session against the configured fleet.
    pub fn connect(config: FleetConfig) -> FleetResult<Self> {
        let client_config = config.client();

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(client_config.default_timeout))
            .build()
            .map_err(FleetError::Session)?;

        Ok(Self {
            retry_attempts: client_config.retry_attempts,
            retry_delay: Duration::from_secs(client_config.retry_delay),
            config,
            http,
        })
    }

    pub fn config(&self) -> &FleetConfig {
        &self.config
    }

    /// Base URL of one instance.
    pub fn instance_url(&self, gpu_id: &str) -> FleetResult<String> {
        let instance = self
            .config
            .instance(gpu_id)
            .ok_or_else(|| FleetError::UnknownInstance(gpu_id.to_string()))?;

        Ok(format!(
            "http://{}:{}",
            self.config.server().host,
            instance.port
        ))
    }

    /// All configured instances in document order. Pure config projection,
    /// no network calls.
    pub fn list_instances(&self) -> Vec<ServerEntry> {
        self.config
            .all_instances()
            .map(|(gpu_id, instance)| ServerEntry {
                gpu_id: gpu_id.to_string(),
                model: instance.model.clone(),
                description: instance.description.clone(),
                port: instance.port,
                url: format!("http://{}:{}", self.config.server().host, instance.port),
            })
            .collect()
    }

    /// Probe one instance's `/health`, retrying up to the configured attempt
    /// count with a fixed delay between attempts.
    ///
    /// Total over every configured id: transport errors and non-2xx
    /// responses are absorbed into an unhealthy record after the last
    /// attempt. Only an unknown id is an error.
    pub async fn check_health(&self, gpu_id: &str) -> FleetResult<HealthRecord> {
        let base = self.instance_url(gpu_id)?;
        let url = format!("{base}/health");
        let mut last_failure = String::new();

        for attempt in 1..=self.retry_attempts {
            match self.probe_health(&url).await {
                Ok(body) => {
                    return Ok(HealthRecord {
                        gpu_id: gpu_id.to_string(),
                        status: HealthStatus::Healthy,
                        url: base,
                        response: Some(body),
                        error: None,
                    });
                }
                Err(failure) => {
                    tracing::warn!(
                        gpu = %gpu_id,
                        attempt,
                        attempts = self.retry_attempts,
                        failure = %failure,
                        "Health check attempt failed"
                    );
                    last_failure = failure;
                }
            }

            if attempt < self.retry_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Ok(HealthRecord {
            gpu_id: gpu_id.to_string(),
            status: HealthStatus::Unhealthy,
            url: base,
            response: None,
            error: Some(last_failure),
        })
    }

    async fn probe_health(&self, url: &str) -> Result<HealthResponse, String> {
        let response = self.http.get(url).send().await.map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("HTTP {}", response.status()));
        }

        response.json::<HealthResponse>().await.map_err(|e| e.to_string())
    }

    /// Probe every configured instance concurrently. One instance's failure
    /// never affects another's record; this cannot fail as a whole.
    pub async fn check_all(&self) -> HashMap<String, HealthRecord> {
        let ids = self.config.available_ids();
        let checks = ids.iter().map(|gpu_id| self.check_health(gpu_id));
        let results = futures::future::join_all(checks).await;

        results
            .into_iter()
            .filter_map(|result| match result {
                Ok(record) => Some((record.gpu_id.clone(), record)),
                Err(e) => {
                    tracing::error!(error = %e, "Health check error");
                    None
                }
            })
            .collect()
    }

    /// Fetch one instance's `/info`. Surfaces failures immediately, no
    /// retries.
    pub async fn server_info(&self, gpu_id: &str) -> FleetResult<InfoResponse> {
        let url = format!("{}/info", self.instance_url(gpu_id)?);

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| FleetError::Transport {
                gpu_id: gpu_id.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(FleetError::Info {
                gpu_id: gpu_id.to_string(),
                status: response.status(),
            });
        }

        response
            .json::<InfoResponse>()
            .await
            .map_err(|source| FleetError::Transport {
                gpu_id: gpu_id.to_string(),
                source,
            })
    }

    /// Generate text on one instance.
    ///
    /// Never retried: a failed generation may have partially consumed
    /// compute on the target, so failures surface immediately.
    pub async fn generate(
        &self,
        gpu_id: &str,
        prompt: &str,
        params: &GenerationParams,
    ) -> FleetResult<GenerateResponse> {
        let url = format!("{}/generate", self.instance_url(gpu_id)?);
        let request = GenerateRequest::new(prompt, params);

        let response = self
            .http
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|source| FleetError::Transport {
                gpu_id: gpu_id.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FleetError::Generation {
                gpu_id: gpu_id.to_string(),
                status,
                body,
            });
        }

        let result = response
            .json::<GenerateResponse>()
            .await
            .map_err(|source| FleetError::Transport {
                gpu_id: gpu_id.to_string(),
                source,
            })?;

        tracing::info!(
            gpu = %gpu_id,
            chars = result.text.len(),
            "Generation complete"
        );

        Ok(result)
    }

    /// Generate on the best available instance: probe the whole fleet,
    /// filter to healthy instances, pick by model preference, delegate to
    /// `generate`.
    pub async fn generate_on_best(
        &self,
        prompt: &str,
        model_preference: Option<&[String]>,
        params: &GenerationParams,
    ) -> FleetResult<GenerateResponse> {
        let health = self.check_all().await;

        // Healthy ids in document order, so ties resolve to the earliest
        // configured instance
        let healthy: Vec<String> = self
            .config
            .available_ids()
            .into_iter()
            .filter(|id| health.get(id).is_some_and(HealthRecord::is_healthy))
            .collect();

        let Some(target) = self.pick_target(&healthy, model_preference) else {
            return Err(FleetError::NoHealthyInstance);
        };
        let target = target.to_string();

        tracing::info!(gpu = %target, "Selected server for generation");
        self.generate(&target, prompt, params).await
    }

    /// Preference terms are tried in order; within a term, healthy instances
    /// are scanned in the order given and the first case-insensitive model
    /// substring match wins. With no match or no preference, the first
    /// healthy instance wins.
    fn pick_target<'a>(
        &self,
        healthy: &'a [String],
        model_preference: Option<&[String]>,
    ) -> Option<&'a str> {
        if let Some(preference) = model_preference {
            for term in preference {
                let needle = term.to_lowercase();
                for gpu_id in healthy {
                    let Some(instance) = self.config.instance(gpu_id) else {
                        continue;
                    };
                    if instance.model.to_lowercase().contains(&needle) {
                        return Some(gpu_id);
                    }
                }
            }
        }

        healthy.first().map(String::as_str)
    }
}

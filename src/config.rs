//! Configuration structures and loading logic

use crate::error::{FleetError, FleetResult};
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

/// Top-level fleet configuration document.
///
/// Loaded once at process start and read-only for the rest of the run.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct FleetConfig {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub gpus: InstanceMap,
}

/// Bind-address template shared by every instance: an instance is reachable
/// at `http://{host}:{instance.port}`.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_server_port(),
        }
    }
}

/// Timeout and retry policy for the fleet client only.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// Total per-request timeout in seconds.
    pub default_timeout: u64,
    /// Total health-check attempts, including the first.
    pub retry_attempts: u32,
    /// Delay between health-check attempts in seconds.
    pub retry_delay: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            default_timeout: default_timeout(),
            retry_attempts: default_retry_attempts(),
            retry_delay: default_retry_delay(),
        }
    }
}

/// Configuration for a single GPU-bound vLLM server instance.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct InstanceConfig {
    pub model: String,
    pub port: u16,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_tensor_parallel_size")]
    pub tensor_parallel_size: u32,

    #[serde(default = "default_gpu_memory_utilization")]
    pub gpu_memory_utilization: f64,

    #[serde(default = "default_max_model_len")]
    pub max_model_len: u32,
}

/// The `gpus` section: GPU id to instance config, in document order.
///
/// JSON objects lose key order through a plain `HashMap`, but `available_ids`
/// is contractually document-ordered, so entries are kept as an ordered list
/// and duplicate ids are rejected at parse time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstanceMap {
    entries: Vec<(String, InstanceConfig)>,
}

impl InstanceMap {
    pub fn get(&self, gpu_id: &str) -> Option<&InstanceConfig> {
        self.entries
            .iter()
            .find(|(id, _)| id == gpu_id)
            .map(|(_, config)| config)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(id, _)| id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &InstanceConfig)> {
        self.entries
            .iter()
            .map(|(id, config)| (id.as_str(), config))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl FromIterator<(String, InstanceConfig)> for InstanceMap {
    fn from_iter<T: IntoIterator<Item = (String, InstanceConfig)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}

impl<'de> Deserialize<'de> for InstanceMap {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct InstanceMapVisitor;

        impl<'de> Visitor<'de> for InstanceMapVisitor {
            type Value = InstanceMap;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of GPU id to instance config")
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries: Vec<(String, InstanceConfig)> =
                    Vec::with_capacity(access.size_hint().unwrap_or(0));

                while let Some((id, config)) = access.next_entry::<String, InstanceConfig>()? {
                    if entries.iter().any(|(existing, _)| *existing == id) {
                        return Err(serde::de::Error::custom(format!(
                            "duplicate GPU id: {id}"
                        )));
                    }
                    entries.push((id, config));
                }

                Ok(InstanceMap { entries })
            }
        }

        deserializer.deserialize_map(InstanceMapVisitor)
    }
}

impl Serialize for InstanceMap {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (id, config) in &self.entries {
            map.serialize_entry(id, config)?;
        }
        map.end()
    }
}

impl FleetConfig {
    /// Load and validate a configuration document.
    pub fn load(path: impl AsRef<Path>) -> FleetResult<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(FleetError::ConfigNotFound(path.to_path_buf()));
        }

        let content = std::fs::read_to_string(path).map_err(|source| FleetError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;

        let config: Self =
            serde_json::from_str(&content).map_err(|source| FleetError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;

        config.validate()?;

        tracing::debug!(
            path = %path.display(),
            gpus = config.gpus.len(),
            "Configuration loaded"
        );

        Ok(config)
    }

    /// Validate cross-field invariants.
    pub fn validate(&self) -> FleetResult<()> {
        if self.client.retry_attempts == 0 {
            return Err(FleetError::ConfigInvalid(
                "client.retry_attempts must be at least 1".to_string(),
            ));
        }

        let mut ports = HashSet::new();
        for (gpu_id, instance) in self.gpus.iter() {
            if gpu_id.is_empty() {
                return Err(FleetError::ConfigInvalid(
                    "GPU id cannot be empty".to_string(),
                ));
            }
            if !ports.insert(instance.port) {
                return Err(FleetError::ConfigInvalid(format!(
                    "duplicate port {} in GPU configs",
                    instance.port
                )));
            }
            if instance.gpu_memory_utilization <= 0.0 || instance.gpu_memory_utilization > 1.0 {
                return Err(FleetError::ConfigInvalid(format!(
                    "GPU {gpu_id}: gpu_memory_utilization must be in (0, 1], got {}",
                    instance.gpu_memory_utilization
                )));
            }
        }

        Ok(())
    }

    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    pub fn client(&self) -> &ClientConfig {
        &self.client
    }

    /// Config for a specific GPU id, if present.
    pub fn instance(&self, gpu_id: &str) -> Option<&InstanceConfig> {
        self.gpus.get(gpu_id)
    }

    /// All instances in document order.
    pub fn all_instances(&self) -> impl Iterator<Item = (&str, &InstanceConfig)> {
        self.gpus.iter()
    }

    /// GPU ids in document order.
    pub fn available_ids(&self) -> Vec<String> {
        self.gpus.ids().map(str::to_string).collect()
    }

    /// First GPU whose model id contains `needle`, case-insensitively,
    /// in document order.
    pub fn instance_by_model(&self, needle: &str) -> Option<&str> {
        let needle = needle.to_lowercase();
        self.gpus
            .iter()
            .find(|(_, config)| config.model.to_lowercase().contains(&needle))
            .map(|(id, _)| id)
    }

    /// GPU bound to the given instance port, if any.
    pub fn instance_by_port(&self, port: u16) -> Option<&str> {
        self.gpus
            .iter()
            .find(|(_, config)| config.port == port)
            .map(|(id, _)| id)
    }
}

// Default functions
fn default_host() -> String {
    "localhost".to_string()
}
fn default_server_port() -> u16 {
    8000
}
fn default_timeout() -> u64 {
    300
}
fn default_retry_attempts() -> u32 {
    3
}
fn default_retry_delay() -> u64 {
    1
}
fn default_tensor_parallel_size() -> u32 {
    1
}
fn default_gpu_memory_utilization() -> f64 {
    0.9
}
fn default_max_model_len() -> u32 {
    4096
}

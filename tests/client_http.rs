//! Client integration tests against in-process stub vLLM servers

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use vllm_fleet::protocol::{
    EngineConfig, GenerateRequest, GenerateResponse, GenerationParams, HealthResponse,
    InfoResponse,
};
use vllm_fleet::{
    ClientConfig, FleetClient, FleetConfig, FleetError, InstanceConfig, ServerConfig,
};

struct StubState {
    gpu_id: String,
    model: String,
    port: u16,
    healthy: bool,
    health_hits: AtomicUsize,
    generate_hits: AtomicUsize,
}

struct Stub {
    state: Arc<StubState>,
    port: u16,
}

impl Stub {
    fn health_hits(&self) -> usize {
        self.state.health_hits.load(Ordering::SeqCst)
    }

    fn generate_hits(&self) -> usize {
        self.state.generate_hits.load(Ordering::SeqCst)
    }
}

/// Spawn an in-process server speaking the vLLM wire protocol.
async fn spawn_stub(gpu_id: &str, model: &str, healthy: bool) -> Stub {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let state = Arc::new(StubState {
        gpu_id: gpu_id.to_string(),
        model: model.to_string(),
        port,
        healthy,
        health_hits: AtomicUsize::new(0),
        generate_hits: AtomicUsize::new(0),
    });

    let app = Router::new()
        .route("/health", get(stub_health))
        .route("/info", get(stub_info))
        .route("/generate", post(stub_generate))
        .with_state(state.clone());

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    Stub { state, port }
}

async fn stub_health(
    State(state): State<Arc<StubState>>,
) -> Result<Json<HealthResponse>, StatusCode> {
    state.health_hits.fetch_add(1, Ordering::SeqCst);

    if !state.healthy {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    Ok(Json(HealthResponse {
        status: "healthy".to_string(),
        gpu_id: state.gpu_id.clone(),
        model: state.model.clone(),
        port: state.port,
    }))
}

async fn stub_info(State(state): State<Arc<StubState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        gpu_id: state.gpu_id.clone(),
        model: state.model.clone(),
        description: "stub server".to_string(),
        port: state.port,
        config: EngineConfig {
            tensor_parallel_size: 1,
            gpu_memory_utilization: 0.9,
            max_model_len: 4096,
        },
    })
}

async fn stub_generate(
    State(state): State<Arc<StubState>>,
    Json(request): Json<GenerateRequest>,
) -> Result<Json<GenerateResponse>, StatusCode> {
    state.generate_hits.fetch_add(1, Ordering::SeqCst);

    if !state.healthy {
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    Ok(Json(GenerateResponse {
        text: format!("echo: {}", request.prompt),
        prompt: request.prompt,
        model: state.model.clone(),
        gpu_id: state.gpu_id.clone(),
    }))
}

fn fleet_config(
    instances: &[(&str, &str, u16)],
    retry_attempts: u32,
    retry_delay: u64,
) -> FleetConfig {
    FleetConfig {
        server: ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 8000,
        },
        client: ClientConfig {
            default_timeout: 5,
            retry_attempts,
            retry_delay,
        },
        gpus: instances
            .iter()
            .map(|(gpu_id, model, port)| {
                (
                    gpu_id.to_string(),
                    InstanceConfig {
                        model: model.to_string(),
                        port: *port,
                        description: String::new(),
                        tensor_parallel_size: 1,
                        gpu_memory_utilization: 0.9,
                        max_model_len: 4096,
                    },
                )
            })
            .collect(),
    }
}

/// A port with nothing listening on it.
async fn dead_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

#[tokio::test]
async fn test_check_health_healthy() {
    let stub = spawn_stub("0", "org/model-7b", true).await;
    let config = fleet_config(&[("0", "org/model-7b", stub.port)], 3, 0);
    let client = FleetClient::connect(config).unwrap();

    let record = client.check_health("0").await.unwrap();

    assert!(record.is_healthy());
    assert_eq!(record.url, format!("http://127.0.0.1:{}", stub.port));
    assert_eq!(record.response.unwrap().model, "org/model-7b");
    assert!(record.error.is_none());
    assert_eq!(stub.health_hits(), 1);
}

#[tokio::test]
async fn test_check_health_exhausts_exact_attempt_count() {
    let stub = spawn_stub("0", "org/model-7b", false).await;
    let config = fleet_config(&[("0", "org/model-7b", stub.port)], 3, 0);
    let client = FleetClient::connect(config).unwrap();

    let record = client.check_health("0").await.unwrap();

    assert!(!record.is_healthy());
    assert_eq!(stub.health_hits(), 3);
    assert!(record.error.unwrap().contains("500"));
}

#[tokio::test]
async fn test_check_health_spaces_attempts_by_retry_delay() {
    let port = dead_port().await;
    let config = fleet_config(&[("0", "org/model-7b", port)], 3, 1);
    let client = FleetClient::connect(config).unwrap();

    let started = Instant::now();
    let record = client.check_health("0").await.unwrap();

    // 3 attempts with two 1 s gaps in between
    assert!(!record.is_healthy());
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(record.error.is_some());
}

#[tokio::test]
async fn test_check_health_unknown_gpu() {
    let config = fleet_config(&[("0", "org/model-7b", 8000)], 3, 0);
    let client = FleetClient::connect(config).unwrap();

    let err = client.check_health("9").await.unwrap_err();
    assert!(matches!(err, FleetError::UnknownInstance(id) if id == "9"));
}

#[tokio::test]
async fn test_check_all_fails_open_per_instance() {
    let stub = spawn_stub("0", "org/model-7b", true).await;
    let dead = dead_port().await;
    let config = fleet_config(
        &[("0", "org/model-7b", stub.port), ("1", "org/model-13b", dead)],
        2,
        0,
    );
    let client = FleetClient::connect(config).unwrap();

    let health = client.check_all().await;

    assert_eq!(health.len(), 2);
    assert!(health["0"].is_healthy());
    assert!(!health["1"].is_healthy());
}

#[tokio::test]
async fn test_generate_success() {
    let stub = spawn_stub("0", "org/model-7b", true).await;
    let config = fleet_config(&[("0", "org/model-7b", stub.port)], 3, 0);
    let client = FleetClient::connect(config).unwrap();

    let result = client
        .generate("0", "hello fleet", &GenerationParams::default())
        .await
        .unwrap();

    assert_eq!(result.text, "echo: hello fleet");
    assert_eq!(result.prompt, "hello fleet");
    assert_eq!(result.gpu_id, "0");
}

#[tokio::test]
async fn test_generate_failure_is_not_retried() {
    let stub = spawn_stub("0", "org/model-7b", false).await;
    let config = fleet_config(&[("0", "org/model-7b", stub.port)], 5, 0);
    let client = FleetClient::connect(config).unwrap();

    let err = client
        .generate("0", "hello", &GenerationParams::default())
        .await
        .unwrap_err();

    assert!(matches!(err, FleetError::Generation { .. }));
    // Distinct policy from health checks: exactly one attempt
    assert_eq!(stub.generate_hits(), 1);
}

#[tokio::test]
async fn test_generate_unknown_gpu() {
    let config = fleet_config(&[("0", "org/model-7b", 8000)], 3, 0);
    let client = FleetClient::connect(config).unwrap();

    let err = client
        .generate("9", "hello", &GenerationParams::default())
        .await
        .unwrap_err();

    assert!(matches!(err, FleetError::UnknownInstance(_)));
}

#[tokio::test]
async fn test_server_info() {
    let stub = spawn_stub("0", "org/model-7b", true).await;
    let config = fleet_config(&[("0", "org/model-7b", stub.port)], 3, 0);
    let client = FleetClient::connect(config).unwrap();

    let info = client.server_info("0").await.unwrap();

    assert_eq!(info.model, "org/model-7b");
    assert_eq!(info.config.max_model_len, 4096);
}

#[tokio::test]
async fn test_generate_on_best_honors_model_preference() {
    // The 13b instance comes first in document order; preference still
    // routes to the 7b one
    let big = spawn_stub("0", "org/model-13b", true).await;
    let small = spawn_stub("1", "org/model-7b", true).await;
    let config = fleet_config(
        &[
            ("0", "org/model-13b", big.port),
            ("1", "org/model-7b", small.port),
        ],
        2,
        0,
    );
    let client = FleetClient::connect(config).unwrap();

    let preference = vec!["7b".to_string()];
    let result = client
        .generate_on_best("hello", Some(&preference), &GenerationParams::default())
        .await
        .unwrap();

    assert_eq!(result.gpu_id, "1");
    assert_eq!(small.generate_hits(), 1);
    assert_eq!(big.generate_hits(), 0);
}

#[tokio::test]
async fn test_generate_on_best_skips_unhealthy_preferred() {
    let big = spawn_stub("0", "org/model-13b", true).await;
    let small = spawn_stub("1", "org/model-7b", false).await;
    let config = fleet_config(
        &[
            ("0", "org/model-13b", big.port),
            ("1", "org/model-7b", small.port),
        ],
        2,
        0,
    );
    let client = FleetClient::connect(config).unwrap();

    // Preferred model is down; selection falls back to the healthy one
    let preference = vec!["7b".to_string()];
    let result = client
        .generate_on_best("hello", Some(&preference), &GenerationParams::default())
        .await
        .unwrap();

    assert_eq!(result.gpu_id, "0");
    assert_eq!(small.generate_hits(), 0);
}

#[tokio::test]
async fn test_generate_on_best_defaults_to_first_healthy() {
    let first = spawn_stub("0", "org/model-13b", true).await;
    let second = spawn_stub("1", "org/model-7b", true).await;
    let config = fleet_config(
        &[
            ("0", "org/model-13b", first.port),
            ("1", "org/model-7b", second.port),
        ],
        2,
        0,
    );
    let client = FleetClient::connect(config).unwrap();

    let result = client
        .generate_on_best("hello", None, &GenerationParams::default())
        .await
        .unwrap();

    assert_eq!(result.gpu_id, "0");
    assert_eq!(second.generate_hits(), 0);
}

#[tokio::test]
async fn test_generate_on_best_with_no_healthy_instances() {
    let down_a = spawn_stub("0", "org/model-13b", false).await;
    let down_b = spawn_stub("1", "org/model-7b", false).await;
    let config = fleet_config(
        &[
            ("0", "org/model-13b", down_a.port),
            ("1", "org/model-7b", down_b.port),
        ],
        2,
        0,
    );
    let client = FleetClient::connect(config).unwrap();

    let err = client
        .generate_on_best("hello", None, &GenerationParams::default())
        .await
        .unwrap_err();

    assert!(matches!(err, FleetError::NoHealthyInstance));
    // No /generate request reached either instance
    assert_eq!(down_a.generate_hits(), 0);
    assert_eq!(down_b.generate_hits(), 0);
}

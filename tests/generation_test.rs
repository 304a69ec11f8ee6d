use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use runner_asset_engine::config::{EntityAssetSource, ReconnectConfig};
use runner_asset_engine::detect::format::{GLB_CHUNK_JSON, GLB_MAGIC};
use runner_asset_engine::engine::events::StatusEventKind;
use runner_asset_engine::engine::lod::LodLevel;
use runner_asset_engine::engine::record::{GenerationSpec, JobStatus};
use runner_asset_engine::source::generation::{ConnectionState, GenerationClient, TextureQuery};
use runner_asset_engine::source::placeholder::ProceduralPlaceholders;
use runner_asset_engine::source::traits::GenerationService;
use runner_asset_engine::{
    AssetConfig, AssetKind, AssetManager, AssetSource, AssetStatus, Resolution, ServiceError,
};

const API_KEY: &str = "secret";

#[derive(Clone)]
struct MockService {
    base: String,
    model_polls: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<Value>>>,
}

fn glb_bytes() -> Vec<u8> {
    let json = br#"{"asset":{"version":"2.0"}} "#;
    let total = 12 + 8 + json.len();
    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&GLB_MAGIC.to_le_bytes());
    out.extend_from_slice(&2u32.to_le_bytes());
    out.extend_from_slice(&(total as u32).to_le_bytes());
    out.extend_from_slice(&(json.len() as u32).to_le_bytes());
    out.extend_from_slice(&GLB_CHUNK_JSON.to_le_bytes());
    out.extend_from_slice(json);
    out
}

async fn command(
    State(service): State<MockService>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let expected = format!("Bearer {}", API_KEY);
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());
    if auth != Some(expected.as_str()) {
        return (StatusCode::UNAUTHORIZED, "bad api key").into_response();
    }

    let job_id = match body["command"].as_str() {
        Some("generate_model") => "job-42",
        Some("search_textures") => "job-tex",
        _ => return (StatusCode::BAD_REQUEST, "unknown command").into_response(),
    };
    service.commands.lock().push(body);
    Json(json!({ "jobId": job_id })).into_response()
}

async fn job(State(service): State<MockService>, Path(id): Path<String>) -> Response {
    match id.as_str() {
        "job-42" => {
            let n = service.model_polls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= 2 {
                Json(json!({ "status": "In Progress" })).into_response()
            } else {
                Json(json!({
                    "status": "Done",
                    "result": { "url": format!("{}/files/hero.glb", service.base) }
                }))
                .into_response()
            }
        }
        "job-tex" => Json(json!({
            "status": "Done",
            "result": {
                "assets": [
                    { "url": format!("{}/files/rock_01.jpg", service.base), "name": "rock_01" },
                    { "url": format!("{}/files/rock_02.jpg", service.base), "name": "rock_02", "format": "jpg" }
                ]
            }
        }))
        .into_response(),
        _ => (StatusCode::NOT_FOUND, "no such job").into_response(),
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn model_file() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "model/gltf-binary")],
        glb_bytes(),
    )
}

async fn start_server() -> (SocketAddr, MockService, tokio::task::JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let service = MockService {
        base: format!("http://{}", addr),
        model_polls: Arc::new(AtomicUsize::new(0)),
        commands: Arc::new(Mutex::new(Vec::new())),
    };

    let app = Router::new()
        .route("/command", post(command))
        .route("/jobs/{id}", get(job))
        .route("/health", get(health))
        .route("/files/hero.glb", get(model_file))
        .route("/files/rock.glb", get(model_file))
        .with_state(service.clone());
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, service, handle)
}

fn fast_reconnect() -> ReconnectConfig {
    ReconnectConfig {
        initial_backoff_ms: 10,
        max_backoff_ms: 50,
        max_attempts: 3,
    }
}

fn client(base: &str, api_key: Option<&str>) -> GenerationClient {
    GenerationClient::new(
        base,
        api_key.map(str::to_string),
        fast_reconnect(),
        Duration::from_secs(5),
    )
    .unwrap()
}

#[tokio::test]
async fn test_submit_and_poll() {
    let (_addr, service, _handle) = start_server().await;
    let client = client(&service.base, Some(API_KEY));
    assert_eq!(client.connection_state(), ConnectionState::Unknown);

    let job_id = client
        .submit(&GenerationSpec::model("low-poly runner"))
        .await
        .unwrap();
    assert_eq!(job_id, "job-42");
    assert_eq!(client.connection_state(), ConnectionState::Connected);

    let sent = service.commands.lock().clone();
    assert_eq!(sent[0]["command"], "generate_model");
    assert_eq!(sent[0]["payload"]["prompt"], "low-poly runner");

    assert_eq!(client.poll(&job_id).await.unwrap().status, JobStatus::InProgress);
    assert_eq!(client.poll(&job_id).await.unwrap().status, JobStatus::InProgress);
    let done = client.poll(&job_id).await.unwrap();
    assert_eq!(done.status, JobStatus::Done);
    assert_eq!(
        done.result.unwrap().primary_url(),
        Some(format!("{}/files/hero.glb", service.base).as_str())
    );
}

#[tokio::test]
async fn test_bad_api_key_is_rejected() {
    let (_addr, service, _handle) = start_server().await;
    let client = client(&service.base, Some("wrong"));

    let err = client
        .submit(&GenerationSpec::model("runner"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Rejected { status: 401, .. }), "{:?}", err);

    client.update_api_key(Some(API_KEY.to_string()));
    assert!(client.submit(&GenerationSpec::model("runner")).await.is_ok());
}

#[tokio::test]
async fn test_unknown_job_is_rejected() {
    let (_addr, service, _handle) = start_server().await;
    let client = client(&service.base, Some(API_KEY));

    let err = client.poll("job-missing").await.unwrap_err();
    assert!(matches!(err, ServiceError::Rejected { status: 404, .. }));
}

#[tokio::test]
async fn test_connect_reports_connected() {
    let (_addr, service, _handle) = start_server().await;
    let client = client(&service.base, None);

    client.connect().await.unwrap();
    assert_eq!(client.connection_state(), ConnectionState::Connected);
    client.health_check().await.unwrap();
}

#[tokio::test]
async fn test_unreachable_service_starts_reconnect() {
    // Nothing listens on this port once the listener is dropped.
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let client = client(&format!("http://{}", addr), None);

    let err = client
        .submit(&GenerationSpec::model("runner"))
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::Connection(_)));
    assert_eq!(client.connection_state(), ConnectionState::Reconnecting);

    // Three attempts at 10, 20 and 40 ms, then it gives up.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(client.connection_state(), ConnectionState::Disconnected);
    assert_eq!(client.reconnect_attempts(), 3);

    assert!(client.connect().await.is_err());
    client.shutdown();
}

#[tokio::test]
async fn test_connect_returns_after_final_attempt() {
    let addr = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };
    let client = GenerationClient::new(
        &format!("http://{}", addr),
        None,
        ReconnectConfig {
            initial_backoff_ms: 400,
            max_backoff_ms: 400,
            max_attempts: 1,
        },
        Duration::from_secs(5),
    )
    .unwrap();

    let started = Instant::now();
    let err = client.connect().await.unwrap_err();
    assert!(matches!(err, ServiceError::Connection(_)));
    assert!(started.elapsed() < Duration::from_millis(300));
    client.shutdown();
}

#[tokio::test]
async fn test_search_textures_returns_assets() {
    let (_addr, service, _handle) = start_server().await;
    let client = client(&service.base, Some(API_KEY));

    let config = AssetConfig::default();
    let query = TextureQuery::with_defaults("rock", &config);
    let assets = client
        .search_textures(&query, Duration::from_millis(10), Duration::from_secs(2))
        .await
        .unwrap();
    assert_eq!(assets.len(), 2);
    assert_eq!(assets[0].name.as_deref(), Some("rock_01"));
    assert_eq!(assets[1].format.as_deref(), Some("jpg"));

    let sent = service.commands.lock().clone();
    assert_eq!(sent[0]["command"], "search_textures");
    assert_eq!(sent[0]["payload"]["category"], "rock");
    assert_eq!(sent[0]["payload"]["resolution"], "1k");
}

fn manager_config(base: &str, generation: bool) -> AssetConfig {
    let overrides = json!({
        "mcp": { "enabled": generation, "connect_on_start": generation, "base_url": base },
        "generation": { "api_key": API_KEY },
        "loader": { "poll_interval_ms": 10, "generation_timeout_ms": 2000, "request_timeout_ms": 2000 },
        "reconnect": { "initial_backoff_ms": 10, "max_backoff_ms": 50, "max_attempts": 3 },
        "entities": {
            "hero": { "source": "generated", "prompt": "low-poly runner", "priority": 10 },
            "rock": { "source": "local", "path": format!("{}/files/rock.glb", base), "priority": 1 },
            "coin": { "source": "procedural" }
        }
    });
    AssetConfig::default().with_overrides(overrides).unwrap()
}

#[tokio::test]
async fn test_manager_preloads_generated_and_local_assets() {
    runner_asset_engine::telemetry::init_tracing();
    let (_addr, service, _handle) = start_server().await;
    let manager = AssetManager::start(manager_config(&service.base, true))
        .await
        .unwrap();
    assert_eq!(
        manager.generation_client().unwrap().connection_state(),
        ConnectionState::Connected
    );

    let plan = manager.preload_plan();
    assert_eq!(plan.procedural, vec!["coin".to_string()]);

    let resolved = manager.preload().await;
    assert_eq!(resolved.len(), 2);
    assert!(resolved.iter().all(|r| !r.is_placeholder()));

    let hero = manager.loader().record("hero").unwrap();
    assert_eq!(hero.status, AssetStatus::Ready);
    assert_eq!(hero.job_id.as_deref(), Some("job-42"));
    assert_eq!(hero.ref_count, 1);
    assert_eq!(
        hero.handle.unwrap().source(),
        format!("{}/files/hero.glb", service.base)
    );
    assert_eq!(service.model_polls.load(Ordering::SeqCst), 3);
    assert!(manager.loader().is_loaded("rock"));
    assert_eq!(manager.resources().unwrap().resource_count(), 2);

    manager.shutdown();
}

#[tokio::test]
async fn test_manager_without_generation_uses_placeholders() {
    let (_addr, service, _handle) = start_server().await;
    let manager = AssetManager::start(manager_config(&service.base, false))
        .await
        .unwrap();
    assert!(manager.generation_client().is_none());
    assert!(manager.entity_request("hero").is_none());
    assert_eq!(manager.entity_request("rock").unwrap().priority, 1);

    let texture = manager.texture_request("rock_albedo", "rock");
    assert_eq!(texture.kind, AssetKind::Texture);
    match &texture.source {
        AssetSource::Generation(spec) => {
            assert_eq!(spec.command, GenerationSpec::TEXTURE_DOWNLOAD_COMMAND);
            assert_eq!(spec.payload["format"], "jpg");
        }
        other => panic!("unexpected source {:?}", other),
    }

    let mut events = manager.loader().subscribe();
    let resolved = manager.preload().await;
    assert_eq!(resolved.len(), 2);
    let hero = resolved
        .iter()
        .find(|r| matches!(r, Resolution::Placeholder { id, .. } if id == "hero"))
        .unwrap();
    assert!(ProceduralPlaceholders::is_placeholder(hero.handle().unwrap()));
    assert_eq!(manager.loader().stats().placeholder_fallbacks, 1);

    let mut fell_back = Vec::new();
    while let Ok(event) = events.try_recv() {
        if event.kind == StatusEventKind::FellBack {
            fell_back.push((event.id, event.reason));
        }
    }
    assert_eq!(fell_back.len(), 1);
    assert_eq!(fell_back[0].0, "hero");
    assert!(fell_back[0].1.as_deref().unwrap().contains("generation disabled"));
    assert!(manager.loader().is_loaded("rock"));
    assert!(service.commands.lock().is_empty());

    assert!(matches!(
        manager.config().entities["coin"],
        EntityAssetSource::Procedural
    ));
}

#[tokio::test]
async fn test_manager_lod_request_picks_variant() {
    let (_addr, service, _handle) = start_server().await;
    let manager = AssetManager::start(manager_config(&service.base, false))
        .await
        .unwrap();

    let url_for = |level: LodLevel| format!("/models/rock_{}.glb", level.suffix());
    let near = manager.lod_request("rock", AssetKind::Model, 5.0, url_for);
    let far = manager.lod_request("rock", AssetKind::Model, 500.0, url_for);

    assert_eq!(near.id, "rock@high");
    assert_eq!(far.id, "rock@low");
    assert_eq!(far.source, AssetSource::url("/models/rock_low.glb"));
    assert_eq!(manager.lod().ratio(LodLevel::Low), 0.25);
}

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;

use runner_asset_engine::detect::format::{AssetFormat, GLB_CHUNK_JSON, GLB_MAGIC};
use runner_asset_engine::source::http_loader::HttpAssetLoader;
use runner_asset_engine::source::traits::{AssetLoader, HandleDisposer};
use runner_asset_engine::AssetKind;

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

async fn serve_model() -> impl IntoResponse {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "model/gltf-binary")],
        glb_bytes(),
    )
}

async fn serve_text() -> impl IntoResponse {
    (StatusCode::OK, "not a model")
}

async fn start_server() -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let app = Router::new()
        .route("/models/rock.glb", get(serve_model))
        .route("/models/readme.txt", get(serve_text));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

fn loader(root: Option<std::path::PathBuf>) -> HttpAssetLoader {
    HttpAssetLoader::new(root, Duration::from_secs(5)).unwrap()
}

#[tokio::test]
async fn test_load_model_over_http() {
    let (addr, _handle) = start_server().await;
    let loader = loader(None);
    let url = format!("http://{}/models/rock.glb", addr);

    let handle = loader.load(AssetKind::Model, &url).await.unwrap();
    assert_eq!(handle.source(), url);

    let resource = loader.resource(&handle).unwrap();
    assert_eq!(resource.format, AssetFormat::Glb);
    assert_eq!(resource.bytes.len(), glb_bytes().len());
    assert_eq!(loader.resource_count(), 1);
}

#[tokio::test]
async fn test_http_404_fails() {
    let (addr, _handle) = start_server().await;
    let loader = loader(None);
    let url = format!("http://{}/models/missing.glb", addr);

    let err = loader.load(AssetKind::Model, &url).await.unwrap_err();
    assert!(format!("{:#}", err).contains("404"));
    assert_eq!(loader.resource_count(), 0);
}

#[tokio::test]
async fn test_wrong_format_fails() {
    let (addr, _handle) = start_server().await;
    let loader = loader(None);
    let url = format!("http://{}/models/readme.txt", addr);

    let err = loader.load(AssetKind::Model, &url).await.unwrap_err();
    assert!(format!("{:#}", err).contains("unsupported format"));
}

#[tokio::test]
async fn test_unreachable_host_fails() {
    let loader = loader(None);
    let result = loader
        .load(AssetKind::Model, "http://127.0.0.1:1/rock.glb")
        .await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_load_local_file_under_root() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("models")).unwrap();
    std::fs::write(dir.path().join("models/tree.glb"), glb_bytes()).unwrap();

    let loader = loader(Some(dir.path().to_path_buf()));
    let handle = loader
        .load(AssetKind::Model, "/models/tree.glb")
        .await
        .unwrap();
    assert_eq!(loader.resource(&handle).unwrap().format, AssetFormat::Glb);

    let handle2 = loader
        .load(AssetKind::Model, "file://models/tree.glb")
        .await
        .unwrap();
    assert_ne!(handle.raw(), handle2.raw());
    assert_eq!(loader.resource_count(), 2);
}

#[tokio::test]
async fn test_missing_local_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let loader = loader(Some(dir.path().to_path_buf()));
    let err = loader
        .load(AssetKind::Texture, "/textures/none.png")
        .await
        .unwrap_err();
    assert!(format!("{:#}", err).contains("reading"));
}

#[tokio::test]
async fn test_dispose_removes_resource() {
    let dir = tempfile::tempdir().unwrap();
    let png = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A, 0, 0, 0, 0];
    std::fs::write(dir.path().join("checker.png"), png).unwrap();

    let loader = loader(Some(dir.path().to_path_buf()));
    let handle = loader
        .load(AssetKind::Texture, "checker.png")
        .await
        .unwrap();
    assert_eq!(loader.resource_count(), 1);

    loader.dispose("checker", handle.clone());
    assert_eq!(loader.resource_count(), 0);
    assert!(loader.resource(&handle).is_none());

    // Disposing twice is harmless.
    loader.dispose("checker", handle);
}
